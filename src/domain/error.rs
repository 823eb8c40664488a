use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown page type `{value}`")]
    UnknownPageType { value: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unknown_page_type(value: impl Into<String>) -> Self {
        Self::UnknownPageType {
            value: value.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
