use std::error::Error as StdError;

use thiserror::Error;

use crate::domain::error::DomainError;
use crate::infra::error::InfraError;
use crate::invalidation::InvalidationError;
use crate::performance::PerformanceError;

use super::loader::LoaderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Invalidation(#[from] InvalidationError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Performance(#[from] PerformanceError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// This error followed by its source chain, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = self.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}
