use thiserror::Error;

use super::events::EventType;

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("invalid key pattern `{pattern}` in {event_type} rule: {source}")]
    Pattern {
        event_type: EventType,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl InvalidationError {
    pub fn pattern(event_type: EventType, pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::Pattern {
            event_type,
            pattern: pattern.into(),
            source,
        }
    }
}
