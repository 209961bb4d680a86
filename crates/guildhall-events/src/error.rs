//! Error types for the event pool.

/// A malformed event, rejected synchronously at publish time.
///
/// Rejected events are never enqueued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEventError {
    /// The event has no name.
    #[error("event name is missing")]
    MissingName,

    /// The event has no timestamp.
    #[error("event timestamp is missing")]
    MissingTimestamp,

    /// The name does not follow the `domain.entity.action` grammar.
    #[error("malformed event name {name:?}: {reason}")]
    MalformedName {
        /// The offending name.
        name: String,
        /// Which grammar rule was violated.
        reason: &'static str,
    },

    /// A subscription pattern is neither an exact name nor a prefix wildcard.
    #[error("malformed subscription pattern {pattern:?}")]
    MalformedPattern {
        /// The offending pattern.
        pattern: String,
    },

    /// Schema versions start at 1.
    #[error("schema version must be at least 1")]
    ZeroSchemaVersion,

    /// The raw event could not be decoded at all.
    #[error("undecodable event: {reason}")]
    Undecodable {
        /// Decoder message.
        reason: String,
    },
}

/// Failure reported by a subscriber.
///
/// Handler failures are isolated: they are logged and collected in the
/// [`DispatchReport`], and never stop delivery to other handlers.
///
/// [`DispatchReport`]: crate::pool::DispatchReport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// What went wrong.
    pub message: String,
}

impl HandlerError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
