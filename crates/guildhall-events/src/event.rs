//! The [`Event`] record and its name grammar.
//!
//! Names are three dot-delimited segments, `domain.entity.action`, each made
//! of lowercase ASCII letters, digits, and underscores. The grammar is
//! enforced when an [`EventName`] is constructed, so a published [`Event`]
//! always carries a well-formed name.

use chrono::{DateTime, Utc};
use guildhall_types::CorrelationId;
use serde::{Deserialize, Serialize};

use crate::error::InvalidEventError;

/// Dispatch priority. Higher priorities drain first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background bookkeeping.
    Low,
    /// Ordinary gameplay events.
    #[default]
    Normal,
    /// Events other systems react to within the tick.
    High,
    /// Must be handled before anything else.
    Critical,
}

/// A validated `domain.entity.action` event name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName(String);

impl EventName {
    /// Validate and wrap `name`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEventError::MissingName`] for an empty name and
    /// [`InvalidEventError::MalformedName`] for any grammar violation.
    pub fn parse(name: &str) -> Result<Self, InvalidEventError> {
        if name.is_empty() {
            return Err(InvalidEventError::MissingName);
        }
        let malformed = |reason| InvalidEventError::MalformedName {
            name: name.to_owned(),
            reason,
        };

        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() != 3 {
            return Err(malformed("expected exactly three dot-delimited segments"));
        }
        for segment in segments {
            if segment.is_empty() {
                return Err(malformed("empty segment"));
            }
            if !segment
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
            {
                return Err(malformed("segments may only contain [a-z0-9_]"));
            }
        }
        Ok(Self(name.to_owned()))
    }

    /// The full name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first segment.
    pub fn domain(&self) -> &str {
        self.segment(0)
    }

    /// The second segment.
    pub fn entity(&self) -> &str {
        self.segment(1)
    }

    /// The third segment.
    pub fn action(&self) -> &str {
        self.segment(2)
    }

    fn segment(&self, index: usize) -> &str {
        self.0.split('.').nth(index).unwrap_or_default()
    }
}

impl TryFrom<String> for EventName {
    type Error = InvalidEventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> Self {
        name.0
    }
}

impl core::fmt::Display for EventName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable event.
///
/// Once handed to [`EventPool::publish`] the pool owns it; handlers only
/// ever see shared references.
///
/// [`EventPool::publish`]: crate::pool::EventPool::publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Hierarchical `domain.entity.action` name.
    pub name: EventName,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Dispatch priority.
    pub priority: Priority,
    /// Version of the payload schema, starting at 1.
    pub schema_version: u32,
    /// Links events that belong to the same causal chain.
    pub correlation_id: Option<CorrelationId>,
}

impl Event {
    /// Build a normal-priority, schema-version-1 event stamped now.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEventError`] if `name` is not a valid event name.
    pub fn new(name: &str, payload: serde_json::Value) -> Result<Self, InvalidEventError> {
        Ok(Self {
            name: EventName::parse(name)?,
            timestamp: Utc::now(),
            payload,
            priority: Priority::Normal,
            schema_version: 1,
            correlation_id: None,
        })
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the payload schema version.
    #[must_use]
    pub const fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the correlation ID.
    #[must_use]
    pub const fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An event as received from an untrusted collaborator, every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    /// Event name.
    pub name: Option<String>,
    /// Event timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Payload, `null` when absent.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Priority, [`Priority::Normal`] when absent.
    pub priority: Option<Priority>,
    /// Schema version, 1 when absent.
    pub schema_version: Option<u32>,
    /// Correlation ID.
    pub correlation_id: Option<CorrelationId>,
}

impl TryFrom<RawEvent> for Event {
    type Error = InvalidEventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let name = raw.name.ok_or(InvalidEventError::MissingName)?;
        let name = EventName::parse(&name)?;
        let timestamp = raw.timestamp.ok_or(InvalidEventError::MissingTimestamp)?;
        Ok(Self {
            name,
            timestamp,
            payload: raw.payload,
            priority: raw.priority.unwrap_or_default(),
            schema_version: raw.schema_version.unwrap_or(1),
            correlation_id: raw.correlation_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_expose_segments() {
        let name = EventName::parse("guild.member.joined").unwrap();
        assert_eq!(name.domain(), "guild");
        assert_eq!(name.entity(), "member");
        assert_eq!(name.action(), "joined");
    }

    #[test]
    fn grammar_violations_are_rejected() {
        assert_eq!(EventName::parse(""), Err(InvalidEventError::MissingName));
        for bad in ["guild.member", "guild.member.joined.late", "guild..joined", "Guild.member.joined", "guild.member.join-ed"] {
            assert!(
                matches!(EventName::parse(bad), Err(InvalidEventError::MalformedName { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn priorities_order_low_to_critical() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn raw_event_requires_name_and_timestamp() {
        let missing_name = RawEvent {
            timestamp: Some(Utc::now()),
            ..RawEvent::default()
        };
        assert_eq!(Event::try_from(missing_name), Err(InvalidEventError::MissingName));

        let missing_ts = RawEvent {
            name: Some("combat.round.ended".to_owned()),
            ..RawEvent::default()
        };
        assert_eq!(Event::try_from(missing_ts), Err(InvalidEventError::MissingTimestamp));
    }

    #[test]
    fn event_name_deserialization_validates() {
        let bad: Result<EventName, _> = serde_json::from_str("\"not-an-event\"");
        assert!(bad.is_err());
        let good: EventName = serde_json::from_str("\"economy.ledger.credited\"").unwrap();
        assert_eq!(good.as_str(), "economy.ledger.credited");
    }
}
