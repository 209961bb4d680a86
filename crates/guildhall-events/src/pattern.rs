//! Subscription patterns.

use crate::error::InvalidEventError;
use crate::event::EventName;

/// Which event names a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Every event (`*`).
    All,
    /// Events whose leading segments equal the stored ones (`guild.*`,
    /// `guild.member.*`).
    Prefix(Vec<String>),
    /// Exactly one name.
    Exact(EventName),
}

impl Pattern {
    /// Parse `*`, `domain.*`, `domain.entity.*`, or an exact event name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEventError::MalformedPattern`] when the pattern is
    /// none of the above.
    pub fn parse(pattern: &str) -> Result<Self, InvalidEventError> {
        if pattern == "*" {
            return Ok(Self::All);
        }
        let malformed = || InvalidEventError::MalformedPattern {
            pattern: pattern.to_owned(),
        };

        if let Some(prefix) = pattern.strip_suffix(".*") {
            let segments: Vec<String> = prefix.split('.').map(str::to_owned).collect();
            if segments.is_empty() || segments.len() > 2 || segments.iter().any(String::is_empty) {
                return Err(malformed());
            }
            // Validate the prefix segments with the same grammar as names by
            // padding to three segments.
            let mut padded = segments.clone();
            padded.resize(3, "x".to_owned());
            EventName::parse(&padded.join(".")).map_err(|_err| malformed())?;
            return Ok(Self::Prefix(segments));
        }

        EventName::parse(pattern)
            .map(Self::Exact)
            .map_err(|_err| malformed())
    }

    /// Whether `name` is delivered to this pattern.
    pub fn matches(&self, name: &EventName) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => exact == name,
            Self::Prefix(segments) => segments
                .iter()
                .zip(name.as_str().split('.'))
                .all(|(want, have)| want == have),
        }
    }
}

impl core::fmt::Display for Pattern {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Prefix(segments) => write!(f, "{}.*", segments.join(".")),
            Self::Exact(name) => write!(f, "{name}"),
        }
    }
}
