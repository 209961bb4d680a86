//! Data-driven condition predicates for behavior trees.
//!
//! Predicates read a [`Situation`] and nothing else. Numeric comparisons
//! against a fact that is absent evaluate to `false`.

use serde::{Deserialize, Serialize};

use guildhall_types::Situation;

/// A pure test over a [`Situation`].
///
/// Serialized externally tagged, so a tree definition reads naturally:
///
/// ```yaml
/// condition:
///   all:
///     - flag: in_combat
///     - fact_below: { key: health, value: 30 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// `fact >= value`.
    FactAtLeast {
        /// Fact name.
        key: String,
        /// Inclusive lower bound.
        value: i64,
    },
    /// `fact < value`.
    FactBelow {
        /// Fact name.
        key: String,
        /// Exclusive upper bound.
        value: i64,
    },
    /// `fact == value`.
    FactEquals {
        /// Fact name.
        key: String,
        /// Expected value.
        value: i64,
    },
    /// The named flag is set.
    Flag(String),
    /// Negation.
    Not(Box<Predicate>),
    /// Every inner predicate holds. Empty is `true`.
    All(Vec<Predicate>),
    /// At least one inner predicate holds. Empty is `false`.
    Any(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against `situation`.
    pub fn evaluate(&self, situation: &Situation) -> bool {
        match self {
            Self::FactAtLeast { key, value } => situation.fact(key).is_some_and(|f| f >= *value),
            Self::FactBelow { key, value } => situation.fact(key).is_some_and(|f| f < *value),
            Self::FactEquals { key, value } => situation.fact(key) == Some(*value),
            Self::Flag(name) => situation.has_flag(name),
            Self::Not(inner) => !inner.evaluate(situation),
            Self::All(inner) => inner.iter().all(|p| p.evaluate(situation)),
            Self::Any(inner) => inner.iter().any(|p| p.evaluate(situation)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guildhall_types::{NpcId, SituationClass};

    use super::*;

    fn situation() -> Situation {
        Situation::new(NpcId::new(), SituationClass::Combat, 1)
            .with_fact("enemies", 2)
            .with_flag("in_combat")
            .with_volatile("health", 20)
    }

    #[test]
    fn comparisons_read_facts_and_volatile_facts() {
        let s = situation();
        assert!(Predicate::FactAtLeast { key: "enemies".into(), value: 2 }.evaluate(&s));
        assert!(Predicate::FactBelow { key: "health".into(), value: 30 }.evaluate(&s));
        assert!(!Predicate::FactEquals { key: "enemies".into(), value: 3 }.evaluate(&s));
        assert!(!Predicate::FactAtLeast { key: "missing".into(), value: i64::MIN }.evaluate(&s));
    }

    #[test]
    fn combinators() {
        let s = situation();
        let flag = Predicate::Flag("in_combat".into());
        assert!(Predicate::All(vec![flag.clone(), Predicate::Not(Box::new(Predicate::Flag("fled".into())))]).evaluate(&s));
        assert!(!Predicate::Not(Box::new(flag)).evaluate(&s));
        assert!(Predicate::All(Vec::new()).evaluate(&s));
        assert!(!Predicate::Any(Vec::new()).evaluate(&s));
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = "all:\n  - flag: in_combat\n  - fact_below: { key: health, value: 30 }\n";
        let predicate: Predicate = serde_yml::from_str(yaml).unwrap();
        assert!(predicate.evaluate(&situation()));
    }
}
