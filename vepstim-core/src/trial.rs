use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single condition parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionValue::Bool(b) => write!(f, "{b}"),
            ConditionValue::Int(i) => write!(f, "{i}"),
            ConditionValue::Float(x) => write!(f, "{x}"),
            ConditionValue::Text(s) => f.write_str(s),
        }
    }
}

/// Named parameters of one trial type, looked up explicitly by name.
pub type Conditions = BTreeMap<String, ConditionValue>;

/// Bookkeeping for the trial currently running.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialInfo {
    /// Repetition number, from 0.
    pub rep: usize,
    /// Position within the repetition, from 0.
    pub trial_in_rep: usize,
    /// Overall trial number, from 0.
    pub n: usize,
    /// Index of the condition row in the configured list.
    pub index: usize,
    pub conditions: Conditions,
}

impl TrialInfo {
    pub fn get(&self, name: &str) -> Option<&ConditionValue> {
        self.conditions.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_parse_untagged() {
        let c: Conditions = toml::from_str("ori = 45\ncontrast = 0.5\nlabel = \"left\"\nflag = true\n")
            .unwrap();
        assert_eq!(c["ori"], ConditionValue::Int(45));
        assert_eq!(c["contrast"], ConditionValue::Float(0.5));
        assert_eq!(c["label"].to_string(), "left");
        assert_eq!(c["flag"], ConditionValue::Bool(true));
    }
}
