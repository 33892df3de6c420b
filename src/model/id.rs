//! Task identifiers.
//!
//! A [`TaskId`] is a short opaque handle of the form `trak-` followed by six
//! lowercase hex characters (e.g. `trak-3fa9c1`). Ids are generated randomly
//! at creation time; commands may also address a task by a unique suffix,
//! which the store resolves before the id reaches this type.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix shared by every task id.
pub const ID_PREFIX: &str = "trak-";

/// Number of hex characters after the prefix.
const HEX_LEN: usize = 6;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A validated task identifier: `trak-` + six lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Create a new `TaskId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error unless the string is `trak-` followed by exactly six
    /// lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, IdError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..HEX_LEN)
            .map(|_| {
                let n: u8 = rng.random_range(0..16);
                char::from_digit(u32::from(n), 16).unwrap_or('0')
            })
            .collect();
        Self(format!("{ID_PREFIX}{suffix}"))
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), IdError> {
        let Some(hex) = s.strip_prefix(ID_PREFIX) else {
            return Err(IdError {
                value: s.to_owned(),
                reason: format!("must start with '{ID_PREFIX}'"),
            });
        };
        if hex.len() != HEX_LEN {
            return Err(IdError {
                value: s.to_owned(),
                reason: format!("expected {HEX_LEN} hex characters after the prefix"),
            });
        }
        if !hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(IdError {
                value: s.to_owned(),
                reason: "suffix must be lowercase hex (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// IdError
// ---------------------------------------------------------------------------

/// A task id failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdError {
    /// The value that failed validation.
    pub value: String,
    /// Why it failed.
    pub reason: String,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task id '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for IdError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_ids() {
        for _ in 0..64 {
            let id = TaskId::generate();
            assert!(TaskId::new(id.as_str()).is_ok(), "bad id: {id}");
        }
    }

    #[test]
    fn accepts_well_formed_id() {
        let id = TaskId::new("trak-0af9c1").expect("valid id");
        assert_eq!(id.as_str(), "trak-0af9c1");
        assert_eq!(format!("{id}"), "trak-0af9c1");
    }

    #[test]
    fn rejects_missing_prefix() {
        let err = TaskId::new("task-0af9c1").unwrap_err();
        assert!(err.reason.contains("trak-"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(TaskId::new("trak-0af9c").is_err());
        assert!(TaskId::new("trak-0af9c12").is_err());
    }

    #[test]
    fn rejects_uppercase_hex() {
        assert!(TaskId::new("trak-0AF9C1").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(TaskId::new("trak-0az9c1").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let id = TaskId::new("trak-123abc").expect("valid id");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"trak-123abc\"");
        let back: TaskId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn serde_rejects_invalid() {
        let res: Result<TaskId, _> = serde_json::from_str("\"nope\"");
        assert!(res.is_err());
    }
}
