use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

const MAX_IDENTIFIER_LEN: usize = 64;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("invalid class name `{0}`: must be 1-64 chars, letter or underscore first, then letters, digits or underscores")]
    InvalidClassName(String),
    #[error("invalid username `{0}`: must be 1-64 chars of letters, digits, `_`, `-` or `.`")]
    InvalidUsername(String),
}

/// Class identifier. Doubles as the SQL table name for that class, so
/// construction is restricted to identifier-safe characters.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ClassName(String);

impl ClassName {
    /// Validate and wrap a class name.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidClassName` when the name is empty, too
    /// long, or contains anything outside `[A-Za-z0-9_]` (first char must
    /// not be a digit).
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let mut chars = value.chars();
        let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if value.len() > MAX_IDENTIFIER_LEN || !valid_first || !valid_rest {
            return Err(CoreError::InvalidClassName(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClassName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ClassName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClassName> for String {
    fn from(value: ClassName) -> Self {
        value.0
    }
}

/// External-site username. Interpolated into the profile URL as a path
/// segment, so the alphabet is restricted accordingly.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and wrap a username.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidUsername` when the value is empty, too
    /// long, is `.` or `..`, or contains anything outside
    /// `[A-Za-z0-9_.-]`.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let valid = !value.is_empty()
            && value.len() <= MAX_IDENTIFIER_LEN
            && value != "."
            && value != ".."
            && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(CoreError::InvalidUsername(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// One student row as stored in a class table.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StudentScore {
    pub seq_no: i64,
    pub username: Username,
    pub roll_no: String,
    pub previous_week: u32,
    pub recent_week: u32,
    pub count: i64,
}

/// The three numeric fields written back after a scrape.
///
/// Built only through [`ScoreUpdate::from_counts`] so that
/// `count == recent_week - previous_week` holds by construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScoreUpdate {
    pub previous_week: u32,
    pub recent_week: u32,
    pub count: i64,
}

impl ScoreUpdate {
    /// Roll the current recent count into previous and record the fetched
    /// count as recent. The delta may be negative when the remote total
    /// shrinks (deleted submissions).
    #[must_use]
    pub fn from_counts(current_recent: u32, fetched: u32) -> Self {
        Self {
            previous_week: current_recent,
            recent_week: fetched,
            count: i64::from(fetched) - i64::from(current_recent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_accepts_identifier_shapes() {
        for name in ["CSE_A", "cse_b", "_staging", "Year2026"] {
            if ClassName::parse(name).is_err() {
                panic!("expected `{name}` to be a valid class name");
            }
        }
    }

    #[test]
    fn class_name_rejects_sql_meta_and_misc() {
        for name in ["", "CSE A", "CSE-A", "1A", "a\"; DROP TABLE x; --", "sqlite_master; --", "über"] {
            if ClassName::parse(name).is_ok() {
                panic!("expected `{name}` to be rejected as a class name");
            }
        }
    }

    #[test]
    fn class_name_rejects_overlong_values() {
        let name = "c".repeat(65);
        if ClassName::parse(&name).is_ok() {
            panic!("expected 65-char class name to be rejected");
        }
    }

    #[test]
    fn username_accepts_profile_handles() {
        for name in ["alice", "hari22891a6708", "sai_aashrith", "a.b-c"] {
            if Username::parse(name).is_err() {
                panic!("expected `{name}` to be a valid username");
            }
        }
    }

    #[test]
    fn username_rejects_path_breaking_values() {
        for name in ["", ".", "..", "a/b", "a b", "a?b", "a#b"] {
            if Username::parse(name).is_ok() {
                panic!("expected `{name}` to be rejected as a username");
            }
        }
    }

    #[test]
    fn serde_round_trip_enforces_validation() {
        let class: Result<ClassName, _> = serde_json::from_str("\"CSE_A\"");
        if class.is_err() {
            panic!("valid class name should deserialize");
        }
        let bad: Result<ClassName, _> = serde_json::from_str("\"CSE A\"");
        if bad.is_ok() {
            panic!("invalid class name should fail to deserialize");
        }
    }

    #[test]
    fn score_update_rolls_recent_into_previous() {
        let update = ScoreUpdate::from_counts(15, 20);
        assert_eq!(update.previous_week, 15);
        assert_eq!(update.recent_week, 20);
        assert_eq!(update.count, 5);
    }

    #[test]
    fn score_update_allows_negative_delta() {
        let update = ScoreUpdate::from_counts(30, 12);
        assert_eq!(update.count, -18);
        assert_eq!(
            update.count,
            i64::from(update.recent_week) - i64::from(update.previous_week)
        );
    }
}
