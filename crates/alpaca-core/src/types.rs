use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Progress of one (sample, step) pair.
///
/// Ordinals are stable and are what the tabular status report prints:
/// `UNPROCESSED=0, DISTRIBUTED=1, COMPLETE=2, ERROR=3, ABANDONED=4`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Unprocessed,
    Distributed,
    Complete,
    Error,
    Abandoned,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Unprocessed,
        Status::Distributed,
        Status::Complete,
        Status::Error,
        Status::Abandoned,
    ];

    pub fn ordinal(self) -> u8 {
        match self {
            Status::Unprocessed => 0,
            Status::Distributed => 1,
            Status::Complete => 2,
            Status::Error => 3,
            Status::Abandoned => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unprocessed => "UNPROCESSED",
            Status::Distributed => "DISTRIBUTED",
            Status::Complete => "COMPLETE",
            Status::Error => "ERROR",
            Status::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown status {0:?}; expected one of UNPROCESSED, DISTRIBUTED, COMPLETE, ERROR, ABANDONED")]
pub struct StatusParseError(pub String);

impl FromStr for Status {
    type Err = StatusParseError;

    /// Case-insensitive. Also accepts the short worker spellings
    /// (`unprocess`, `distribute`, `abandon`) and bare ordinals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "UNPROCESSED" | "UNPROCESS" | "0" => Ok(Status::Unprocessed),
            "DISTRIBUTED" | "DISTRIBUTE" | "1" => Ok(Status::Distributed),
            "COMPLETE" | "2" => Ok(Status::Complete),
            "ERROR" | "3" => Ok(Status::Error),
            "ABANDONED" | "ABANDON" | "4" => Ok(Status::Abandoned),
            _ => Err(StatusParseError(s.to_string())),
        }
    }
}

/// One stage of the pipeline.
///
/// `upstream` is a set: duplicates are dropped when a definition is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub upstream: Vec<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, upstream: &[&str]) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.iter().map(|s| s.to_string()).collect(),
        }
    }
}
