//! Language tags.
//!
//! UniVoice works with BCP-47-style short tags (`en`, `ja`, `zh`, ...). The
//! pair is chosen once per session; changing it requires a pipeline restart.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A short language tag, lowercase ASCII (e.g. `en`, `ja`, `multi`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    /// Parse and normalize a tag. Accepts 2-8 lowercase letters with an
    /// optional region subtag (`pt-br`); anything else is rejected.
    pub fn parse(tag: &str) -> Result<Self> {
        let normalized = tag.trim().to_ascii_lowercase();
        let valid = !normalized.is_empty()
            && normalized.len() <= 12
            && normalized
                .split('-')
                .all(|part| !part.is_empty() && part.len() <= 8 && part.chars().all(|c| c.is_ascii_alphanumeric()));
        if !valid {
            return Err(Error::InvalidLanguage(tag.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The provider tag used for multilingual streams.
    pub fn multi() -> Self {
        Self("multi".to_string())
    }

    pub fn is_multi(&self) -> bool {
        self.0 == "multi"
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
