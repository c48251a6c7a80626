//! Image tag handling.
//!
//! A tag is the pair `repository:name`, unique within one configuration.
//! It identifies both buildable nodes and externally pulled images.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A human-readable image identifier, rendered as `repository:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageTag {
    /// Repository part, before the colon.
    pub repository: String,
    /// Name part, after the colon.
    pub name: String,
}

impl ImageTag {
    /// Builds a tag from its two halves, trimming stray whitespace the way
    /// hand-edited configuration files tend to accumulate it.
    pub fn new(repository: &str, name: &str) -> Result<Self> {
        let repository = repository.trim().to_string();
        let name = name.trim().to_string();
        if repository.is_empty() || name.is_empty() {
            return Err(Error::Config(
                "repository and tag are both required".to_string(),
            ));
        }
        Ok(Self { repository, name })
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.name)
    }
}

impl FromStr for ImageTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.split_once(':') {
            Some((repo, name)) => ImageTag::new(repo, name),
            None => Err(Error::Config(format!(
                "can't understand image name '{trimmed}', expected something like foo:bar"
            ))),
        }
    }
}
