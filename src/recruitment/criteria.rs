//! Name-based eligibility criteria
//!
//! Puppets and throwaway nations are cheap to spot from the name alone:
//! keyboard-mash names of one repeated character, numbered names and a short
//! denylist of words.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::utils::to_id;

fn denylist() -> &'static Regex {
    static DENYLIST: OnceLock<Regex> = OnceLock::new();

    DENYLIST.get_or_init(|| {
        Regex::new(r"(?i)(puppet|founder|shit|damn|facist|facism|nazi|hitler)")
            .expect("Invalid regex pattern")
    })
}

/// Why a name was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    ContainsDigit,
    RepeatedCharacter,
    Denylisted(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => f.write_str("empty name"),
            Rejection::ContainsDigit => f.write_str("name contains a digit"),
            Rejection::RepeatedCharacter => f.write_str("name is one repeated character"),
            Rejection::Denylisted(word) => write!(f, "name contains '{word}'"),
        }
    }
}

/// Eligibility filter applied before any API call
#[derive(Debug, Clone, Copy)]
pub struct Criteria {
    enabled: bool,
}

impl Criteria {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check a name; disabled criteria accept everything
    pub fn check(&self, name: &str) -> Result<(), Rejection> {
        if !self.enabled {
            return Ok(());
        }

        let id = to_id(name);
        let mut chars = id.chars();
        let Some(first) = chars.next() else {
            return Err(Rejection::Empty);
        };

        if id.chars().any(|c| c.is_ascii_digit()) {
            return Err(Rejection::ContainsDigit);
        }

        if chars.all(|c| c == first) {
            return Err(Rejection::RepeatedCharacter);
        }

        if let Some(found) = denylist().find(&id) {
            return Err(Rejection::Denylisted(found.as_str().to_lowercase()));
        }

        Ok(())
    }

    pub fn is_eligible(&self, name: &str) -> bool {
        self.check(name).is_ok()
    }
}

impl Default for Criteria {
    fn default() -> Self {
        Self::new(true)
    }
}
