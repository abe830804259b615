// Request verbs

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// The reserved token standing for "any verb".
pub const ANY_VERB: &str = "*";

/// An HTTP-like method token, or the wildcard `*`.
///
/// Tokens are compared as given; `get` and `GET` are different verbs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verb(String);

impl Verb {
    pub fn new(token: impl Into<String>) -> Self {
        Verb(token.into())
    }

    /// The wildcard verb.
    pub fn any() -> Self {
        Verb(ANY_VERB.to_string())
    }

    pub fn is_any(&self) -> bool {
        self.0 == ANY_VERB
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lookup order for annotations: the verb itself, then the wildcard.
    ///
    /// A wildcard request only consults wildcard entries once.
    pub fn with_fallback(&self) -> impl Iterator<Item = &str> {
        let fallback = if self.is_any() { None } else { Some(ANY_VERB) };
        std::iter::once(self.as_str()).chain(fallback)
    }
}

impl Default for Verb {
    fn default() -> Self {
        Verb::any()
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Verb {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Verb {
    fn from(token: &str) -> Self {
        Verb::new(token)
    }
}

impl From<String> for Verb {
    fn from(token: String) -> Self {
        Verb(token)
    }
}

impl From<&Verb> for Verb {
    fn from(verb: &Verb) -> Self {
        verb.clone()
    }
}
