//! Categorical values, including the reserved star value.

use serde::{Deserialize, Serialize};
use std::fmt;

const STAR: &str = "*";

/// A categorical value of a grid attribute.
///
/// The star value is a distinguished symbol standing for "unseen value" or
/// "catch-all"; it belongs to exactly one part of a grouped attribute, the
/// default part. The string `"*"` is reserved for it.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Symbol(String);

impl Symbol {
    /// Constructs a symbol from its textual value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the reserved star value.
    #[must_use]
    pub fn star() -> Self {
        Self(STAR.to_string())
    }

    /// Returns `true` if this is the star value.
    #[must_use]
    pub fn is_star(&self) -> bool {
        self.0 == STAR
    }

    /// Returns the textual value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
