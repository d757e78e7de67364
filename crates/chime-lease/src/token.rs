//! Holder tokens.

use std::fmt;
use std::sync::OnceLock;

use uuid::Uuid;

static PROCESS_TOKEN: OnceLock<HolderToken> = OnceLock::new();

/// Opaque proof of lease ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HolderToken(String);

impl HolderToken {
    /// The token for this process.
    ///
    /// Generated on first use and stable for the lifetime of the process, so
    /// extension and release always match what was presented at acquisition.
    pub fn process() -> &'static HolderToken {
        PROCESS_TOKEN.get_or_init(HolderToken::random)
    }

    /// A fresh random token.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HolderToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HolderToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
