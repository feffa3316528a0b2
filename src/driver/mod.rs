//! Automation driver boundary
//!
//! The verification core never talks to a browser directly. It consumes the
//! small `Driver` surface below, which backends implement over whatever
//! automation library they wrap (`CdpDriver` over headless Chrome, or the
//! scripted `MemoryDriver` used in tests).

pub mod memory;

pub use memory::MemoryDriver;

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

/// Opaque identifier of a browsing context (tab or window).
///
/// Ids are ordered lexicographically; the switch protocol relies on that order
/// to pick a context deterministically when several open at once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Operations the verification core needs from a browser-automation backend.
///
/// Methods take `&self` so that caller-supplied closures (triggers,
/// extractors, verifications) can share the driver with the core.
/// Implementations serialize access internally; the core itself never issues
/// two operations at once.
pub trait Driver {
    /// All currently open contexts
    fn list_contexts(&self) -> Result<BTreeSet<ContextId>>;

    /// The context subsequent commands are directed to
    fn current_context(&self) -> Result<ContextId>;

    /// Direct subsequent commands to `id`
    fn switch_to(&self, id: &ContextId) -> Result<()>;

    /// Close `id`. Closing the current context leaves no current context
    /// until the next `switch_to`.
    fn close(&self, id: &ContextId) -> Result<()>;

    /// Location of the current context
    fn current_location(&self) -> Result<Url>;

    /// Go back one entry in the current context's history
    fn navigate_back(&self) -> Result<()>;
}

/// Parse a location string reported by a backend.
pub(crate) fn parse_location(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| crate::Error::DriverError(format!("Invalid location '{}': {}", raw, e)))
}
