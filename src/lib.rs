//! RFox Verify
//!
//! The verification core shared by browser-driven UI test suites: bounded
//! condition polling, verification of links that open a new tab, and an
//! oracle for sort controls that tolerates the re-render race.
//!
//! # Features
//!
//! - **Driver-agnostic**: everything runs against the small `Driver` trait;
//!   `MemoryDriver` is a scripted in-memory implementation for tests
//! - **CDP Backend** (`cdp` feature): `CdpDriver` over headless Chrome
//! - **Cleanup guaranteed**: the tab-switch protocol always closes what it
//!   opened and restores the original tab, even when the verification panics
//!
//! # Example
//!
//! ```
//! use rfverify::{Driver, MemoryDriver, Verifier, VerifyConfig, VerificationOutcome};
//!
//! # fn main() -> rfverify::Result<()> {
//! let driver = MemoryDriver::new("https://shop.test/inventory.html")?;
//! let config = VerifyConfig { timeout_ms: 500, poll_interval_ms: 20, ..Default::default() };
//! let mut verifier = Verifier::new(driver, config)?;
//!
//! let checked = verifier.with_new_context(
//!     |d: &MemoryDriver| d.open_context("https://example.com/about").map(|_| ()),
//!     |d: &MemoryDriver, _ctx| {
//!         let location = d.current_location()?;
//!         Ok(if location.as_str().contains("example.com") {
//!             VerificationOutcome::pass("landed on example.com")
//!         } else {
//!             VerificationOutcome::fail(format!("landed on {}", location))
//!         })
//!     },
//! )?;
//! assert!(checked.success());
//! assert_eq!(verifier.driver().list_contexts()?.len(), 1);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod driver;
pub use driver::{ContextId, Driver, MemoryDriver};

#[cfg(feature = "cdp")]
pub mod cdp;

#[cfg(feature = "cdp")]
pub use cdp::CdpDriver;

pub mod oracle;
pub mod outcome;
pub mod poll;
pub mod registry;
pub mod switch;

pub use oracle::{verify_reorder, Direction, OrderingProbe};
pub use outcome::VerificationOutcome;
pub use poll::{any_of, wait_until, wait_until_async, Outcome, Predicate, WaitDirective};
pub use registry::{ContextDiff, ContextRegistry, ContextSnapshot};
pub use switch::{with_new_context, ContextVerification, Navigation, SwitchOptions};

/// Timing configuration for waits and verifications
///
/// The defaults match the explicit waits used throughout typical UI suites:
/// ten seconds, re-checked every half second.
///
/// # Examples
///
/// ```
/// let cfg = rfverify::VerifyConfig::default();
/// assert_eq!(cfg.timeout_ms, 10_000);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Budget for every wait in milliseconds
    pub timeout_ms: u64,
    /// Delay between predicate evaluations in milliseconds
    pub poll_interval_ms: u64,
    /// Navigate back after an outbound link opened in the same tab
    pub restore_same_context: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 500,
            restore_same_context: true,
        }
    }
}

impl VerifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check `0 < poll_interval < timeout`.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::ConfigError("poll_interval_ms must be positive".into()));
        }
        if self.poll_interval_ms >= self.timeout_ms {
            return Err(Error::ConfigError(format!(
                "poll_interval_ms ({}) must be less than timeout_ms ({})",
                self.poll_interval_ms, self.timeout_ms
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(format!("Malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// A driver bundled with its context registry and timing configuration.
///
/// The registry lives here and is only handed to the switch protocol, so the
/// current-context pointer has a single writer.
pub struct Verifier<D> {
    driver: D,
    registry: ContextRegistry,
    config: VerifyConfig,
}

impl<D: Driver> Verifier<D> {
    pub fn new(driver: D, config: VerifyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            driver,
            registry: ContextRegistry::new(),
            config,
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// The context the last protocol run left current
    pub fn current_context(&self) -> Option<&ContextId> {
        self.registry.current()
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Poll `predicate` with the configured timeout and interval.
    pub fn wait_for<T, F>(&self, description: &str, predicate: F) -> Result<T>
    where
        F: FnMut() -> Result<Outcome<T>>,
    {
        wait_until(WaitDirective::from_config(predicate, &self.config)?.describe(description))
    }

    /// Run the switch protocol from the driver's current context.
    pub fn with_new_context<T, V>(&mut self, trigger: T, verify: V) -> Result<ContextVerification>
    where
        T: FnOnce(&D) -> Result<()>,
        V: FnOnce(&D, &ContextId) -> Result<VerificationOutcome>,
    {
        let origin = self.driver.current_context()?;
        let options = SwitchOptions::from(&self.config);
        switch::with_new_context(&self.driver, &mut self.registry, &origin, trigger, verify, &options)
    }

    /// Run the switch protocol from an explicit origin with its own timeout.
    pub fn with_new_context_from<T, V>(
        &mut self,
        origin: &ContextId,
        trigger: T,
        verify: V,
        timeout: Duration,
    ) -> Result<ContextVerification>
    where
        T: FnOnce(&D) -> Result<()>,
        V: FnOnce(&D, &ContextId) -> Result<VerificationOutcome>,
    {
        let options = SwitchOptions::from(&self.config).with_timeout(timeout);
        switch::with_new_context(&self.driver, &mut self.registry, origin, trigger, verify, &options)
    }

    /// Check that `trigger` leads somewhere whose location contains `expected`.
    pub fn verify_outbound_link<T>(&mut self, trigger: T, expected: &str) -> Result<ContextVerification>
    where
        T: FnOnce(&D) -> Result<()>,
    {
        let origin = self.driver.current_context()?;
        let options = SwitchOptions::from(&self.config);
        switch::verify_outbound_link(&self.driver, &mut self.registry, &origin, trigger, expected, &options)
    }

    /// Run the ordering oracle with the configured timing.
    pub fn verify_reorder<V, E, C, A>(
        &self,
        probe: &mut OrderingProbe<E, C>,
        action: A,
    ) -> Result<VerificationOutcome<V>>
    where
        V: Clone + PartialEq + Debug,
        E: FnMut() -> Result<Vec<V>>,
        C: Fn(&V, &V) -> Ordering,
        A: FnOnce() -> Result<()>,
    {
        oracle::verify_reorder(probe, action, self.config.timeout(), self.config.poll_interval())
    }
}
