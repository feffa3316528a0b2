//! Context switch protocol
//!
//! `with_new_context` runs a trigger that is expected to open a new browsing
//! context (an outbound link with `target=_blank`), switches into whatever
//! opened, runs a verification there and then always closes what was opened
//! and switches back to the origin. Sites differ in whether outbound links
//! open a new tab or navigate in place, so when no context appears but the
//! origin's location changed the verification runs in place instead, and the
//! origin is navigated back afterwards.
//!
//! Post-condition, whether the verification passes, fails, returns an error
//! or panics: the origin is current and no context opened by the trigger is
//! left open.

use crate::driver::{ContextId, Driver};
use crate::outcome::VerificationOutcome;
use crate::poll::{location_is, wait_until, Outcome, WaitDirective};
use crate::registry::{ContextDiff, ContextRegistry, ContextSnapshot};
use crate::{Error, Result, VerifyConfig};
use log::{debug, warn};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;
use url::Url;

/// How the trigger navigated
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Navigation {
    /// A new context opened; `id` was verified, `extra` were only closed
    NewContext { id: ContextId, extra: Vec<ContextId> },
    /// No context opened; the origin itself moved from `from` to `to`
    SameContext { from: Url, to: Url },
}

/// Result of one protocol run
#[derive(Debug, Clone, Serialize)]
pub struct ContextVerification {
    pub navigation: Navigation,
    pub outcome: VerificationOutcome,
}

impl ContextVerification {
    pub fn success(&self) -> bool {
        self.outcome.success
    }
}

/// Timing and restoration knobs for a protocol run
#[derive(Debug, Clone, Copy)]
pub struct SwitchOptions {
    /// Budget for a new context to appear
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Navigate the origin back after a same-context navigation
    pub restore_same_context: bool,
}

impl SwitchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&VerifyConfig> for SwitchOptions {
    fn from(config: &VerifyConfig) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            restore_same_context: config.restore_same_context,
        }
    }
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self::from(&VerifyConfig::default())
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R>) -> thread::Result<Result<R>> {
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Combine the guarded verification with the teardown result. Teardown has
/// already run by the time this is called.
fn settle<R>(verified: thread::Result<Result<R>>, teardown: Result<()>) -> Result<R> {
    match verified {
        Err(payload) => {
            if let Err(e) = teardown {
                warn!("Teardown after panic failed: {}", e);
            }
            panic::resume_unwind(payload)
        }
        Ok(Err(e)) => {
            if let Err(te) = teardown {
                warn!("Teardown after failed verification also failed: {}", te);
            }
            Err(e)
        }
        Ok(Ok(value)) => {
            teardown?;
            Ok(value)
        }
    }
}

/// Close every spawned context, then switch back to the origin. Every step is
/// attempted; the first error is returned.
fn close_spawned<D: Driver + ?Sized>(
    driver: &D,
    registry: &mut ContextRegistry,
    origin: &ContextId,
    spawned: &[ContextId],
) -> Result<()> {
    let mut first_err = None;
    for id in spawned {
        if let Err(e) = registry.close(driver, id) {
            warn!("Failed to close context {}: {}", id, e);
            first_err.get_or_insert(e);
        }
    }
    if let Err(e) = registry.switch_to(driver, origin) {
        warn!("Failed to switch back to origin {}: {}", origin, e);
        first_err.get_or_insert(e);
    }
    first_err.map_or(Ok(()), Err)
}

/// Navigate the origin back to where it started and wait until it gets there.
fn restore_location<D: Driver + ?Sized>(
    driver: &D,
    registry: &mut ContextRegistry,
    origin: &ContextId,
    origin_location: &Url,
    options: &SwitchOptions,
) -> Result<()> {
    registry.switch_to(driver, origin)?;
    if !options.restore_same_context {
        return Ok(());
    }
    driver.navigate_back()?;
    let directive = WaitDirective::new(location_is(driver, origin_location), options.timeout, options.poll_interval)?
        .describe(format!("origin to return to {}", origin_location));
    wait_until(directive)
}

fn spawned_since<D: Driver + ?Sized>(driver: &D, before: &ContextSnapshot) -> Result<ContextDiff> {
    let after = ContextSnapshot::capture(driver, before.origin())?;
    Ok(before.diff(&after))
}

/// Run `trigger`, verify the context it opens, and restore `origin`.
///
/// When several contexts open at once the lowest-sorting id is verified and
/// all of them are closed. Fails with `ContextSwitchTimeout` when nothing
/// opened and the origin did not navigate within `options.timeout`.
pub fn with_new_context<D, T, V>(
    driver: &D,
    registry: &mut ContextRegistry,
    origin: &ContextId,
    trigger: T,
    verify: V,
    options: &SwitchOptions,
) -> Result<ContextVerification>
where
    D: Driver + ?Sized,
    T: FnOnce(&D) -> Result<()>,
    V: FnOnce(&D, &ContextId) -> Result<VerificationOutcome>,
{
    if registry.reset(driver)? != *origin {
        registry.switch_to(driver, origin)?;
    }
    let before = ContextSnapshot::capture(driver, origin)?;
    let origin_location = driver.current_location()?;

    match guarded(|| trigger(driver)) {
        Ok(Ok(())) => {}
        failed => {
            // Whatever the trigger managed to open before failing still gets closed.
            let spawned = match spawned_since(driver, &before) {
                Ok(diff) => diff.new_contexts().to_vec(),
                Err(e) => {
                    warn!("Cannot list contexts after failed trigger; nothing will be closed: {}", e);
                    Vec::new()
                }
            };
            let teardown = close_spawned(driver, registry, origin, &spawned);
            settle(failed, teardown)?;
        }
    }

    let directive = WaitDirective::new(
        || {
            let diff = spawned_since(driver, &before)?;
            if diff.is_empty() {
                Ok(Outcome::NotYet(format!("{} context(s) open, none new", before.len())))
            } else {
                Ok(Outcome::Ready(diff))
            }
        },
        options.timeout,
        options.poll_interval,
    )?
    .describe(format!("a new context opened from {}", origin));

    let diff = match wait_until(directive) {
        Ok(diff) => diff,
        Err(Error::Timeout { .. }) => {
            // One last look, so a context that opened at the deadline is not leaked.
            let late = spawned_since(driver, &before)?;
            if late.is_empty() {
                let location = driver.current_location()?;
                if location == origin_location {
                    return Err(Error::ContextSwitchTimeout {
                        origin: origin.clone(),
                        timeout_ms: options.timeout.as_millis() as u64,
                        contexts: before.contexts().iter().cloned().collect(),
                    });
                }
                return verify_in_place(driver, registry, origin, origin_location, location, verify, options);
            }
            late
        }
        Err(e) => return Err(e),
    };

    let spawned = diff.new_contexts().to_vec();
    let selected = match diff.select() {
        Some(id) => id.clone(),
        None => return Err(Error::Other("new context set unexpectedly empty".into())),
    };
    if spawned.len() > 1 {
        warn!(
            "{} contexts opened from {}; verifying {} and closing all",
            spawned.len(),
            origin,
            selected
        );
    }

    let verified = guarded(|| {
        registry.switch_to(driver, &selected)?;
        verify(driver, &selected)
    });
    let teardown = close_spawned(driver, registry, origin, &spawned);
    let outcome = settle(verified, teardown)?;
    debug!(
        "Verification in {} {}: {}",
        selected,
        if outcome.success { "passed" } else { "failed" },
        outcome.diagnostic
    );

    Ok(ContextVerification {
        navigation: Navigation::NewContext {
            id: selected,
            extra: spawned.into_iter().skip(1).collect(),
        },
        outcome,
    })
}

fn verify_in_place<D, V>(
    driver: &D,
    registry: &mut ContextRegistry,
    origin: &ContextId,
    origin_location: Url,
    location: Url,
    verify: V,
    options: &SwitchOptions,
) -> Result<ContextVerification>
where
    D: Driver + ?Sized,
    V: FnOnce(&D, &ContextId) -> Result<VerificationOutcome>,
{
    debug!("No new context from {}; origin navigated to {}", origin, location);
    let verified = guarded(|| verify(driver, origin));
    let teardown = restore_location(driver, registry, origin, &origin_location, options);
    let outcome = settle(verified, teardown)?;
    Ok(ContextVerification {
        navigation: Navigation::SameContext {
            from: origin_location,
            to: location,
        },
        outcome,
    })
}

/// Verify that `trigger` leads to a location containing `expected`
/// (case-insensitive), in a new context or in place.
pub fn verify_outbound_link<D, T>(
    driver: &D,
    registry: &mut ContextRegistry,
    origin: &ContextId,
    trigger: T,
    expected: &str,
    options: &SwitchOptions,
) -> Result<ContextVerification>
where
    D: Driver + ?Sized,
    T: FnOnce(&D) -> Result<()>,
{
    let needle = expected.to_lowercase();
    let verify = |d: &D, _ctx: &ContextId| -> Result<VerificationOutcome> {
        // A fresh tab reports about:blank until the first load commits.
        let directive = WaitDirective::new(
            || {
                let location = d.current_location()?;
                if location.as_str().to_lowercase().contains(&needle) {
                    Ok(Outcome::Ready(location))
                } else {
                    Ok(Outcome::NotYet(location.to_string()))
                }
            },
            options.timeout,
            options.poll_interval,
        )?
        .describe(format!("location containing '{}'", expected));

        match wait_until(directive) {
            Ok(location) => Ok(VerificationOutcome::pass(format!("{} contains '{}'", location, expected))
                .with_sequences(Vec::new(), vec![location.to_string()])),
            Err(Error::Timeout { last_reason, .. }) => Ok(VerificationOutcome::fail(format!(
                "location {} does not contain '{}'",
                last_reason, expected
            ))
            .with_sequences(Vec::new(), vec![last_reason])),
            Err(e) => Err(e),
        }
    };
    with_new_context(driver, registry, origin, trigger, verify, options)
}
