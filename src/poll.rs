//! Condition polling
//!
//! `wait_until` evaluates a predicate immediately, then re-evaluates it every
//! `poll_interval` until it reports `Ready`, reports `Fatal`, or the timeout
//! elapses. Elapsed time is read from a monotonic clock, so a slow predicate
//! does not stretch the budget. The last sleep is capped at the remaining
//! budget, which keeps a timeout from firing later than
//! `timeout + poll_interval`.

use crate::driver::{ContextId, Driver};
use crate::{Error, Result, VerifyConfig};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};
use url::Url;

/// Result of a single predicate evaluation
#[derive(Debug)]
pub enum Outcome<T> {
    /// The condition holds; the wait resolves with this value
    Ready(T),
    /// The condition does not hold yet; poll again
    NotYet(String),
    /// The condition can never hold; abort the wait
    Fatal(Error),
}

impl<T> Outcome<T> {
    /// Fold a predicate result into an outcome. `Error::NotFound` is the
    /// "element not rendered yet" class and counts as `NotYet`.
    pub fn from_result(res: Result<Outcome<T>>) -> Self {
        match res {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => Outcome::NotYet(e.to_string()),
            Err(e) => Outcome::Fatal(e),
        }
    }
}

/// A bounded wait on one predicate.
pub struct WaitDirective<F> {
    predicate: F,
    timeout: Duration,
    poll_interval: Duration,
    description: String,
}

impl<F> WaitDirective<F> {
    /// Build a directive. Fails unless `0 < poll_interval < timeout`.
    pub fn new(predicate: F, timeout: Duration, poll_interval: Duration) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(Error::ConfigError("poll interval must be positive".into()));
        }
        if poll_interval >= timeout {
            return Err(Error::ConfigError(format!(
                "poll interval {:?} must be shorter than timeout {:?}",
                poll_interval, timeout
            )));
        }
        Ok(Self {
            predicate,
            timeout,
            poll_interval,
            description: "condition".to_string(),
        })
    }

    /// Build a directive from the configured timeout and poll interval.
    pub fn from_config(predicate: F, config: &VerifyConfig) -> Result<Self> {
        Self::new(predicate, config.timeout(), config.poll_interval())
    }

    /// Name the awaited condition for logs and timeout diagnostics.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn timed_out(&self, last_reason: String, elapsed: Duration) -> Error {
        warn!(
            "Gave up waiting for {} after {}ms: {}",
            self.description,
            elapsed.as_millis(),
            last_reason
        );
        Error::Timeout {
            waited_for: self.description.clone(),
            last_reason,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

fn fatal(e: Error) -> Error {
    match e {
        Error::FatalPredicate(_) => e,
        other => Error::FatalPredicate(Box::new(other)),
    }
}

/// Block until the directive's predicate is `Ready`.
pub fn wait_until<T, F>(mut directive: WaitDirective<F>) -> Result<T>
where
    F: FnMut() -> Result<Outcome<T>>,
{
    let start = Instant::now();
    debug!("Waiting up to {:?} for {}", directive.timeout, directive.description);

    let mut evaluations: u32 = 0;
    loop {
        evaluations += 1;
        let reason = match Outcome::from_result((directive.predicate)()) {
            Outcome::Ready(value) => {
                debug!(
                    "{} ready after {} evaluation(s) in {}ms",
                    directive.description,
                    evaluations,
                    start.elapsed().as_millis()
                );
                return Ok(value);
            }
            Outcome::Fatal(e) => return Err(fatal(e)),
            Outcome::NotYet(reason) => reason,
        };

        let elapsed = start.elapsed();
        if elapsed >= directive.timeout {
            return Err(directive.timed_out(reason, elapsed));
        }
        std::thread::sleep(directive.poll_interval.min(directive.timeout - elapsed));
    }
}

/// Async twin of `wait_until`, sleeping on the tokio timer.
pub async fn wait_until_async<T, F, Fut>(mut directive: WaitDirective<F>) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome<T>>>,
{
    let start = tokio::time::Instant::now();
    debug!("Waiting up to {:?} for {}", directive.timeout, directive.description);

    loop {
        let reason = match Outcome::from_result((directive.predicate)().await) {
            Outcome::Ready(value) => return Ok(value),
            Outcome::Fatal(e) => return Err(fatal(e)),
            Outcome::NotYet(reason) => reason,
        };

        let elapsed = start.elapsed();
        if elapsed >= directive.timeout {
            return Err(directive.timed_out(reason, elapsed));
        }
        tokio::time::sleep(directive.poll_interval.min(directive.timeout - elapsed)).await;
    }
}

// Stock predicates over the driver boundary.

/// Ready with the location once it contains `fragment`.
pub fn location_contains<'a, D: Driver + ?Sized>(
    driver: &'a D,
    fragment: &'a str,
) -> impl FnMut() -> Result<Outcome<Url>> + 'a {
    move || {
        let location = driver.current_location()?;
        if location.as_str().contains(fragment) {
            Ok(Outcome::Ready(location))
        } else {
            Ok(Outcome::NotYet(format!("location {} does not contain '{}'", location, fragment)))
        }
    }
}

/// Ready once the location equals `expected`.
pub fn location_is<'a, D: Driver + ?Sized>(
    driver: &'a D,
    expected: &'a Url,
) -> impl FnMut() -> Result<Outcome<()>> + 'a {
    move || {
        let location = driver.current_location()?;
        if &location == expected {
            Ok(Outcome::Ready(()))
        } else {
            Ok(Outcome::NotYet(format!("location is {}, expected {}", location, expected)))
        }
    }
}

/// Ready with the open contexts once there are at least `count` of them.
pub fn context_count_at_least<'a, D: Driver + ?Sized>(
    driver: &'a D,
    count: usize,
) -> impl FnMut() -> Result<Outcome<BTreeSet<ContextId>>> + 'a {
    move || {
        let contexts = driver.list_contexts()?;
        if contexts.len() >= count {
            Ok(Outcome::Ready(contexts))
        } else {
            Ok(Outcome::NotYet(format!("{} of {} contexts open", contexts.len(), count)))
        }
    }
}

// Combinators.

/// A boxed predicate, so conditions of different closure types can be mixed
/// in `any_of`.
pub type Predicate<'a, T> = Box<dyn FnMut() -> Result<Outcome<T>> + 'a>;

/// Ready with the first branch that is ready, evaluated in order.
///
/// `NotYet` carries every branch's reason joined with `"; "`. A `Fatal` in
/// any branch aborts the whole condition.
pub fn any_of<'a, T: 'a>(mut branches: Vec<Predicate<'a, T>>) -> impl FnMut() -> Result<Outcome<T>> + 'a {
    move || {
        let mut reasons = Vec::with_capacity(branches.len());
        for branch in branches.iter_mut() {
            match Outcome::from_result(branch()) {
                Outcome::Ready(value) => return Ok(Outcome::Ready(value)),
                Outcome::Fatal(e) => return Ok(Outcome::Fatal(e)),
                Outcome::NotYet(reason) => reasons.push(reason),
            }
        }
        if reasons.is_empty() {
            reasons.push("no conditions given".to_string());
        }
        Ok(Outcome::NotYet(reasons.join("; ")))
    }
}

/// Ready once `predicate` stops being ready.
///
/// A transient lookup failure inside `predicate` counts as "not ready", so
/// negating an element condition holds once the element is gone.
pub fn not<'a, T, P>(mut predicate: P) -> impl FnMut() -> Result<Outcome<()>> + 'a
where
    T: Debug + 'a,
    P: FnMut() -> Result<Outcome<T>> + 'a,
{
    move || match Outcome::from_result(predicate()) {
        Outcome::Ready(value) => Ok(Outcome::NotYet(format!("condition still holds ({:?})", value))),
        Outcome::NotYet(_) => Ok(Outcome::Ready(())),
        Outcome::Fatal(e) => Ok(Outcome::Fatal(e)),
    }
}
