//! Ordering oracle for sort controls
//!
//! Asserting immediately after choosing a sort option races the re-render.
//! `verify_reorder` splits the check into two waits: first for the displayed
//! sequence to change at all, then a fresh capture compared against the
//! comparator-sorted permutation of what was shown before.

use crate::outcome::VerificationOutcome;
use crate::poll::{wait_until, Outcome, WaitDirective};
use crate::{Error, Result};
use log::debug;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::time::Duration;

/// Diagnostic reported when the action never changed the sequence
pub const NO_REORDER_OBSERVED: &str = "no reorder observed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// How to read a displayed sequence and how it should be ordered.
///
/// `extract` must re-read the UI on every call; it is called several times
/// during one verification.
pub struct OrderingProbe<E, C> {
    extract: E,
    comparator: C,
    direction: Direction,
}

impl<V, E, C> OrderingProbe<E, C>
where
    E: FnMut() -> Result<Vec<V>>,
    C: Fn(&V, &V) -> Ordering,
{
    pub fn new(extract: E, comparator: C, direction: Direction) -> Self {
        Self {
            extract,
            comparator,
            direction,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn extract(&mut self) -> Result<Vec<V>> {
        (self.extract)()
    }

    fn compare(&self, a: &V, b: &V) -> Ordering {
        match self.direction {
            Direction::Ascending => (self.comparator)(a, b),
            Direction::Descending => (self.comparator)(b, a),
        }
    }

    /// `values` ordered by the comparator and direction
    pub fn sorted(&self, values: &[V]) -> Vec<V>
    where
        V: Clone,
    {
        let mut expected = values.to_vec();
        expected.sort_by(|a, b| self.compare(a, b));
        expected
    }

    /// Whether `after` is a permutation of `before` laid out like `expected`.
    ///
    /// Positions are compared by comparator key only, so values that tie may
    /// appear in any relative order.
    pub fn matches(&self, before: &[V], after: &[V], expected: &[V]) -> bool
    where
        V: PartialEq,
    {
        after.len() == expected.len()
            && after
                .iter()
                .zip(expected)
                .all(|(a, e)| self.compare(a, e) == Ordering::Equal)
            && is_permutation(before, after)
    }
}

fn is_permutation<V: PartialEq>(before: &[V], after: &[V]) -> bool {
    if before.len() != after.len() {
        return false;
    }
    let mut used = vec![false; before.len()];
    after.iter().all(|a| {
        match before.iter().enumerate().position(|(i, b)| !used[i] && b == a) {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

/// Capture, run `action`, wait for the re-render, and check the new order.
///
/// Sequences of zero or one element are trivially ordered: the result is an
/// immediate success and `action` is not run. Otherwise the change wait
/// always runs, so a late re-render is never mistaken for the final order.
/// When nothing changes within `timeout`, the result passes only if the
/// captured sequence was already in the expected order.
pub fn verify_reorder<V, E, C, A>(
    probe: &mut OrderingProbe<E, C>,
    action: A,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<VerificationOutcome<V>>
where
    V: Clone + PartialEq + Debug,
    E: FnMut() -> Result<Vec<V>>,
    C: Fn(&V, &V) -> Ordering,
    A: FnOnce() -> Result<()>,
{
    let before = probe.extract()?;
    if before.len() <= 1 {
        debug!("Sequence of {} element(s) is trivially ordered", before.len());
        return Ok(VerificationOutcome::pass("trivially ordered")
            .with_sequences(before.clone(), before.clone())
            .with_expected(before));
    }

    let expected = probe.sorted(&before);
    action()?;

    let directive = WaitDirective::new(
        || {
            let current = probe.extract()?;
            if current == before {
                Ok(Outcome::NotYet(NO_REORDER_OBSERVED.to_string()))
            } else {
                Ok(Outcome::Ready(()))
            }
        },
        timeout,
        poll_interval,
    )?
    .describe("displayed sequence to change");

    match wait_until(directive) {
        Ok(()) => {}
        Err(Error::Timeout { .. }) if before == expected => {
            debug!("Sequence unchanged but already in {:?} order", probe.direction());
        }
        Err(Error::Timeout { .. }) => {
            return Ok(VerificationOutcome::fail(NO_REORDER_OBSERVED)
                .with_sequences(before.clone(), before)
                .with_expected(expected));
        }
        Err(e) => return Err(e),
    }

    let after = probe.extract()?;
    let outcome = if probe.matches(&before, &after, &expected) {
        VerificationOutcome::pass(format!("{} values in {:?} order", after.len(), probe.direction()))
    } else {
        VerificationOutcome::fail(format!(
            "sequence not in {:?} order: expected {:?}, observed {:?}",
            probe.direction(),
            expected,
            after
        ))
    };
    Ok(outcome.with_sequences(before, after).with_expected(expected))
}

// Comparators for values scraped from listings.

/// Natural order of `Ord` values
pub fn natural<V: Ord>(a: &V, b: &V) -> Ordering {
    a.cmp(b)
}

/// Case-insensitive string order, falling back to byte order on ties
pub fn case_insensitive(a: &String, b: &String) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Parse a displayed price such as `"$29.99"` or `"1,299.00 USD"`.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Compare displayed prices numerically; text that is not a price sorts last.
pub fn by_price(a: &String, b: &String) -> Ordering {
    match (parse_price(a), parse_price(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
