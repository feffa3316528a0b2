//! Context registry: which contexts exist and which one is current

use crate::driver::{ContextId, Driver};
use crate::{Error, Result};
use log::debug;
use serde::Serialize;
use std::collections::BTreeSet;

/// The set of open contexts at one instant, rooted at an origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    contexts: BTreeSet<ContextId>,
    origin: ContextId,
}

impl ContextSnapshot {
    /// Capture the driver's open contexts. Fails with `ContextNotFound` when
    /// `origin` is not among them.
    pub fn capture<D: Driver + ?Sized>(driver: &D, origin: &ContextId) -> Result<Self> {
        let contexts = driver.list_contexts()?;
        if !contexts.contains(origin) {
            return Err(Error::ContextNotFound(origin.clone()));
        }
        Ok(Self {
            contexts,
            origin: origin.clone(),
        })
    }

    pub fn origin(&self) -> &ContextId {
        &self.origin
    }

    pub fn contexts(&self) -> &BTreeSet<ContextId> {
        &self.contexts
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Contexts present in `after` but not in `self`.
    pub fn diff(&self, after: &ContextSnapshot) -> ContextDiff {
        ContextDiff {
            new_contexts: after.contexts.difference(&self.contexts).cloned().collect(),
        }
    }
}

/// Contexts that appeared between two snapshots, in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextDiff {
    new_contexts: Vec<ContextId>,
}

impl ContextDiff {
    pub fn new_contexts(&self) -> &[ContextId] {
        &self.new_contexts
    }

    pub fn is_empty(&self) -> bool {
        self.new_contexts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new_contexts.len()
    }

    /// The context to verify: the lowest-sorting new id.
    pub fn select(&self) -> Option<&ContextId> {
        self.new_contexts.first()
    }
}

/// Tracks the current context on behalf of the switch protocol.
///
/// Only the switch protocol mutates the registry; everything else reads it.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    current: Option<ContextId>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The context the registry last switched to or synced from the driver
    pub fn current(&self) -> Option<&ContextId> {
        self.current.as_ref()
    }

    /// Drop whatever pointer is held and re-read it from the driver.
    pub(crate) fn reset<D: Driver + ?Sized>(&mut self, driver: &D) -> Result<ContextId> {
        let current = driver.current_context()?;
        self.current = Some(current.clone());
        Ok(current)
    }

    pub(crate) fn switch_to<D: Driver + ?Sized>(&mut self, driver: &D, id: &ContextId) -> Result<()> {
        debug!("Switching to context {}", id);
        driver.switch_to(id)?;
        self.current = Some(id.clone());
        Ok(())
    }

    pub(crate) fn close<D: Driver + ?Sized>(&mut self, driver: &D, id: &ContextId) -> Result<()> {
        debug!("Closing context {}", id);
        driver.close(id)?;
        if self.current.as_ref() == Some(id) {
            self.current = None;
        }
        Ok(())
    }
}
