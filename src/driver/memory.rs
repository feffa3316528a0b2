//! Scripted in-memory driver for deterministic tests

use super::{parse_location, ContextId, Driver};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use url::Url;

struct MemoryState {
    /// Per-context history; the last entry is the current location
    contexts: BTreeMap<ContextId, Vec<Url>>,
    current: Option<ContextId>,
    next_id: u64,
    closed: Vec<ContextId>,
    fail_close: bool,
    fail_list: bool,
}

/// A driver that keeps contexts and their histories in a `Mutex`.
///
/// New contexts get ids `ctx-0000`, `ctx-0001`, ... so creation order and
/// lexicographic order agree for the first ten thousand contexts. Like a real
/// browser, opening a context does not make it current; only `switch_to`
/// does.
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
}

impl MemoryDriver {
    /// Create a driver with a single context showing `start_url`.
    pub fn new(start_url: &str) -> Result<Self> {
        let url = parse_location(start_url)?;
        let origin = ContextId::new("ctx-0000");
        let mut contexts = BTreeMap::new();
        contexts.insert(origin.clone(), vec![url]);
        Ok(Self {
            state: Mutex::new(MemoryState {
                contexts,
                current: Some(origin),
                next_id: 1,
                closed: Vec::new(),
                fail_close: false,
                fail_list: false,
            }),
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::DriverError("memory driver state poisoned".into()))
    }

    /// Open a new context at `url`, as an outbound `target=_blank` link would.
    pub fn open_context(&self, url: &str) -> Result<ContextId> {
        let url = parse_location(url)?;
        let mut s = self.state()?;
        let id = ContextId::new(format!("ctx-{:04}", s.next_id));
        s.next_id += 1;
        s.contexts.insert(id.clone(), vec![url]);
        Ok(id)
    }

    /// Navigate the current context to `url`, pushing a history entry.
    pub fn navigate(&self, url: &str) -> Result<()> {
        let url = parse_location(url)?;
        let mut s = self.state()?;
        let current = s
            .current
            .clone()
            .ok_or_else(|| Error::DriverError("no current context".into()))?;
        s.contexts
            .get_mut(&current)
            .ok_or(Error::ContextNotFound(current))?
            .push(url);
        Ok(())
    }

    /// Contexts closed so far, in closing order
    pub fn closed_contexts(&self) -> Result<Vec<ContextId>> {
        Ok(self.state()?.closed.clone())
    }

    /// Make every subsequent `close` fail, to exercise teardown error paths.
    pub fn set_close_failure(&self, fail: bool) -> Result<()> {
        self.state()?.fail_close = fail;
        Ok(())
    }

    /// Make every subsequent `list_contexts` fail, as a crashed session would.
    pub fn set_list_failure(&self, fail: bool) -> Result<()> {
        self.state()?.fail_list = fail;
        Ok(())
    }

    /// Location of an arbitrary context without switching to it
    pub fn location_of(&self, id: &ContextId) -> Result<Url> {
        let s = self.state()?;
        s.contexts
            .get(id)
            .and_then(|h| h.last().cloned())
            .ok_or_else(|| Error::ContextNotFound(id.clone()))
    }
}

impl Driver for MemoryDriver {
    fn list_contexts(&self) -> Result<BTreeSet<ContextId>> {
        let s = self.state()?;
        if s.fail_list {
            return Err(Error::DriverError("session not reachable".into()));
        }
        Ok(s.contexts.keys().cloned().collect())
    }

    fn current_context(&self) -> Result<ContextId> {
        self.state()?
            .current
            .clone()
            .ok_or_else(|| Error::DriverError("no current context".into()))
    }

    fn switch_to(&self, id: &ContextId) -> Result<()> {
        let mut s = self.state()?;
        if !s.contexts.contains_key(id) {
            return Err(Error::ContextNotFound(id.clone()));
        }
        s.current = Some(id.clone());
        Ok(())
    }

    fn close(&self, id: &ContextId) -> Result<()> {
        let mut s = self.state()?;
        if s.fail_close {
            return Err(Error::DriverError(format!("refusing to close {}", id)));
        }
        if s.contexts.remove(id).is_none() {
            return Err(Error::ContextNotFound(id.clone()));
        }
        if s.current.as_ref() == Some(id) {
            s.current = None;
        }
        s.closed.push(id.clone());
        Ok(())
    }

    fn current_location(&self) -> Result<Url> {
        let id = self.current_context()?;
        self.location_of(&id)
    }

    fn navigate_back(&self) -> Result<()> {
        let mut s = self.state()?;
        let current = s
            .current
            .clone()
            .ok_or_else(|| Error::DriverError("no current context".into()))?;
        let history = s
            .contexts
            .get_mut(&current)
            .ok_or(Error::ContextNotFound(current))?;
        // The first entry stays: going back past it is a no-op, as in a browser.
        if history.len() > 1 {
            history.pop();
        }
        Ok(())
    }
}
