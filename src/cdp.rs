//! Chrome DevTools Protocol driver implementation

use crate::driver::{parse_location, ContextId, Driver};
use crate::poll::{wait_until, Outcome, WaitDirective};
use crate::{Error, Result};
use headless_chrome::browser::tab::{NoElementFound, Tab};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

// Tabs disappear from the browser's list once Chrome reports the target
// destroyed, which lags the close command slightly.
const CLOSE_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_SETTLE_POLL: Duration = Duration::from_millis(50);

/// Map a locator failure: "no element" is transient, anything else is not.
fn locator_error(selector: &str, err: anyhow::Error) -> Error {
    if err.downcast_ref::<NoElementFound>().is_some() {
        Error::NotFound(selector.to_string())
    } else {
        Error::from(err)
    }
}

/// CDP-based driver over headless Chrome (uses the `headless_chrome` crate)
///
/// Each Chrome target of type page is one context; its target id is the
/// `ContextId`. "Current" is tracked here since CDP has no such notion.
pub struct CdpDriver {
    browser: Browser,
    current: Mutex<Option<Arc<Tab>>>,
}

impl CdpDriver {
    /// Launch headless Chrome and open a tab to drive.
    pub fn launch(window_size: (u32, u32)) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some(window_size))
            .build()
            .map_err(|e| Error::DriverError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::DriverError(format!("Failed to launch browser: {}", e)))?;
        Self::from_browser(browser)
    }

    /// Drive an already launched browser, starting from a fresh tab.
    pub fn from_browser(browser: Browser) -> Result<Self> {
        let tab = browser
            .new_tab()
            .map_err(|e| Error::DriverError(format!("Failed to create tab: {}", e)))?;
        Ok(Self {
            browser,
            current: Mutex::new(Some(tab)),
        })
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<Arc<Tab>>>> {
        self.current
            .lock()
            .map_err(|_| Error::DriverError("current tab lock poisoned".into()))
    }

    fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        self.browser.register_missing_tabs();
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| Error::DriverError("tab list lock poisoned".into()))?;
        Ok(tabs.clone())
    }

    fn find_tab(&self, id: &ContextId) -> Result<Arc<Tab>> {
        self.tabs()?
            .into_iter()
            .find(|t| t.get_target_id().as_str() == id.as_str())
            .ok_or_else(|| Error::ContextNotFound(id.clone()))
    }

    /// The tab commands are directed to
    pub fn current_tab(&self) -> Result<Arc<Tab>> {
        self.slot()?
            .clone()
            .ok_or_else(|| Error::DriverError("no current tab".into()))
    }

    /// Navigate the current tab and wait for the load to finish.
    pub fn goto(&self, url: &str) -> Result<()> {
        let tab = self.current_tab()?;
        tab.navigate_to(url)
            .map_err(|e| Error::DriverError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::DriverError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    /// Click the first element matching `selector`.
    pub fn click(&self, selector: &str) -> Result<()> {
        let tab = self.current_tab()?;
        let element = tab.find_element(selector).map_err(|e| locator_error(selector, e))?;
        element.click()?;
        Ok(())
    }

    /// Inner text of every element matching `selector`, in document order.
    ///
    /// No match yields `Error::NotFound`, so this can be used directly as an
    /// ordering probe's extractor while a listing is still rendering.
    pub fn inner_texts(&self, selector: &str) -> Result<Vec<String>> {
        let tab = self.current_tab()?;
        let elements = tab.find_elements(selector).map_err(|e| locator_error(selector, e))?;
        let mut texts = Vec::with_capacity(elements.len());
        for element in &elements {
            texts.push(element.get_inner_text()?.trim().to_string());
        }
        Ok(texts)
    }
}

impl Driver for CdpDriver {
    fn list_contexts(&self) -> Result<BTreeSet<ContextId>> {
        Ok(self
            .tabs()?
            .iter()
            .map(|t| ContextId::new(t.get_target_id().clone()))
            .collect())
    }

    fn current_context(&self) -> Result<ContextId> {
        Ok(ContextId::new(self.current_tab()?.get_target_id().clone()))
    }

    fn switch_to(&self, id: &ContextId) -> Result<()> {
        let tab = self.find_tab(id)?;
        tab.activate()?;
        *self.slot()? = Some(tab);
        Ok(())
    }

    fn close(&self, id: &ContextId) -> Result<()> {
        let tab = self.find_tab(id)?;
        tab.close(true)?;
        {
            let mut slot = self.slot()?;
            if slot.as_ref().map(|t| t.get_target_id() == tab.get_target_id()).unwrap_or(false) {
                *slot = None;
            }
        }

        let directive = WaitDirective::new(
            || {
                if self.list_contexts()?.contains(id) {
                    Ok(Outcome::NotYet(format!("{} still listed", id)))
                } else {
                    Ok(Outcome::Ready(()))
                }
            },
            CLOSE_SETTLE_TIMEOUT,
            CLOSE_SETTLE_POLL,
        )?
        .describe(format!("tab {} to close", id));
        if let Err(e) = wait_until(directive) {
            warn!("Closed tab {} is still listed: {}", id, e);
        }
        debug!("Closed tab {}", id);
        Ok(())
    }

    fn current_location(&self) -> Result<Url> {
        parse_location(&self.current_tab()?.get_url())
    }

    fn navigate_back(&self) -> Result<()> {
        self.current_tab()?
            .evaluate("history.back()", false)
            .map_err(|e| Error::DriverError(format!("history.back() failed: {}", e)))?;
        Ok(())
    }
}
