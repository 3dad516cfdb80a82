//! Element resolution with bounded retries.
//!
//! The resolver fetches a fresh hierarchy, compiles the selector against it
//! and evaluates, over and over, until something matches or the deadline
//! passes. Deadlines come from the selector: optional selectors give up
//! after the optional timeout, everything else after the lookup timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::clock::Poller;
use crate::config::OrchestraConfig;
use crate::driver::Driver;
use crate::error::{OrchestraError, Result};
use crate::filters::{compile, ElementLookup};
use crate::hierarchy::{describe_visible, Snapshot, UiElement};
use crate::selector::ElementSelector;

/// Outcome of a lookup that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindResult {
    Found(UiElement),
    NotFound {
        description: String,
        hierarchy_dump: String,
    },
}

impl FindResult {
    /// Turn `NotFound` into an [`ErrorCode::ElementNotFound`](crate::error::ErrorCode) error.
    pub fn into_element(self) -> Result<UiElement> {
        match self {
            FindResult::Found(element) => Ok(element),
            FindResult::NotFound {
                description,
                hierarchy_dump,
            } => Err(OrchestraError::element_not_found(
                &description,
                Some(hierarchy_dump),
            )),
        }
    }
}

/// Lookup deadlines and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupTimeouts {
    pub required: Duration,
    pub optional: Duration,
    pub poll_interval: Duration,
}

impl Default for LookupTimeouts {
    fn default() -> Self {
        Self::from(&OrchestraConfig::default())
    }
}

impl From<&OrchestraConfig> for LookupTimeouts {
    fn from(config: &OrchestraConfig) -> Self {
        Self {
            required: config.lookup_timeout(),
            optional: config.optional_lookup_timeout(),
            poll_interval: config.lookup_poll_interval(),
        }
    }
}

pub struct ElementResolver {
    driver: Arc<dyn Driver>,
    poller: Poller,
    timeouts: LookupTimeouts,
}

impl ElementResolver {
    pub fn new(driver: Arc<dyn Driver>, poller: Poller, timeouts: LookupTimeouts) -> Self {
        Self {
            driver,
            poller,
            timeouts,
        }
    }

    pub fn timeout_for(&self, selector: &ElementSelector, timeout_override: Option<Duration>) -> Duration {
        match timeout_override {
            Some(timeout) => timeout,
            None if selector.optional => self.timeouts.optional,
            None => self.timeouts.required,
        }
    }

    /// Poll until `selector` matches or its deadline elapses.
    ///
    /// Transport failures, invalid selectors and cancellation are errors;
    /// running out of time is a [`FindResult::NotFound`].
    #[instrument(level = "debug", skip_all, fields(selector = %selector))]
    pub fn find(
        &self,
        selector: &ElementSelector,
        timeout_override: Option<Duration>,
    ) -> Result<FindResult> {
        let timeout = self.timeout_for(selector, timeout_override);
        let deadline = self.poller.deadline(timeout);
        let mut attempts = 0u32;

        loop {
            self.poller.check_cancelled()?;
            attempts += 1;

            let root = self.driver.view_hierarchy()?;
            let snapshot = Snapshot::new(&root);
            let compiled = compile(selector, &snapshot, self)?;

            if let Some(element) = compiled.first_match(&snapshot) {
                debug!(
                    "Found {} at {} after {} attempt(s)",
                    compiled.description(),
                    element.bounds.encode(),
                    attempts
                );
                return Ok(FindResult::Found(element));
            }

            if self.poller.expired(deadline) {
                debug!(
                    "Gave up on {} after {} attempt(s) ({:?})",
                    compiled.description(),
                    attempts,
                    timeout
                );
                return Ok(FindResult::NotFound {
                    description: compiled.description().to_string(),
                    hierarchy_dump: describe_visible(&root),
                });
            }

            self.poller
                .pause_until(self.timeouts.poll_interval, deadline)?;
        }
    }

    /// Like [`find`](Self::find), with not-found raised as an error.
    pub fn find_element(
        &self,
        selector: &ElementSelector,
        timeout_override: Option<Duration>,
    ) -> Result<UiElement> {
        self.find(selector, timeout_override)?.into_element()
    }

    /// Poll until `selector` stops matching; true if it vanished in time.
    pub fn wait_until_gone(&self, selector: &ElementSelector, timeout: Duration) -> Result<bool> {
        let deadline = self.poller.deadline(timeout);
        loop {
            self.poller.check_cancelled()?;
            let root = self.driver.view_hierarchy()?;
            let snapshot = Snapshot::new(&root);
            if compile(selector, &snapshot, self)?
                .first_match(&snapshot)
                .is_none()
            {
                return Ok(true);
            }
            if self.poller.expired(deadline) {
                return Ok(false);
            }
            self.poller
                .pause_until(self.timeouts.poll_interval, deadline)?;
        }
    }
}

impl ElementLookup for ElementResolver {
    /// Nested resolutions are structural preconditions, so they always use
    /// the required deadline.
    fn resolve_required(&self, selector: &ElementSelector) -> Result<UiElement> {
        let required = ElementSelector {
            optional: false,
            ..selector.clone()
        };
        self.find_element(&required, None)
    }
}
