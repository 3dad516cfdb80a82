//! Screen-settle detection.
//!
//! Two variants share the same polling idiom:
//!
//! | Variant | Sample | Settled when |
//! |---------|--------|--------------|
//! | **Screenshot** | two back-to-back screenshots | pixel difference <= threshold |
//! | **Hierarchy** | one hierarchy fetch | equal to the previous fetch and root not loading |
//!
//! The screenshot variant is bounded by a timeout and answers yes/no. The
//! hierarchy variant is bounded by an iteration count and always returns the
//! last hierarchy it saw, settled or not. Drivers with a platform fast path
//! (`Driver::is_screen_static`) skip the screenshot diff entirely.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::Poller;
use crate::config::OrchestraConfig;
use crate::driver::Driver;
use crate::error::Result;
use crate::hierarchy::TreeNode;

/// Cadence and thresholds for both settle variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettleOptions {
    pub threshold: f64,
    pub screenshot_interval: Duration,
    pub hierarchy_interval: Duration,
    pub max_iterations: u32,
}

impl Default for SettleOptions {
    fn default() -> Self {
        Self::from(&OrchestraConfig::default())
    }
}

impl From<&OrchestraConfig> for SettleOptions {
    fn from(config: &OrchestraConfig) -> Self {
        Self {
            threshold: config.screen_static_threshold,
            screenshot_interval: config.screen_static_interval(),
            hierarchy_interval: config.settle_interval(),
            max_iterations: config.settle_max_iterations,
        }
    }
}

pub struct ScreenSettleDetector {
    driver: Arc<dyn Driver>,
    poller: Poller,
    options: SettleOptions,
}

impl ScreenSettleDetector {
    pub fn new(driver: Arc<dyn Driver>, poller: Poller, options: SettleOptions) -> Self {
        Self {
            driver,
            poller,
            options,
        }
    }

    /// True once a sample reports the screen static; false at `timeout`.
    pub fn wait_until_static(&self, timeout: Duration) -> Result<bool> {
        let deadline = self.poller.deadline(timeout);
        let mut samples = 0u32;
        loop {
            self.poller.check_cancelled()?;
            samples += 1;
            if self.sample_is_static()? {
                debug!("Screen static after {} sample(s)", samples);
                return Ok(true);
            }
            if self.poller.expired(deadline) {
                debug!("Screen still changing after {:?}", timeout);
                return Ok(false);
            }
            self.poller
                .pause_until(self.options.screenshot_interval, deadline)?;
        }
    }

    fn sample_is_static(&self) -> Result<bool> {
        if let Some(is_static) = self.driver.is_screen_static()? {
            return Ok(is_static);
        }
        let first = self.driver.take_screenshot()?;
        let second = self.driver.take_screenshot()?;
        Ok(screenshot_difference(&first, &second)
            .is_some_and(|difference| difference <= self.options.threshold))
    }

    /// Fetch hierarchies until two in a row are equal and the root is not
    /// loading, or the iteration budget runs out.
    pub fn wait_for_app_to_settle(&self, initial: Option<TreeNode>) -> Result<TreeNode> {
        let mut latest = match initial {
            Some(hierarchy) => hierarchy,
            None => self.driver.view_hierarchy()?,
        };
        for iteration in 0..self.options.max_iterations {
            self.poller.check_cancelled()?;
            let current = self.driver.view_hierarchy()?;
            if same_hierarchy(&latest, &current) && !current.is_loading() {
                debug!("App settled after {} iteration(s)", iteration + 1);
                return Ok(current);
            }
            latest = current;
            self.poller.pause(self.options.hierarchy_interval)?;
        }
        debug!(
            "App did not settle within {} iterations, using last hierarchy",
            self.options.max_iterations
        );
        Ok(latest)
    }
}

/// Structural equality with a fingerprint pre-check.
#[must_use]
pub fn same_hierarchy(a: &TreeNode, b: &TreeNode) -> bool {
    a.fingerprint() == b.fingerprint() && a == b
}

/// Mean absolute RGB difference of two encoded images as a percentage,
/// 0.0-100.0. Alpha is ignored.
///
/// Returns `None` if either image fails to decode or the dimensions differ
/// (for example after a rotation); callers treat that as "not static".
pub fn screenshot_difference(first: &[u8], second: &[u8]) -> Option<f64> {
    let decode = |bytes: &[u8]| match image::load_from_memory(bytes) {
        Ok(img) => Some(img.to_rgba8()),
        Err(e) => {
            debug!("Could not decode screenshot: {}", e);
            None
        }
    };
    let a = decode(first)?;
    let b = decode(second)?;
    if a.dimensions() != b.dimensions() {
        debug!(
            "Screenshot dimensions changed: {:?} -> {:?}",
            a.dimensions(),
            b.dimensions()
        );
        return None;
    }
    let channels = u64::from(a.width()) * u64::from(a.height()) * 3;
    if channels == 0 {
        return Some(0.0);
    }
    let diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .flat_map(|(x, y)| (0..3).map(move |c| u64::from(x.0[c].abs_diff(y.0[c]))))
        .sum();
    Some(diff as f64 * 100.0 / (channels as f64 * 255.0))
}
