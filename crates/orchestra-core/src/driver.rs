//! Device driver contract.
//!
//! A driver is the only thing that talks to a device. Backends (Android,
//! iOS, web) each implement [`Driver`] and are picked when the session is
//! constructed; the core never knows which one it holds.
//!
//! All operations are synchronous and may block. Transport failures are
//! reported as [`ErrorCode::DriverTransport`](crate::error::ErrorCode).

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::hierarchy::{DeviceInfo, Point, TreeNode};

pub trait Driver: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn open(&self) -> Result<()>;

    fn close(&self);

    fn device_info(&self) -> Result<DeviceInfo>;

    /// Fresh accessibility tree. Drivers must not cache between calls.
    fn view_hierarchy(&self) -> Result<TreeNode>;

    fn tap(&self, point: Point) -> Result<()>;

    fn scroll_vertical(&self) -> Result<()>;

    fn back_press(&self) -> Result<()>;

    fn input_text(&self, text: &str) -> Result<()>;

    /// Encoded screenshot (PNG for every shipped backend).
    fn take_screenshot(&self) -> Result<Vec<u8>>;

    /// Platform fast path for settle detection; `None` when unsupported.
    fn is_screen_static(&self) -> Result<Option<bool>> {
        Ok(None)
    }

    fn launch_app(&self, app_id: &str) -> Result<()>;

    fn stop_app(&self, app_id: &str) -> Result<()>;

    fn clear_app_state(&self, app_id: &str) -> Result<()>;

    /// Copy the app's on-disk state into `file`.
    fn pull_app_state(&self, app_id: &str, file: &Path) -> Result<()>;

    /// Replace the app's on-disk state with the contents of `file`.
    fn push_app_state(&self, app_id: &str, file: &Path) -> Result<()>;
}

/// Scoped driver acquisition.
///
/// Opens the driver on construction and closes it when dropped, so the
/// session is released on every exit path of a flow run.
pub struct DriverSession {
    driver: Arc<dyn Driver>,
}

impl DriverSession {
    pub fn open(driver: Arc<dyn Driver>) -> Result<Self> {
        debug!("Opening driver session: {}", driver.name());
        driver.open()?;
        Ok(Self { driver })
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        debug!("Closing driver session: {}", self.driver.name());
        self.driver.close();
    }
}

/// Log-and-continue wrapper for best-effort driver calls.
pub(crate) fn best_effort(operation: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Best-effort {} failed: {}", operation, e);
    }
}
