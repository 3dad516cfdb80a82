//! Driver backed by a recorded session.
//!
//! A recording is a JSON file:
//!
//! ```json
//! {
//!   "device": {"width_pixels": 1080, "height_pixels": 1920},
//!   "frames": [{"attributes": {"text": "Login", "bounds": "[0,0][100,50]"}}],
//!   "screenshots": ["shots/0001.png", "shots/0002.png"]
//! }
//! ```
//!
//! Each hierarchy fetch advances one frame and sticks at the last one, so a
//! flow sees the screens in the order they were recorded. Screenshot paths
//! are relative to the recording. Mutators (taps, text input, app lifecycle)
//! change nothing; they are logged and kept in an action log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use orchestra_core::driver::Driver;
use orchestra_core::error::{OrchestraError, Result};
use orchestra_core::hierarchy::{DeviceInfo, Point, TreeNode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid recording: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} contains no hierarchy frames")]
    Empty { path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct Recording {
    #[serde(default)]
    device: Option<DeviceInfo>,
    frames: Vec<TreeNode>,
    #[serde(default)]
    screenshots: Vec<PathBuf>,
}

#[derive(Default)]
struct ReplayState {
    open: bool,
    frame: usize,
    screenshot: usize,
    actions: Vec<String>,
    app_states: HashMap<String, Vec<u8>>,
}

pub struct ReplayDriver {
    device: DeviceInfo,
    frames: Vec<TreeNode>,
    screenshots: Vec<Vec<u8>>,
    state: Mutex<ReplayState>,
}

impl ReplayDriver {
    pub fn load(path: &Path) -> std::result::Result<Self, ReplayError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let recording: Recording =
            serde_json::from_str(&raw).map_err(|source| ReplayError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if recording.frames.is_empty() {
            return Err(ReplayError::Empty {
                path: path.to_path_buf(),
            });
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let screenshots = recording
            .screenshots
            .iter()
            .map(|shot| {
                let shot = base.join(shot);
                std::fs::read(&shot).map_err(|source| ReplayError::Io { path: shot, source })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            "Loaded recording {:?}: {} frames, {} screenshots",
            path,
            recording.frames.len(),
            screenshots.len()
        );
        Ok(Self::new(
            recording.device.unwrap_or(DeviceInfo {
                width_pixels: 1080,
                height_pixels: 1920,
            }),
            recording.frames,
            screenshots,
        ))
    }

    pub fn new(device: DeviceInfo, frames: Vec<TreeNode>, screenshots: Vec<Vec<u8>>) -> Self {
        Self {
            device,
            frames,
            screenshots,
            state: Mutex::new(ReplayState::default()),
        }
    }

    /// Mutator calls in the order the flow issued them.
    pub fn actions(&self) -> Vec<String> {
        self.state().actions.clone()
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, action: String) {
        info!("replay: {}", action);
        self.state().actions.push(action);
    }
}

impl Driver for ReplayDriver {
    fn name(&self) -> &str {
        "replay"
    }

    fn open(&self) -> Result<()> {
        let mut state = self.state();
        state.open = true;
        state.frame = 0;
        state.screenshot = 0;
        Ok(())
    }

    fn close(&self) {
        self.state().open = false;
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        Ok(self.device)
    }

    fn view_hierarchy(&self) -> Result<TreeNode> {
        let mut state = self.state();
        let index = state.frame.min(self.frames.len().saturating_sub(1));
        let frame = self
            .frames
            .get(index)
            .cloned()
            .ok_or_else(|| OrchestraError::transport("view_hierarchy", "recording has no frames"))?;
        if state.frame + 1 < self.frames.len() {
            state.frame += 1;
        }
        Ok(frame)
    }

    fn tap(&self, point: Point) -> Result<()> {
        self.log(format!("tap {}", point));
        Ok(())
    }

    fn scroll_vertical(&self) -> Result<()> {
        self.log("scroll".to_string());
        Ok(())
    }

    fn back_press(&self) -> Result<()> {
        self.log("back".to_string());
        Ok(())
    }

    fn input_text(&self, text: &str) -> Result<()> {
        self.log(format!("input {:?}", text));
        Ok(())
    }

    fn take_screenshot(&self) -> Result<Vec<u8>> {
        let mut state = self.state();
        let index = state.screenshot.min(self.screenshots.len().saturating_sub(1));
        let shot = self.screenshots.get(index).cloned().ok_or_else(|| {
            OrchestraError::transport("take_screenshot", "recording has no screenshots")
        })?;
        if state.screenshot + 1 < self.screenshots.len() {
            state.screenshot += 1;
        }
        Ok(shot)
    }

    /// Recordings without screenshots have nothing that can move.
    fn is_screen_static(&self) -> Result<Option<bool>> {
        Ok(self.screenshots.is_empty().then_some(true))
    }

    fn launch_app(&self, app_id: &str) -> Result<()> {
        self.log(format!("launch {}", app_id));
        Ok(())
    }

    fn stop_app(&self, app_id: &str) -> Result<()> {
        self.log(format!("stop {}", app_id));
        Ok(())
    }

    fn clear_app_state(&self, app_id: &str) -> Result<()> {
        self.log(format!("clear {}", app_id));
        self.state().app_states.remove(app_id);
        Ok(())
    }

    fn pull_app_state(&self, app_id: &str, file: &Path) -> Result<()> {
        self.log(format!("pull {}", app_id));
        let bytes = self
            .state()
            .app_states
            .get(app_id)
            .cloned()
            .unwrap_or_default();
        std::fs::write(file, bytes).map_err(|e| OrchestraError::transport("pull_app_state", e))
    }

    fn push_app_state(&self, app_id: &str, file: &Path) -> Result<()> {
        self.log(format!("push {}", app_id));
        let bytes =
            std::fs::read(file).map_err(|e| OrchestraError::transport("push_app_state", e))?;
        self.state().app_states.insert(app_id.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn recording(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn text_of(node: &TreeNode) -> &str {
        node.attribute("text").unwrap_or_default()
    }

    #[test]
    fn test_frames_advance_and_stick_at_last() {
        let file = recording(
            r#"{"frames": [{"attributes": {"text": "one"}}, {"attributes": {"text": "two"}}]}"#,
        );
        let driver = ReplayDriver::load(file.path()).unwrap();
        driver.open().unwrap();
        assert_eq!(text_of(&driver.view_hierarchy().unwrap()), "one");
        assert_eq!(text_of(&driver.view_hierarchy().unwrap()), "two");
        assert_eq!(text_of(&driver.view_hierarchy().unwrap()), "two");

        // Reopening rewinds.
        driver.open().unwrap();
        assert_eq!(text_of(&driver.view_hierarchy().unwrap()), "one");
    }

    #[test]
    fn test_default_device() {
        let file = recording(r#"{"frames": [{}]}"#);
        let driver = ReplayDriver::load(file.path()).unwrap();
        assert_eq!(driver.device_info().unwrap().width_pixels, 1080);
    }

    #[test]
    fn test_empty_recording_is_rejected() {
        let file = recording(r#"{"frames": []}"#);
        let err = ReplayDriver::load(file.path()).err().unwrap();
        assert!(matches!(err, ReplayError::Empty { .. }));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let file = recording("not json");
        let err = ReplayDriver::load(file.path()).err().unwrap();
        assert!(matches!(err, ReplayError::Parse { .. }));
        assert!(err.to_string().contains("not a valid recording"));
    }

    #[test]
    fn test_missing_screenshot_is_io_error() {
        let file = recording(r#"{"frames": [{}], "screenshots": ["missing.png"]}"#);
        let err = ReplayDriver::load(file.path()).err().unwrap();
        assert!(matches!(err, ReplayError::Io { .. }));
    }

    #[test]
    fn test_mutators_are_logged() {
        let driver = ReplayDriver::new(
            DeviceInfo {
                width_pixels: 10,
                height_pixels: 10,
            },
            vec![TreeNode::default()],
            Vec::new(),
        );
        driver.tap(Point::new(5, 6)).unwrap();
        driver.input_text("hi").unwrap();
        driver.back_press().unwrap();
        assert_eq!(driver.actions(), vec!["tap (5, 6)", "input \"hi\"", "back"]);
    }

    #[test]
    fn test_no_screenshots_means_static() {
        let driver = ReplayDriver::new(
            DeviceInfo {
                width_pixels: 10,
                height_pixels: 10,
            },
            vec![TreeNode::default()],
            Vec::new(),
        );
        assert_eq!(driver.is_screen_static().unwrap(), Some(true));
        assert!(driver.take_screenshot().is_err());
    }

    #[test]
    fn test_app_state_round_trip() {
        let driver = ReplayDriver::new(
            DeviceInfo {
                width_pixels: 10,
                height_pixels: 10,
            },
            vec![TreeNode::default()],
            Vec::new(),
        );
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        std::fs::write(&state, b"session").unwrap();
        driver.push_app_state("com.example", &state).unwrap();

        let pulled = dir.path().join("pulled");
        driver.pull_app_state("com.example", &pulled).unwrap();
        assert_eq!(std::fs::read(&pulled).unwrap(), b"session");
    }
}
