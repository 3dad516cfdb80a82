//! Shared fixtures for unit tests: tree builders and a scripted driver.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::driver::Driver;
use crate::error::{OrchestraError, Result};
use crate::hierarchy::{DeviceInfo, Point, TreeNode, BOUNDS, TEXT};

/// Leaf node with a text label and bounds in `[x1,y1][x2,y2]` form.
pub fn node(text: &str, bounds: &str) -> TreeNode {
    node_with(&[(TEXT, text), (BOUNDS, bounds)])
}

pub fn node_with(attributes: &[(&str, &str)]) -> TreeNode {
    TreeNode {
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..TreeNode::default()
    }
}

pub fn with_children(mut parent: TreeNode, children: Vec<TreeNode>) -> TreeNode {
    parent.children = children;
    parent
}

/// Full-screen root without a label.
pub fn screen(children: Vec<TreeNode>) -> TreeNode {
    with_children(node_with(&[(BOUNDS, "[0,0][1080,1920]")]), children)
}

/// Solid-colour PNG.
pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[derive(Default)]
struct FakeState {
    open: bool,
    calls: Vec<String>,
    frames: VecDeque<TreeNode>,
    screenshots: VecDeque<Vec<u8>>,
    screen_static: Option<bool>,
    pending_failures: HashMap<String, usize>,
    taps: Vec<Point>,
    inputs: Vec<String>,
    app_states: HashMap<String, Vec<u8>>,
}

/// In-memory driver that replays scripted hierarchies and screenshots.
///
/// Hierarchy and screenshot queues advance one entry per call and stick at
/// the last entry once exhausted.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(frames: Vec<TreeNode>) -> Self {
        let driver = Self::new();
        driver.push_frames(frames);
        driver
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_frames(&self, frames: Vec<TreeNode>) {
        self.state().frames.extend(frames);
    }

    pub fn push_screenshots(&self, screenshots: Vec<Vec<u8>>) {
        self.state().screenshots.extend(screenshots);
    }

    pub fn set_screen_static(&self, value: Option<bool>) {
        self.state().screen_static = value;
    }

    /// Make the next call of `operation` fail with a transport error.
    pub fn fail_next(&self, operation: &str) {
        *self
            .state()
            .pending_failures
            .entry(operation.to_string())
            .or_default() += 1;
    }

    pub fn set_app_state(&self, app_id: &str, bytes: &[u8]) {
        self.state()
            .app_states
            .insert(app_id.to_string(), bytes.to_vec());
    }

    pub fn app_state(&self, app_id: &str) -> Option<Vec<u8>> {
        self.state().app_states.get(app_id).cloned()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_named(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn taps(&self) -> Vec<Point> {
        self.state().taps.clone()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.state().inputs.clone()
    }

    /// Record the call and consume a scripted failure if one is pending.
    fn record(&self, operation: &str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        if let Some(remaining) = state.pending_failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OrchestraError::transport(operation, "scripted failure"));
            }
        }
        Ok(state)
    }
}

fn next_sticky<T: Clone + Default>(queue: &mut VecDeque<T>) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_default()
    } else {
        queue.front().cloned().unwrap_or_default()
    }
}

impl Driver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    fn open(&self) -> Result<()> {
        self.record("open")?.open = true;
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        state.calls.push("close".to_string());
        state.open = false;
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        self.record("device_info")?;
        Ok(DeviceInfo {
            width_pixels: 1080,
            height_pixels: 1920,
        })
    }

    fn view_hierarchy(&self) -> Result<TreeNode> {
        let mut state = self.record("view_hierarchy")?;
        Ok(next_sticky(&mut state.frames))
    }

    fn tap(&self, point: Point) -> Result<()> {
        self.record("tap")?.taps.push(point);
        Ok(())
    }

    fn scroll_vertical(&self) -> Result<()> {
        self.record("scroll_vertical")?;
        Ok(())
    }

    fn back_press(&self) -> Result<()> {
        self.record("back_press")?;
        Ok(())
    }

    fn input_text(&self, text: &str) -> Result<()> {
        self.record("input_text")?.inputs.push(text.to_string());
        Ok(())
    }

    fn take_screenshot(&self) -> Result<Vec<u8>> {
        let mut state = self.record("take_screenshot")?;
        Ok(next_sticky(&mut state.screenshots))
    }

    fn is_screen_static(&self) -> Result<Option<bool>> {
        Ok(self.record("is_screen_static")?.screen_static)
    }

    fn launch_app(&self, _app_id: &str) -> Result<()> {
        self.record("launch_app")?;
        Ok(())
    }

    fn stop_app(&self, _app_id: &str) -> Result<()> {
        self.record("stop_app")?;
        Ok(())
    }

    fn clear_app_state(&self, app_id: &str) -> Result<()> {
        self.record("clear_app_state")?.app_states.remove(app_id);
        Ok(())
    }

    fn pull_app_state(&self, app_id: &str, file: &Path) -> Result<()> {
        let bytes = self
            .record("pull_app_state")?
            .app_states
            .get(app_id)
            .cloned()
            .unwrap_or_default();
        std::fs::write(file, bytes).map_err(|e| OrchestraError::transport("pull_app_state", e))
    }

    fn push_app_state(&self, app_id: &str, file: &Path) -> Result<()> {
        let mut state = self.record("push_app_state")?;
        let bytes =
            std::fs::read(file).map_err(|e| OrchestraError::transport("push_app_state", e))?;
        state.app_states.insert(app_id.to_string(), bytes);
        Ok(())
    }
}
