//! Flow execution.
//!
//! [`Orchestra`] walks a flow one command at a time against a single driver
//! session. Each top-level command moves through:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `PENDING` | not reached yet (or never reached after an abort) |
//! | `RUNNING` | handler in progress |
//! | `COMPLETED` | handler returned successfully |
//! | `SKIPPED` | optional target was not found |
//! | `FAILED` | handler returned an error |
//!
//! A failure is reported to the [`FlowListener`], which decides whether the
//! flow stops (the default) or continues. Cancellation always stops the flow.
//!
//! When the flow declares an init sub-flow, its resulting app state is
//! captured once ([`Orchestra::run_init_flow`]) and restored before every
//! later run, so repeated runs start from the same baseline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::clock::Poller;
use crate::commands::{flow_config, Command, Condition, FlowConfig};
use crate::config::OrchestraConfig;
use crate::driver::{best_effort, Driver, DriverSession};
use crate::error::{OrchestraError, Result};
use crate::filters::compile;
use crate::hierarchy::{
    describe_visible, Point, Snapshot, UiElement, ACCESSIBILITY_TEXT, HINT_TEXT, TEXT,
};
use crate::resolver::{ElementResolver, FindResult, LookupTimeouts};
use crate::selector::ElementSelector;
use crate::settle::{same_hierarchy, ScreenSettleDetector, SettleOptions};

/// Per-command lifecycle state within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

/// What to do after a command fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResolution {
    Fail,
    Continue,
}

/// Lifecycle callbacks for presentation layers. Every method is optional.
///
/// `index` always refers to the top-level command; commands nested in
/// `run_flow` or `repeat` run inside their parent's callbacks.
pub trait FlowListener: Send {
    fn on_flow_start(&self, _commands: &[Command]) {}

    fn on_command_start(&self, _index: usize, _command: &Command) {}

    fn on_command_complete(&self, _index: usize, _command: &Command) {}

    fn on_command_skipped(&self, _index: usize, _command: &Command) {}

    fn on_command_failed(
        &self,
        _index: usize,
        _command: &Command,
        _error: &OrchestraError,
    ) -> ErrorResolution {
        ErrorResolution::Fail
    }
}

/// Listener that keeps every default.
pub struct NoopListener;

impl FlowListener for NoopListener {}

/// Statuses of the top-level commands of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    statuses: Vec<CommandStatus>,
}

impl ExecutionState {
    pub fn new(commands: usize) -> Self {
        Self {
            statuses: vec![CommandStatus::Pending; commands],
        }
    }

    pub fn status(&self, index: usize) -> Option<CommandStatus> {
        self.statuses.get(index).copied()
    }

    pub fn statuses(&self) -> &[CommandStatus] {
        &self.statuses
    }

    fn set(&mut self, index: usize, status: CommandStatus) {
        debug_assert!(
            !matches!(
                self.statuses[index],
                CommandStatus::Completed | CommandStatus::Skipped | CommandStatus::Failed
            ),
            "terminal status overwritten"
        );
        self.statuses[index] = status;
    }
}

/// Outcome of [`Orchestra::run_flow_with_report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub run_id: Uuid,
    pub success: bool,
    pub statuses: Vec<CommandStatus>,
    /// The error that stopped the flow, if one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OrchestraError>,
}

impl FlowReport {
    fn aborted(run_id: Uuid, commands: usize, error: OrchestraError) -> Self {
        Self {
            run_id,
            success: false,
            statuses: vec![CommandStatus::Pending; commands],
            error: Some(error),
        }
    }
}

/// App state captured after an init sub-flow.
///
/// The state file is left on disk until [`delete`](Self::delete) is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestraAppState {
    pub app_id: String,
    pub state_file: PathBuf,
}

impl OrchestraAppState {
    pub fn delete(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.state_file) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

enum Outcome {
    Completed,
    Skipped,
}

pub struct Orchestra {
    driver: Arc<dyn Driver>,
    poller: Poller,
    config: OrchestraConfig,
    listener: Box<dyn FlowListener>,
    copied_text: Option<String>,
}

impl Orchestra {
    pub fn new(driver: Arc<dyn Driver>, config: OrchestraConfig) -> Self {
        Self {
            driver,
            poller: Poller::system(),
            config,
            listener: Box::new(NoopListener),
            copied_text: None,
        }
    }

    #[must_use]
    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Box<dyn FlowListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    fn resolver(&self) -> ElementResolver {
        ElementResolver::new(
            self.driver.clone(),
            self.poller.clone(),
            LookupTimeouts::from(&self.config),
        )
    }

    fn settle_detector(&self) -> ScreenSettleDetector {
        ScreenSettleDetector::new(
            self.driver.clone(),
            self.poller.clone(),
            SettleOptions::from(&self.config),
        )
    }

    /// Run `commands`; true when no failure stopped the flow.
    pub fn run_flow(&mut self, commands: &[Command], init_state: Option<&OrchestraAppState>) -> bool {
        self.run_flow_with_report(commands, init_state).success
    }

    pub fn run_flow_with_report(
        &mut self,
        commands: &[Command],
        init_state: Option<&OrchestraAppState>,
    ) -> FlowReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("flow", run_id = %run_id);
        let _enter = span.enter();

        let _session = match DriverSession::open(self.driver.clone()) {
            Ok(session) => session,
            Err(e) => {
                error!("Could not open driver session: {}", e);
                return FlowReport::aborted(run_id, commands.len(), e);
            }
        };

        let captured = match (init_state, flow_config(commands)) {
            (None, Some(config)) if config.init_flow.is_some() => {
                match self.capture_init_state(config) {
                    Ok(state) => Some(state),
                    Err(e) => {
                        error!("Init flow failed, main flow not started: {}", e);
                        return FlowReport::aborted(run_id, commands.len(), e);
                    }
                }
            }
            _ => None,
        };

        let report = match init_state.or(captured.as_ref()) {
            Some(state) => match self.restore_app_state(state) {
                Ok(()) => self.execute_flow(run_id, commands),
                Err(e) => {
                    error!("Could not restore app state: {}", e);
                    FlowReport::aborted(run_id, commands.len(), e)
                }
            },
            None => self.execute_flow(run_id, commands),
        };

        if let Some(state) = captured {
            if let Err(e) = state.delete() {
                warn!("Could not delete {:?}: {}", state.state_file, e);
            }
        }
        report
    }

    /// Run the init sub-flow of `config` in its own session and capture the
    /// resulting app state.
    pub fn run_init_flow(&mut self, config: &FlowConfig) -> Result<OrchestraAppState> {
        let _session = DriverSession::open(self.driver.clone())?;
        self.capture_init_state(config)
    }

    fn capture_init_state(&mut self, config: &FlowConfig) -> Result<OrchestraAppState> {
        let app_id = config.app_id.clone().ok_or_else(|| {
            OrchestraError::flow_aborted("Init flow declared without an app_id to capture")
        })?;
        let init_flow = config.init_flow.as_deref().unwrap_or_default();

        info!("Running init flow ({} commands) for {}", init_flow.len(), app_id);
        for command in init_flow {
            if let Err(e) = self.execute(command) {
                if e.is_cancelled() {
                    return Err(e);
                }
                return Err(OrchestraError::flow_aborted(format!(
                    "Init flow failed at \"{}\": {}",
                    command.description(),
                    e
                )));
            }
        }

        self.driver.stop_app(&app_id)?;
        let temp = tempfile::Builder::new()
            .prefix("orchestra-")
            .suffix(".state")
            .tempfile()
            .map_err(|e| OrchestraError::internal(format!("Could not create state file: {}", e)))?
            .into_temp_path();
        self.driver.pull_app_state(&app_id, &temp)?;
        let state_file = temp
            .keep()
            .map_err(|e| OrchestraError::internal(format!("Could not keep state file: {}", e)))?;
        debug!("Captured state of {} into {:?}", app_id, state_file);

        Ok(OrchestraAppState { app_id, state_file })
    }

    fn restore_app_state(&self, state: &OrchestraAppState) -> Result<()> {
        info!("Restoring app state of {}", state.app_id);
        self.driver.clear_app_state(&state.app_id)?;
        self.driver.push_app_state(&state.app_id, &state.state_file)
    }

    fn execute_flow(&mut self, run_id: Uuid, commands: &[Command]) -> FlowReport {
        // Copied text belongs to a single run.
        self.copied_text = None;
        let mut state = ExecutionState::new(commands.len());
        let mut stopped_by = None;
        self.listener.on_flow_start(commands);

        for (index, command) in commands.iter().enumerate() {
            state.set(index, CommandStatus::Running);
            self.listener.on_command_start(index, command);
            info!("[{}] {}", index, command.description());

            match self.execute(command) {
                Ok(Outcome::Completed) => {
                    state.set(index, CommandStatus::Completed);
                    self.listener.on_command_complete(index, command);
                }
                Ok(Outcome::Skipped) => {
                    state.set(index, CommandStatus::Skipped);
                    self.listener.on_command_skipped(index, command);
                }
                Err(e) => {
                    state.set(index, CommandStatus::Failed);
                    let resolution = self.listener.on_command_failed(index, command, &e);
                    if e.is_cancelled() || resolution == ErrorResolution::Fail {
                        error!("[{}] {} failed: {}", index, command.description(), e);
                        stopped_by = Some(e);
                        break;
                    }
                    warn!("[{}] {} failed, continuing: {}", index, command.description(), e);
                }
            }
        }

        FlowReport {
            run_id,
            success: stopped_by.is_none(),
            statuses: state.statuses,
            error: stopped_by,
        }
    }

    fn execute(&mut self, command: &Command) -> Result<Outcome> {
        self.poller.check_cancelled()?;
        match command {
            // Consumed before the flow starts.
            Command::ApplyConfiguration { .. } => Ok(Outcome::Completed),
            Command::TapOnElement {
                selector,
                retry_if_no_change,
                wait_to_settle,
            } => self.tap_on_element(
                selector,
                retry_if_no_change.unwrap_or(false),
                wait_to_settle.unwrap_or(false),
            ),
            Command::TapOnPoint { x, y } => {
                self.driver.tap(Point::new(*x, *y))?;
                Ok(Outcome::Completed)
            }
            Command::AssertCondition { condition } => self.check_condition(condition, None),
            Command::ExtendedWaitUntil {
                condition,
                timeout_ms,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.lookup_timeout());
                self.check_condition(condition, Some(timeout))
            }
            Command::InputText { text } => {
                self.driver.input_text(text)?;
                Ok(Outcome::Completed)
            }
            Command::Scroll => {
                self.driver.scroll_vertical()?;
                Ok(Outcome::Completed)
            }
            Command::ScrollUntilVisible {
                selector,
                timeout_ms,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.scroll_until_visible_timeout());
                self.scroll_until_visible(selector, timeout)
            }
            Command::BackPress => {
                self.driver.back_press()?;
                Ok(Outcome::Completed)
            }
            Command::LaunchApp {
                app_id,
                clear_state,
                stop_app,
            } => {
                if stop_app.unwrap_or(true) {
                    best_effort("stop_app", self.driver.stop_app(app_id));
                }
                if clear_state.unwrap_or(false) {
                    self.driver.clear_app_state(app_id)?;
                }
                self.driver.launch_app(app_id)?;
                Ok(Outcome::Completed)
            }
            Command::StopApp { app_id } => {
                self.driver.stop_app(app_id)?;
                Ok(Outcome::Completed)
            }
            Command::ClearState { app_id } => {
                self.driver.clear_app_state(app_id)?;
                Ok(Outcome::Completed)
            }
            Command::WaitForAnimationToEnd { timeout_ms } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.wait_for_animation_timeout());
                if !self.settle_detector().wait_until_static(timeout)? {
                    warn!("Screen still animating after {:?}, continuing", timeout);
                }
                Ok(Outcome::Completed)
            }
            Command::TakeScreenshot { path } => {
                self.take_screenshot(Path::new(path))?;
                Ok(Outcome::Completed)
            }
            Command::CopyTextFrom { selector } => self.copy_text_from(selector),
            Command::PasteText => {
                let text = self.copied_text.clone().ok_or_else(|| {
                    OrchestraError::assertion_failed("Nothing has been copied yet", None)
                })?;
                self.driver.input_text(&text)?;
                Ok(Outcome::Completed)
            }
            Command::RunFlow { commands } => self.execute_nested(commands),
            Command::Repeat { times, commands } => {
                for iteration in 0..*times {
                    debug!("Repeat iteration {}/{}", iteration + 1, times);
                    self.execute_nested(commands)?;
                }
                Ok(Outcome::Completed)
            }
        }
    }

    fn execute_nested(&mut self, commands: &[Command]) -> Result<Outcome> {
        for command in commands {
            debug!("Nested: {}", command.description());
            if let Outcome::Skipped = self.execute(command)? {
                warn!("Nested command skipped: {}", command.description());
            }
        }
        Ok(Outcome::Completed)
    }

    /// Resolve `selector`, mapping an optional miss to `None`.
    fn find_target(
        &self,
        selector: &ElementSelector,
        timeout: Option<Duration>,
    ) -> Result<Option<UiElement>> {
        match self.resolver().find(selector, timeout)? {
            FindResult::Found(element) => Ok(Some(element)),
            FindResult::NotFound { description, .. } if selector.optional => {
                warn!("Optional element not found, skipping: {}", description);
                Ok(None)
            }
            not_found => not_found.into_element().map(Some),
        }
    }

    fn tap_on_element(
        &mut self,
        selector: &ElementSelector,
        retry_if_no_change: bool,
        wait_to_settle: bool,
    ) -> Result<Outcome> {
        let Some(element) = self.find_target(selector, None)? else {
            return Ok(Outcome::Skipped);
        };
        let point = element.center();
        let settle = self.settle_detector();

        let before = if retry_if_no_change {
            Some(settle.wait_for_app_to_settle(None)?)
        } else {
            None
        };
        self.driver.tap(point)?;

        if retry_if_no_change || wait_to_settle {
            let after = settle.wait_for_app_to_settle(None)?;
            if before.is_some_and(|before| same_hierarchy(&before, &after)) {
                info!("Screen unchanged after tap at {}, tapping again", point);
                self.driver.tap(point)?;
            }
        }
        Ok(Outcome::Completed)
    }

    fn check_condition(
        &self,
        condition: &Condition,
        timeout: Option<Duration>,
    ) -> Result<Outcome> {
        let resolver = self.resolver();
        let mut outcome = Outcome::Completed;
        if let Some(selector) = &condition.visible {
            if let FindResult::NotFound {
                description,
                hierarchy_dump,
            } = resolver.find(selector, timeout)?
            {
                if !selector.optional {
                    return Err(OrchestraError::assertion_failed(
                        format!("{} is not visible", description),
                        Some(hierarchy_dump),
                    ));
                }
                warn!("Optional element not visible, skipping: {}", description);
                outcome = Outcome::Skipped;
            }
        }
        if let Some(selector) = &condition.not_visible {
            let timeout = resolver.timeout_for(selector, timeout);
            if !resolver.wait_until_gone(selector, timeout)? {
                let dump = describe_visible(&self.driver.view_hierarchy()?);
                return Err(OrchestraError::assertion_failed(
                    format!("{} is still visible", selector.description()),
                    Some(dump),
                ));
            }
        }
        Ok(outcome)
    }

    fn scroll_until_visible(&self, selector: &ElementSelector, timeout: Duration) -> Result<Outcome> {
        let resolver = self.resolver();
        let deadline = self.poller.deadline(timeout);
        loop {
            self.poller.check_cancelled()?;
            let root = self.driver.view_hierarchy()?;
            let snapshot = Snapshot::new(&root);
            let compiled = compile(selector, &snapshot, &resolver)?;
            if compiled.first_match(&snapshot).is_some() {
                return Ok(Outcome::Completed);
            }
            if self.poller.expired(deadline) {
                if selector.optional {
                    warn!("Optional element never scrolled into view: {}", compiled.description());
                    return Ok(Outcome::Skipped);
                }
                return Err(OrchestraError::element_not_found(
                    compiled.description(),
                    Some(describe_visible(&root)),
                ));
            }
            self.driver.scroll_vertical()?;
            self.poller
                .pause_until(self.config.lookup_poll_interval(), deadline)?;
        }
    }

    fn take_screenshot(&self, path: &Path) -> Result<()> {
        let path = if path.extension().is_none() {
            path.with_extension("png")
        } else {
            path.to_path_buf()
        };
        let bytes = self.driver.take_screenshot()?;
        std::fs::write(&path, bytes).map_err(|e| {
            OrchestraError::internal(format!("Could not write screenshot {:?}: {}", path, e))
        })?;
        debug!("Screenshot saved to {:?}", path);
        Ok(())
    }

    fn copy_text_from(&mut self, selector: &ElementSelector) -> Result<Outcome> {
        let Some(element) = self.find_target(selector, None)? else {
            return Ok(Outcome::Skipped);
        };
        let text = [TEXT, HINT_TEXT, ACCESSIBILITY_TEXT]
            .iter()
            .filter_map(|key| element.tree_node.attribute(key))
            .find(|value| !value.is_empty())
            .ok_or_else(|| {
                OrchestraError::assertion_failed(
                    format!("{} has no text to copy", selector.description()),
                    None,
                )
            })?;
        debug!("Copied {:?}", text);
        self.copied_text = Some(text.to_string());
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::ErrorCode;
    use crate::hierarchy::TreeNode;
    use crate::test_support::{node, png, screen, FakeDriver};
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        resolution: Option<ErrorResolution>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl FlowListener for Recorder {
        fn on_flow_start(&self, commands: &[Command]) {
            self.push(format!("flow:{}", commands.len()));
        }

        fn on_command_start(&self, index: usize, _command: &Command) {
            self.push(format!("start:{}", index));
        }

        fn on_command_complete(&self, index: usize, _command: &Command) {
            self.push(format!("complete:{}", index));
        }

        fn on_command_skipped(&self, index: usize, _command: &Command) {
            self.push(format!("skipped:{}", index));
        }

        fn on_command_failed(
            &self,
            index: usize,
            _command: &Command,
            error: &OrchestraError,
        ) -> ErrorResolution {
            self.push(format!("failed:{}:{}", index, error.code));
            self.resolution.unwrap_or(ErrorResolution::Fail)
        }
    }

    fn orchestra(driver: Arc<FakeDriver>, recorder: &Recorder) -> (Arc<ManualClock>, Orchestra) {
        let clock = Arc::new(ManualClock::new());
        let poller = Poller::new(clock.clone(), CancellationToken::new());
        let orchestra = Orchestra::new(driver, OrchestraConfig::default())
            .with_poller(poller)
            .with_listener(Box::new(recorder.clone()));
        (clock, orchestra)
    }

    fn tap_text(text: &str) -> Command {
        Command::TapOnElement {
            selector: ElementSelector::text(text),
            retry_if_no_change: None,
            wait_to_settle: None,
        }
    }

    fn login_screen() -> TreeNode {
        screen(vec![node("Login", "[0,0][100,100]")])
    }

    #[test]
    fn test_failure_stops_remaining_commands() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let recorder = Recorder::default();
        let (_, mut orchestra) = orchestra(driver.clone(), &recorder);
        let commands = vec![
            Command::TapOnPoint { x: 1, y: 2 },
            tap_text("Missing"),
            Command::BackPress,
        ];

        let report = orchestra.run_flow_with_report(&commands, None);

        assert!(!report.success);
        assert_eq!(
            report.statuses,
            vec![
                CommandStatus::Completed,
                CommandStatus::Failed,
                CommandStatus::Pending
            ]
        );
        assert_eq!(report.error.unwrap().code, ErrorCode::ElementNotFound);
        assert_eq!(driver.calls_named("back_press"), 0);
        assert_eq!(
            recorder.events(),
            vec![
                "flow:3",
                "start:0",
                "complete:0",
                "start:1",
                "failed:1:ELEMENT_NOT_FOUND"
            ]
        );
    }

    #[test]
    fn test_listener_can_continue_after_failure() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let recorder = Recorder {
            resolution: Some(ErrorResolution::Continue),
            ..Recorder::default()
        };
        let (_, mut orchestra) = orchestra(driver.clone(), &recorder);
        let commands = vec![tap_text("Missing"), Command::BackPress];

        let report = orchestra.run_flow_with_report(&commands, None);

        assert!(report.success);
        assert_eq!(
            report.statuses,
            vec![CommandStatus::Failed, CommandStatus::Completed]
        );
        assert_eq!(driver.calls_named("back_press"), 1);
    }

    #[test]
    fn test_tap_hits_element_center() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        assert!(orchestra.run_flow(&[tap_text("login")], None));
        assert_eq!(driver.taps(), vec![Point::new(50, 50)]);
    }

    #[test]
    fn test_optional_element_is_skipped() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let recorder = Recorder::default();
        let (clock, mut orchestra) = orchestra(driver.clone(), &recorder);
        let commands = vec![
            Command::TapOnElement {
                selector: ElementSelector::text("Dismiss").with_optional(true),
                retry_if_no_change: None,
                wait_to_settle: None,
            },
            Command::BackPress,
        ];

        let report = orchestra.run_flow_with_report(&commands, None);

        assert!(report.success);
        assert_eq!(report.statuses[0], CommandStatus::Skipped);
        assert!(recorder.events().contains(&"skipped:0".to_string()));
        assert_eq!(clock.now(), Duration::from_millis(3_000));
        assert!(driver.taps().is_empty());
    }

    #[test]
    fn test_session_released_after_run() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        assert!(!orchestra.run_flow(&[tap_text("Missing")], None));
        assert!(!driver.is_open());
        assert_eq!(driver.calls_named("open"), 1);
        assert_eq!(driver.calls_named("close"), 1);
    }

    #[test]
    fn test_cancellation_ignores_continue_resolution() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let recorder = Recorder {
            resolution: Some(ErrorResolution::Continue),
            ..Recorder::default()
        };
        let (_, mut orchestra) = orchestra(driver.clone(), &recorder);
        orchestra.poller().cancel_token().cancel();

        let report = orchestra.run_flow_with_report(&[Command::BackPress, Command::Scroll], None);

        assert!(!report.success);
        assert!(report.error.unwrap().is_cancelled());
        assert_eq!(
            report.statuses,
            vec![CommandStatus::Failed, CommandStatus::Pending]
        );
        assert_eq!(driver.calls_named("back_press"), 0);
    }

    fn flow_with_init() -> Vec<Command> {
        vec![
            Command::ApplyConfiguration {
                config: FlowConfig {
                    app_id: Some("com.example".into()),
                    name: Some("checkout".into()),
                    init_flow: Some(vec![Command::InputText {
                        text: "user@example.com".into(),
                    }]),
                },
            },
            tap_text("Login"),
        ]
    }

    #[test]
    fn test_init_state_gives_repeatable_runs() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        driver.set_app_state("com.example", b"logged-in");
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        let commands = flow_with_init();

        let Some(config) = flow_config(&commands) else {
            panic!("flow declares a config");
        };
        let state = orchestra.run_init_flow(config).unwrap();
        assert_eq!(state.app_id, "com.example");
        assert_eq!(std::fs::read(&state.state_file).unwrap(), b"logged-in");
        assert_eq!(driver.calls_named("stop_app"), 1);

        // App state drifts between runs; restoring brings it back.
        driver.set_app_state("com.example", b"dirty");
        let first = orchestra.run_flow_with_report(&commands, Some(&state));
        assert_eq!(driver.app_state("com.example").unwrap(), b"logged-in");
        driver.set_app_state("com.example", b"dirty");
        let second = orchestra.run_flow_with_report(&commands, Some(&state));

        assert!(first.success);
        assert_eq!(first.statuses, second.statuses);
        assert_eq!(driver.calls_named("push_app_state"), 2);
        // The init flow itself ran only once.
        assert_eq!(driver.inputs().len(), 1);

        state.delete().unwrap();
        assert!(!state.state_file.exists());
        state.delete().unwrap();
    }

    #[test]
    fn test_init_flow_runs_when_no_state_given() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        driver.set_app_state("com.example", b"seed");
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());

        assert!(orchestra.run_flow(&flow_with_init(), None));

        let calls = driver.calls();
        let position = |name: &str| calls.iter().position(|c| c == name).unwrap();
        assert!(position("input_text") < position("pull_app_state"));
        assert!(position("clear_app_state") < position("push_app_state"));
        assert!(position("push_app_state") < position("tap"));
    }

    #[test]
    fn test_failed_init_flow_aborts_main_flow() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        driver.fail_next("input_text");
        let recorder = Recorder::default();
        let (_, mut orchestra) = orchestra(driver.clone(), &recorder);

        let report = orchestra.run_flow_with_report(&flow_with_init(), None);

        assert!(!report.success);
        assert_eq!(report.error.unwrap().code, ErrorCode::FlowAborted);
        assert!(report.statuses.iter().all(|s| *s == CommandStatus::Pending));
        assert!(recorder.events().is_empty());
        assert_eq!(driver.calls_named("tap"), 0);
        assert!(!driver.is_open());
    }

    #[test]
    fn test_init_flow_requires_app_id() {
        let driver = Arc::new(FakeDriver::new());
        let (_, mut orchestra) = orchestra(driver, &Recorder::default());
        let config = FlowConfig {
            init_flow: Some(vec![]),
            ..FlowConfig::default()
        };
        let err = orchestra.run_init_flow(&config).unwrap_err();
        assert_eq!(err.code, ErrorCode::FlowAborted);
    }

    #[test]
    fn test_copy_then_paste() {
        let driver = Arc::new(FakeDriver::with_frames(vec![screen(vec![node(
            "ORDER-42",
            "[0,0][10,10]",
        )])]));
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        let commands = vec![
            Command::CopyTextFrom {
                selector: ElementSelector::text("ORDER-.*"),
            },
            Command::PasteText,
        ];
        assert!(orchestra.run_flow(&commands, None));
        assert_eq!(driver.inputs(), vec!["ORDER-42"]);
    }

    #[test]
    fn test_paste_without_copy_fails() {
        let driver = Arc::new(FakeDriver::new());
        let (_, mut orchestra) = orchestra(driver, &Recorder::default());
        let report = orchestra.run_flow_with_report(&[Command::PasteText], None);
        assert_eq!(report.error.unwrap().code, ErrorCode::AssertionFailed);
    }

    #[test]
    fn test_copied_text_does_not_leak_into_next_run() {
        let driver = Arc::new(FakeDriver::with_frames(vec![screen(vec![node(
            "CODE-7",
            "[0,0][10,10]",
        )])]));
        let recorder = Recorder {
            resolution: Some(ErrorResolution::Continue),
            ..Recorder::default()
        };
        let (_, mut orchestra) = orchestra(driver.clone(), &recorder);
        let commands = vec![
            Command::PasteText,
            Command::CopyTextFrom {
                selector: ElementSelector::text("CODE-.*"),
            },
        ];

        let first = orchestra.run_flow_with_report(&commands, None);
        let second = orchestra.run_flow_with_report(&commands, None);
        assert_eq!(
            first.statuses,
            vec![CommandStatus::Failed, CommandStatus::Completed]
        );
        assert_eq!(first.statuses, second.statuses);
        assert!(driver.inputs().is_empty());
    }

    #[test]
    fn test_retry_if_no_change_taps_again() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        let command = Command::TapOnElement {
            selector: ElementSelector::text("Login"),
            retry_if_no_change: Some(true),
            wait_to_settle: None,
        };
        assert!(orchestra.run_flow(&[command], None));
        assert_eq!(driver.taps().len(), 2);
    }

    #[test]
    fn test_assert_not_visible_fails_with_dump() {
        let driver = Arc::new(FakeDriver::with_frames(vec![login_screen()]));
        let (clock, mut orchestra) = orchestra(driver, &Recorder::default());
        let command = Command::AssertCondition {
            condition: Condition {
                not_visible: Some(ElementSelector::text("Login")),
                ..Condition::default()
            },
        };
        let report = orchestra.run_flow_with_report(&[command], None);
        let err = report.error.unwrap();
        assert_eq!(err.code, ErrorCode::AssertionFailed);
        assert!(err.hierarchy_dump.unwrap().contains("Login"));
        assert_eq!(clock.now(), Duration::from_millis(15_000));
    }

    #[test]
    fn test_extended_wait_uses_its_own_timeout() {
        let driver = Arc::new(FakeDriver::with_frames(vec![screen(vec![])]));
        let (clock, mut orchestra) = orchestra(driver, &Recorder::default());
        let command = Command::ExtendedWaitUntil {
            condition: Condition {
                visible: Some(ElementSelector::text("Done")),
                ..Condition::default()
            },
            timeout_ms: Some(40_000),
        };
        assert!(!orchestra.run_flow(&[command], None));
        assert_eq!(clock.now(), Duration::from_millis(40_000));
    }

    #[test]
    fn test_scroll_until_visible() {
        let empty = screen(vec![]);
        let driver = Arc::new(FakeDriver::with_frames(vec![
            empty.clone(),
            empty,
            login_screen(),
        ]));
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        let command = Command::ScrollUntilVisible {
            selector: ElementSelector::text("Login"),
            timeout_ms: None,
        };
        assert!(orchestra.run_flow(&[command], None));
        assert_eq!(driver.calls_named("scroll_vertical"), 2);
    }

    #[test]
    fn test_nested_flows_and_repeat() {
        let driver = Arc::new(FakeDriver::new());
        let recorder = Recorder::default();
        let (_, mut orchestra) = orchestra(driver.clone(), &recorder);
        let commands = vec![
            Command::Repeat {
                times: 3,
                commands: vec![Command::InputText { text: "a".into() }],
            },
            Command::RunFlow {
                commands: vec![Command::BackPress, Command::Scroll],
            },
        ];
        assert!(orchestra.run_flow(&commands, None));
        assert_eq!(driver.inputs(), vec!["a", "a", "a"]);
        assert_eq!(driver.calls_named("back_press"), 1);
        assert_eq!(
            recorder.events(),
            vec!["flow:2", "start:0", "complete:0", "start:1", "complete:1"]
        );
    }

    #[test]
    fn test_launch_app_tolerates_stop_failure() {
        let driver = Arc::new(FakeDriver::new());
        driver.fail_next("stop_app");
        let (_, mut orchestra) = orchestra(driver.clone(), &Recorder::default());
        let command = Command::LaunchApp {
            app_id: "com.example".into(),
            clear_state: Some(true),
            stop_app: None,
        };
        assert!(orchestra.run_flow(&[command], None));
        assert_eq!(driver.calls_named("clear_app_state"), 1);
        assert_eq!(driver.calls_named("launch_app"), 1);
    }

    #[test]
    fn test_take_screenshot_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::new());
        driver.push_screenshots(vec![png(2, 2, [1, 2, 3, 255])]);
        let (_, mut orchestra) = orchestra(driver, &Recorder::default());
        let path = dir.path().join("home");
        let command = Command::TakeScreenshot {
            path: path.to_string_lossy().into_owned(),
        };
        assert!(orchestra.run_flow(&[command], None));
        assert!(dir.path().join("home.png").is_file());
    }

    #[test]
    fn test_wait_for_animation_never_fails() {
        let driver = Arc::new(FakeDriver::new());
        driver.set_screen_static(Some(false));
        let (clock, mut orchestra) = orchestra(driver, &Recorder::default());
        let command = Command::WaitForAnimationToEnd {
            timeout_ms: Some(500),
        };
        assert!(orchestra.run_flow(&[command], None));
        assert_eq!(clock.now(), Duration::from_millis(500));
    }
}
