//! Flow commands.
//!
//! Commands arrive already parsed; on the wire each is a JSON object tagged
//! by `"command"`:
//!
//! ```json
//! {"command": "tap_on_element", "selector": {"textRegex": "Login"}}
//! {"command": "input_text", "text": "hello"}
//! {"command": "assert_condition", "condition": {"visible": {"idRegex": "home"}}}
//! ```

use serde::{Deserialize, Serialize};

use crate::selector::ElementSelector;

/// Flow-level settings, usually the first command of a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Setup commands whose resulting app state is captured and reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_flow: Option<Vec<Command>>,
}

/// Screen condition checked by assertions and waits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<ElementSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_visible: Option<ElementSelector>,
}

impl Condition {
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(selector) = &self.visible {
            parts.push(format!("{} is visible", selector.description()));
        }
        if let Some(selector) = &self.not_visible {
            parts.push(format!("{} is not visible", selector.description()));
        }
        if parts.is_empty() {
            "true".to_string()
        } else {
            parts.join(" and ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    ApplyConfiguration {
        config: FlowConfig,
    },
    TapOnElement {
        selector: ElementSelector,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_if_no_change: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_to_settle: Option<bool>,
    },
    TapOnPoint {
        x: i32,
        y: i32,
    },
    AssertCondition {
        condition: Condition,
    },
    ExtendedWaitUntil {
        condition: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    InputText {
        text: String,
    },
    Scroll,
    ScrollUntilVisible {
        selector: ElementSelector,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    BackPress,
    LaunchApp {
        app_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clear_state: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_app: Option<bool>,
    },
    StopApp {
        app_id: String,
    },
    ClearState {
        app_id: String,
    },
    WaitForAnimationToEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    TakeScreenshot {
        path: String,
    },
    CopyTextFrom {
        selector: ElementSelector,
    },
    PasteText,
    RunFlow {
        commands: Vec<Command>,
    },
    Repeat {
        times: u32,
        commands: Vec<Command>,
    },
}

impl Command {
    /// One-line summary for listeners and logs.
    pub fn description(&self) -> String {
        match self {
            Command::ApplyConfiguration { config } => match &config.name {
                Some(name) => format!("Apply configuration \"{}\"", name),
                None => "Apply configuration".to_string(),
            },
            Command::TapOnElement { selector, .. } => {
                format!("Tap on {}", selector.description())
            }
            Command::TapOnPoint { x, y } => format!("Tap on point ({}, {})", x, y),
            Command::AssertCondition { condition } => {
                format!("Assert that {}", condition.description())
            }
            Command::ExtendedWaitUntil { condition, .. } => {
                format!("Wait until {}", condition.description())
            }
            Command::InputText { text } => format!("Input text \"{}\"", text),
            Command::Scroll => "Scroll vertically".to_string(),
            Command::ScrollUntilVisible { selector, .. } => {
                format!("Scroll until {} is visible", selector.description())
            }
            Command::BackPress => "Press back".to_string(),
            Command::LaunchApp { app_id, .. } => format!("Launch app \"{}\"", app_id),
            Command::StopApp { app_id } => format!("Stop app \"{}\"", app_id),
            Command::ClearState { app_id } => format!("Clear state of \"{}\"", app_id),
            Command::WaitForAnimationToEnd { .. } => "Wait for animation to end".to_string(),
            Command::TakeScreenshot { path } => format!("Take screenshot {}", path),
            Command::CopyTextFrom { selector } => {
                format!("Copy text from {}", selector.description())
            }
            Command::PasteText => "Paste text".to_string(),
            Command::RunFlow { commands } => format!("Run flow ({} commands)", commands.len()),
            Command::Repeat { times, commands } => {
                format!("Repeat {} times ({} commands)", times, commands.len())
            }
        }
    }
}

/// Find the flow configuration among `commands`, if one is declared.
pub fn flow_config(commands: &[Command]) -> Option<&FlowConfig> {
    commands.iter().find_map(|command| match command {
        Command::ApplyConfiguration { config } => Some(config),
        _ => None,
    })
}
