//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Declarative UI flows against recorded device sessions.
///
/// Runs flows of UI commands (tap, assert, input, scroll, ...) and resolves
/// their element selectors against accessibility trees with the same retry
/// and settle rules used on live devices.
#[derive(Debug, Parser)]
#[command(name = "orchestra", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a flow against a recorded session
    #[command(after_help = "\
Examples:
  orchestra run login.json --session recording.json
  orchestra run login.json --session recording.json --json
  orchestra run login.json --session recording.json --lookup-timeout 2000
  ORCHESTRA_CONFIG=ci.json orchestra run login.json --session recording.json")]
    Run(RunArgs),

    /// Evaluate a selector against a single hierarchy
    #[command(after_help = "\
Examples:
  orchestra query '{\"textRegex\": \"Log ?in\"}' --hierarchy screen.json
  orchestra query '{\"idRegex\": \"item\", \"below\": {\"textRegex\": \"Cart\"}}' --hierarchy screen.json")]
    Query(QueryArgs),

    /// Show an end-to-end usage example
    Examples,
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Flow file: a JSON array of commands
    pub flow: PathBuf,

    /// Recorded session to replay
    #[arg(long, value_name = "RECORDING")]
    pub session: PathBuf,

    /// Configuration file (overrides ORCHESTRA_CONFIG)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Deadline for required element lookups in milliseconds
    #[arg(long, value_name = "MS")]
    pub lookup_timeout: Option<u64>,

    /// Deadline for optional element lookups in milliseconds
    #[arg(long, value_name = "MS")]
    pub optional_timeout: Option<u64>,

    /// Print the flow report as JSON instead of per-command progress
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct QueryArgs {
    /// Selector as JSON
    pub selector: String,

    /// Hierarchy file: one JSON tree node
    #[arg(long, value_name = "FILE")]
    pub hierarchy: PathBuf,

    /// Print matches as JSON
    #[arg(long)]
    pub json: bool,
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: Log in and check the home screen

# 1. Write a flow (login.json)
[
  {"command": "apply_configuration", "config": {"app_id": "com.example", "name": "login"}},
  {"command": "launch_app", "app_id": "com.example", "clear_state": true},
  {"command": "tap_on_element", "selector": {"textRegex": "Email"}},
  {"command": "input_text", "text": "user@example.com"},
  {"command": "tap_on_element", "selector": {"textRegex": "Allow", "optional": true}},
  {"command": "tap_on_element", "selector": {"textRegex": "Log ?in", "below": {"idRegex": "password"}}},
  {"command": "assert_condition", "condition": {"visible": {"idRegex": "home_title"}}}
]

# 2. Record the screens the app shows (recording.json)
{"frames": [ {"attributes": {"bounds": "[0,0][1080,1920]"}, "children": [...]}, ... ]}

# 3. Check a selector against one screen
orchestra query '{"textRegex": "Log ?in"}' --hierarchy screen.json

# 4. Run the flow
orchestra run login.json --session recording.json

# Optional selectors that never match are skipped after 3s; anything else
# that does not appear within 15s fails the flow with a dump of what was
# on screen. Exit code is 1 when the flow fails.
"#;
