//! Per-command progress lines for interactive runs.

use chrono::Local;
use orchestra_core::commands::Command;
use orchestra_core::error::OrchestraError;
use orchestra_core::orchestra::{ErrorResolution, FlowListener};

/// Prints one line per command transition to stderr.
pub struct ConsoleListener;

impl ConsoleListener {
    fn line(status: &str, index: usize, command: &Command) -> String {
        format!(
            "[{}] {:<4} {:>3}  {}",
            Local::now().format("%H:%M:%S%.3f"),
            status,
            index + 1,
            command.description()
        )
    }
}

impl FlowListener for ConsoleListener {
    fn on_flow_start(&self, commands: &[Command]) {
        eprintln!("Running {} command(s)", commands.len());
    }

    fn on_command_start(&self, index: usize, command: &Command) {
        eprintln!("{}", Self::line("RUN", index, command));
    }

    fn on_command_complete(&self, index: usize, command: &Command) {
        eprintln!("{}", Self::line("OK", index, command));
    }

    fn on_command_skipped(&self, index: usize, command: &Command) {
        eprintln!("{}", Self::line("SKIP", index, command));
    }

    fn on_command_failed(
        &self,
        index: usize,
        command: &Command,
        error: &OrchestraError,
    ) -> ErrorResolution {
        eprintln!("{}", Self::line("FAIL", index, command));
        eprintln!("      {}", error);
        if let Some(dump) = &error.hierarchy_dump {
            eprintln!("      Visible elements:");
            for line in dump.lines() {
                eprintln!("        {}", line);
            }
        }
        ErrorResolution::Fail
    }
}
