//! Core types and logic for orchestra.
//!
//! This crate interprets flows of declarative UI commands against a live,
//! constantly changing accessibility tree. It is used by the `orchestra` CLI
//! and by anything else that embeds flow execution.
//!
//! # Modules
//!
//! - [`hierarchy`]: Tree nodes, bounds, and flattened snapshots
//! - [`selector`]: Declarative element selectors
//! - [`filters`]: Predicate algebra and the selector compiler
//! - [`resolver`]: Retry loop that waits for a selector to match
//! - [`settle`]: Screen-settle detection (screenshot diff or hierarchy)
//! - [`commands`]: Flow commands
//! - [`orchestra`]: Flow execution, listeners, and init-state capture
//! - [`driver`]: Device driver contract and scoped sessions
//! - [`clock`]: Injectable time source and cancellable pauses
//! - [`config`]: Timeouts and thresholds
//! - [`error`]: Error types with actionable suggestions
//!
//! # Lookup deadlines
//!
//! | Selector | Deadline | On miss |
//! |----------|----------|---------|
//! | **Required** | `lookup_timeout_ms` (15 s) | command fails with `ELEMENT_NOT_FOUND` |
//! | **Optional** | `optional_lookup_timeout_ms` (3 s) | command is skipped |
//!
//! Every wait goes through [`clock::Poller`], so tests drive time with
//! [`clock::ManualClock`] and hosts cancel runs through its token.

pub mod clock;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod filters;
pub mod hierarchy;
pub mod orchestra;
pub mod resolver;
pub mod selector;
pub mod settle;

#[cfg(test)]
pub(crate) mod test_support;
