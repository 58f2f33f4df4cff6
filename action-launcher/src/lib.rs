//! Action launcher - fire-and-forget execution of clap actions
//!
//! This crate provides:
//! - Serializable action descriptors (commands, apps, URLs)
//! - Platform translation of "open app" / "open URL" steps
//! - A launcher that spawns steps without waiting for them

pub mod action;
pub mod launcher;
pub mod platform;

pub use action::{expand_home, Action, LaunchStep};
pub use launcher::{LaunchError, LaunchReport, Launcher, LauncherConfig};
pub use platform::Platform;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
