//! Action descriptors: what to launch when a clap pattern matches

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One thing to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchStep {
    /// Run a program with arguments
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Open an application, optionally with a file or folder
    OpenApp {
        app: String,
        #[serde(default)]
        path: Option<String>,
    },

    /// Open a URL, optionally in a specific browser
    OpenUrl {
        url: String,
        #[serde(default)]
        browser: Option<String>,
        #[serde(default)]
        new_window: bool,
    },
}

impl LaunchStep {
    /// Convenience constructor for a plain command
    pub fn command(command: impl Into<String>, args: &[&str]) -> Self {
        LaunchStep::Command {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Short human-readable label used in logs
    pub fn label(&self) -> String {
        match self {
            LaunchStep::Command { command, .. } => command.clone(),
            LaunchStep::OpenApp { app, path: Some(path) } => format!("{} ({})", app, path),
            LaunchStep::OpenApp { app, path: None } => app.clone(),
            LaunchStep::OpenUrl { url, .. } => url.clone(),
        }
    }
}

/// A named group of launch steps bound to one clap pattern
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Description shown in logs ("Opening workspace")
    #[serde(default)]
    pub description: String,

    /// Steps launched in order
    #[serde(default)]
    pub steps: Vec<LaunchStep>,
}

impl Action {
    pub fn new(description: impl Into<String>, steps: Vec<LaunchStep>) -> Self {
        Self {
            description: description.into(),
            steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok();
        if let Some(home) = home {
            let rest = rest.trim_start_matches(['/', '\\']);
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
