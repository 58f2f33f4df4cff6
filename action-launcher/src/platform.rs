//! Platform abstraction for OS-specific launch commands

use crate::action::expand_home;
use serde::{Deserialize, Serialize};

/// Platform identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
    Unknown,
}

impl Platform {
    /// Get current platform
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Unknown
        }
    }

    /// Get platform name as string
    pub fn name(&self) -> &str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOS => "macos",
            Platform::Windows => "windows",
            Platform::Unknown => "unknown",
        }
    }

    /// Generic "open this thing" command
    pub fn opener(&self) -> Vec<String> {
        match self {
            Platform::MacOS => vec!["open".to_string()],
            Platform::Windows => vec![
                "cmd".to_string(),
                "/C".to_string(),
                "start".to_string(),
                String::new(),
            ],
            Platform::Linux | Platform::Unknown => vec!["xdg-open".to_string()],
        }
    }

    /// Argv that opens an application, optionally with a path
    pub fn open_app_argv(&self, app: &str, path: Option<&str>) -> Vec<String> {
        let path = path.map(|p| expand_home(p).to_string_lossy().to_string());

        match self {
            Platform::MacOS => {
                let mut argv = vec!["open".to_string(), "-a".to_string(), app.to_string()];
                argv.extend(path);
                argv
            }
            Platform::Windows => {
                let mut argv = self.opener();
                argv.push(app.to_string());
                argv.extend(path);
                argv
            }
            // No app registry on Linux: the app name is the binary
            Platform::Linux | Platform::Unknown => {
                let mut argv = vec![app.to_string()];
                argv.extend(path);
                argv
            }
        }
    }

    /// Argv that opens a URL, optionally in a named browser
    pub fn open_url_argv(&self, url: &str, browser: Option<&str>, new_window: bool) -> Vec<String> {
        match (self, browser) {
            (Platform::MacOS, Some(browser)) if new_window => vec![
                "open".to_string(),
                "-na".to_string(),
                browser.to_string(),
                "--args".to_string(),
                "--new-window".to_string(),
                url.to_string(),
            ],
            (Platform::MacOS, Some(browser)) => vec![
                "open".to_string(),
                "-a".to_string(),
                browser.to_string(),
                url.to_string(),
            ],
            (Platform::Linux | Platform::Unknown, Some(browser)) => {
                let mut argv = vec![browser.to_string()];
                if new_window {
                    argv.push("--new-window".to_string());
                }
                argv.push(url.to_string());
                argv
            }
            _ => {
                let mut argv = self.opener();
                argv.push(url.to_string());
                argv
            }
        }
    }
}
