//! Fire-and-forget launcher for clap actions

use crate::action::{expand_home, Action, LaunchStep};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Launcher errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Path does not exist: {0}")]
    PathNotFound(String),

    #[error("Failed to launch {0}: {1}")]
    SpawnFailed(String, String),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

/// Launcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Working directory for launched processes
    pub working_dir: Option<String>,

    /// Extra environment variables
    pub env_vars: HashMap<String, String>,
}

/// Outcome of executing one action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    /// Labels of steps that were spawned
    pub launched: Vec<String>,

    /// Labels and error messages of steps that failed
    pub failed: Vec<(String, String)>,
}

impl LaunchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Launches action steps without waiting for them
///
/// Children are reaped on the runtime passed at construction so the
/// caller (the detection worker) never blocks on them.
#[derive(Debug, Clone)]
pub struct Launcher {
    config: LauncherConfig,
    platform: Platform,
    runtime: Handle,
}

impl Launcher {
    /// Create new launcher bound to a runtime
    pub fn new(config: LauncherConfig, runtime: Handle) -> Self {
        Self {
            config,
            platform: Platform::current(),
            runtime,
        }
    }

    /// Create a launcher bound to the runtime of the calling context
    pub fn from_current(config: LauncherConfig) -> Result<Self, LaunchError> {
        let runtime = Handle::try_current().map_err(|e| LaunchError::NoRuntime(e.to_string()))?;
        Ok(Self::new(config, runtime))
    }

    /// Override the detected platform (argv translation only)
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Launch every step of an action, continuing past failures
    pub fn execute(&self, action: &Action) -> LaunchReport {
        if !action.description.is_empty() {
            info!("[{}]...", action.description);
        }

        let mut report = LaunchReport::default();
        for step in &action.steps {
            let label = step.label();
            match self.launch(step) {
                Ok(pid) => {
                    debug!("Launched {} (pid {:?})", label, pid);
                    report.launched.push(label);
                }
                Err(e) => {
                    warn!("Failed to launch {}: {}", label, e);
                    report.failed.push((label, e.to_string()));
                }
            }
        }

        info!(
            "Launch sequence complete: {}/{} steps started",
            report.launched.len(),
            action.steps.len()
        );
        report
    }

    /// Spawn a single step; returns the child pid when known
    pub fn launch(&self, step: &LaunchStep) -> Result<Option<u32>, LaunchError> {
        let argv = self.argv(step)?;
        let (program, args) = argv.split_first().ok_or(LaunchError::EmptyCommand)?;
        let program = self.resolve_command_path(program);

        debug!("Spawning {} {:?}", program, args);

        // tokio::process needs the runtime context to register the child
        let _guard = self.runtime.enter();

        let mut cmd = TokioCommand::new(&program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(ref wd) = self.config.working_dir {
            cmd.current_dir(expand_home(wd));
        }

        for (key, value) in &self.config.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::SpawnFailed(program.clone(), e.to_string()))?;
        let pid = child.id();

        self.runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("{} exited", program),
                Ok(status) => warn!("{} exited with {}", program, status),
                Err(e) => warn!("Failed to wait for {}: {}", program, e),
            }
        });

        Ok(pid)
    }

    /// Translate a step into a concrete argv for this platform
    pub fn argv(&self, step: &LaunchStep) -> Result<Vec<String>, LaunchError> {
        let argv = match step {
            LaunchStep::Command { command, args } => {
                if command.trim().is_empty() {
                    return Err(LaunchError::EmptyCommand);
                }
                let mut argv = vec![command.clone()];
                argv.extend(args.iter().map(|a| expand_home(a).to_string_lossy().to_string()));
                argv
            }
            LaunchStep::OpenApp { app, path } => {
                if app.trim().is_empty() {
                    return Err(LaunchError::EmptyCommand);
                }
                if let Some(path) = path {
                    let expanded = expand_home(path);
                    if !expanded.exists() {
                        return Err(LaunchError::PathNotFound(expanded.display().to_string()));
                    }
                }
                self.platform.open_app_argv(app, path.as_deref())
            }
            LaunchStep::OpenUrl {
                url,
                browser,
                new_window,
            } => self
                .platform
                .open_url_argv(url, browser.as_deref(), *new_window),
        };

        Ok(argv)
    }

    /// Resolve command path
    fn resolve_command_path(&self, command: &str) -> String {
        if std::path::Path::new(command).is_absolute() {
            return command.to_string();
        }

        if let Ok(path) = which::which(command) {
            return path.to_string_lossy().to_string();
        }

        // Use command as-is if not found (will fail at spawn)
        command.to_string()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}
