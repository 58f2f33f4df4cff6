//! Action launcher CLI
//!
//! Runs the primary or secondary action of a clapwake config file without
//! having to say the wake word and clap.

use action_launcher::{Action, Launcher, LauncherConfig, Platform};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActionsFile {
    actions: ActionsSection,
    launcher: LauncherConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActionsSection {
    primary: Action,
    secondary: Action,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("info") => show_platform_info(),
        Some("run") => {
            let (Some(path), Some(which)) = (args.get(2), args.get(3)) else {
                bail!("Usage: action-launcher run <config.json> <primary|secondary>");
            };
            run_action(path, which).await?;
        }
        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("Action Launcher v{}", action_launcher::VERSION);
    println!();
    println!("Usage:");
    println!("  action-launcher info                               Show platform launch commands");
    println!("  action-launcher run <config.json> primary|secondary Run a configured action");
}

fn show_platform_info() {
    let platform = Platform::current();
    println!("Platform: {}", platform.name());
    println!("  Opener: {}", platform.opener().join(" "));
    println!(
        "  Example URL: {}",
        platform
            .open_url_argv("https://example.com", None, false)
            .join(" ")
    );
}

async fn run_action(path: &str, which: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let file: ActionsFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;

    let action = match which {
        "primary" => file.actions.primary,
        "secondary" => file.actions.secondary,
        other => bail!("Unknown action '{}', expected primary or secondary", other),
    };

    if action.is_empty() {
        println!("Action '{}' has no steps", which);
        return Ok(());
    }

    let launcher = Launcher::from_current(file.launcher)?;
    let report = launcher.execute(&action);

    for label in &report.launched {
        println!("  started {}", label);
    }
    for (label, error) in &report.failed {
        eprintln!("  failed  {}: {}", label, error);
    }

    // Give the reaper tasks a moment before the runtime shuts down
    tokio::time::sleep(Duration::from_millis(200)).await;

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
