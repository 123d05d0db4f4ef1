use anyhow::Context;
use clap::{Parser, Subcommand};

use cadenza_sources::{ProgressSink, ProgressTracker, TrackSourceResolver};
use cadenza_tools::config::ToolsConfig;
use cadenza_tools::default_installer;

#[derive(Parser)]
#[command(name = "cadenza", version, about = "Cadenza external tool manager")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Install (or verify) a tool and print its binary path
    Install { tool: String },
    /// List installed tools from the local manifest
    List,
    /// Re-check an installed binary against its manifest record
    Verify { tool: String },
    /// Remove a tool's binary and manifest record
    Uninstall { tool: String },
    /// Sweep stray temp files from the download scratch directory
    CleanCache,
    /// Resolve a track source, extracting audio when it needs it
    Resolve {
        source: String,
        #[arg(long, default_value = "default")]
        playlist: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cadenza_util::init_tracing().map_err(|e| anyhow::anyhow!("{e}"))?;

    let config = ToolsConfig::from_env();
    let installer = default_installer(&config)?;

    match Cli::parse().cmd {
        Cmd::Install { tool } => {
            let path = installer.ensure_installed(&tool).await?;
            println!("{}", path.display());
        }
        Cmd::List => {
            for (name, record) in installer.installed_tools() {
                println!(
                    "{name} {} {}",
                    record.version,
                    record.binary_path.display()
                );
            }
        }
        Cmd::Verify { tool } => {
            let outcome = installer.verify_installed(&tool)?;
            println!("{outcome:?}");
        }
        Cmd::Uninstall { tool } => {
            if installer.uninstall(&tool).await? {
                println!("removed {tool}");
            } else {
                println!("{tool} is not installed");
            }
        }
        Cmd::CleanCache => {
            let removed = installer.clean_downloads()?;
            println!("removed {removed} stray download(s)");
        }
        Cmd::Resolve { source, playlist } => {
            let (sink, mut events) = ProgressSink::channel();
            let printer = tokio::spawn(async move {
                let mut tracker = ProgressTracker::new();
                while let Some((request_id, event)) = events.recv().await {
                    let view = tracker.apply(&request_id, &event);
                    match view.progress {
                        Some(pct) => eprintln!("[{:?}] {} ({pct}%)", view.stage, view.message),
                        None => eprintln!("[{:?}] {}", view.stage, view.message),
                    }
                }
            });

            let resolver = TrackSourceResolver::new(installer, config, sink);
            let resolved = resolver.resolve(&source, &playlist, "cli").await?;
            drop(resolver);
            printer.await.context("progress printer failed")?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
    }

    Ok(())
}
