mod app;
mod cli;
mod paths;

use anyhow::Context;
use clap::Parser;
use std::io::Write;

use sitegen::{Config, Outcome, Update};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the HTML, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    if let Some(cli::Command::Sanitize { file }) = &args.cmd {
        let raw = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        return emit(&sitegen::sanitize(&raw), args.out.as_deref()).await;
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: sitegen \"a dark landing page with pricing\"");
    }

    let config_path = paths::config_path()?;
    let cfg = Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let resolved = app::resolve(&args, cfg.as_ref(), |key| std::env::var(key).ok())?;

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let orch = app::build_orchestrator(&http, resolved);
    let mut generation = orch
        .start(&prompt)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let ctrl_c = orch.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut outcome = None;
    while let Some(update) = generation.next_update().await {
        match update {
            Update::TierStarted(tier) => eprintln!("[{tier}] connecting…"),
            Update::Status(msg) => eprintln!("{msg}"),
            Update::Code(_) | Update::CodeReset | Update::Meta(_) => {}
            Update::Fallback { from, error } => {
                eprintln!("[{from}] {}; falling back", error.user_message())
            }
            Update::Completed { tier, result } => {
                outcome = Some(Outcome::Completed { tier, result });
                break;
            }
            Update::Cancelled => {
                outcome = Some(Outcome::Cancelled);
                break;
            }
            Update::Failed(err) => {
                outcome = Some(Outcome::Failed(err));
                break;
            }
        }
    }

    match outcome {
        Some(Outcome::Completed { tier, result }) => {
            eprintln!("{} (via {tier})", result.content);
            emit(&result.html, args.out.as_deref()).await
        }
        Some(Outcome::Cancelled) => anyhow::bail!("Generation canceled"),
        Some(Outcome::Failed(err)) => anyhow::bail!(err.user_message()),
        None => anyhow::bail!("generation ended without a result"),
    }
}

async fn emit(html: &str, out: Option<&std::path::Path>) -> anyhow::Result<()> {
    match out {
        Some(path) => tokio::fs::write(path, html)
            .await
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(html.as_bytes()).context("failed to write stdout")?;
            if !html.ends_with('\n') {
                writeln!(stdout).ok();
            }
            Ok(())
        }
    }
}
