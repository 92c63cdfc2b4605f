//! fsbatch command-line runner.
//!
//! Reads a JSON batch, runs it against a temporary or persistent store and
//! prints the read results as JSON on stdout. Logs go to stderr.
//!
//! Usage:
//!   fsbatch batch.json
//!   fsbatch --persistent ~/.local/share/fsbatch --quota 1048576 batch.json
//!   echo '[{"cmd":"mkdir","name":"Foo"}]' | fsbatch --report -
//!
//! Exit status: 0 when the batch succeeds, 1 when it stops on a failed step,
//! 2 when setup or parsing fails.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, fmt};

use fsbatch_kernel::batch::{ParsedBatch, parse_batch, result_to_json};
use fsbatch_kernel::config::{Config, StorageKind};
use fsbatch_kernel::{BatchExecutor, Session};

/// Run a JSON batch of file operations in a sandboxed store.
#[derive(Parser, Debug)]
#[command(name = "fsbatch")]
#[command(about = "Run file-operation batches against a quota-limited sandbox")]
struct Args {
    /// Config file (default: <config_dir>/fsbatch/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use persistent storage rooted at DIR
    #[arg(long, value_name = "DIR")]
    persistent: Option<PathBuf>,

    /// Storage quota in bytes
    #[arg(long, value_name = "BYTES")]
    quota: Option<u64>,

    /// Base URL for relative fetch URLs
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Print the per-step report alongside the read results
    #[arg(long)]
    report: bool,

    /// Batch file, or `-` for stdin
    batch: PathBuf,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using default config");
                Config::load(&path)?
            }
            None => Config::default(),
        },
    };

    if let Some(root) = &args.persistent {
        config.storage.kind = StorageKind::Persistent;
        config.storage.root = Some(root.clone());
    }
    if let Some(quota) = args.quota {
        config.storage.quota_bytes = quota;
    }
    if let Some(base) = &args.base_url {
        config.transport.base_url = Some(base.clone());
    }
    Ok(config)
}

async fn read_batch(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read batch from stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read batch {}", path.display()))
    }
}

async fn setup(args: &Args) -> Result<(Session, ParsedBatch)> {
    let config = load_config(args)?;
    let text = read_batch(&args.batch).await?;
    let parsed = parse_batch(&text)?;
    let session = Session::connect(&config)
        .await
        .context("failed to open storage")?;
    Ok((session, parsed))
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let (mut session, parsed) = match setup(&args).await {
        Ok(ready) => ready,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    tracing::info!(steps = parsed.batch.len(), "running batch");
    let report = BatchExecutor::new(&mut session)
        .run_report(parsed.batch)
        .await;

    let results: Map<String, Value> = parsed
        .results
        .iter()
        .map(|(label, sink)| (label.clone(), result_to_json(&sink.get())))
        .collect();

    let output = if args.report {
        let mut out = match serde_json::to_value(&report) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        out.insert("results".into(), Value::Object(results));
        Value::Object(out)
    } else {
        Value::Object(results)
    };

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            tracing::error!("failed to encode results: {e}");
            return ExitCode::from(2);
        }
    }

    if report.success {
        tracing::info!(used = session.storage().used(), "batch succeeded");
        ExitCode::SUCCESS
    } else {
        tracing::warn!(skipped = report.skipped, "batch failed");
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["fsbatch", "--config", "/nonexistent/fsbatch.toml"];
        argv.extend_from_slice(extra);
        argv.push("batch.json");
        Args::parse_from(argv)
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(load_config(&args(&[])).is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from([
            "fsbatch",
            "--persistent",
            "/srv/store",
            "--quota",
            "42",
            "--base-url",
            "https://example.com/",
            "-",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.storage.kind, StorageKind::Persistent);
        assert_eq!(config.storage.root, Some(PathBuf::from("/srv/store")));
        assert_eq!(config.storage.quota_bytes, 42);
        assert_eq!(
            config.transport.base_url.as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(args.batch, PathBuf::from("-"));
    }
}
