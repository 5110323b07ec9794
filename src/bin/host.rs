//! Headless voice host.
//!
//! Usage: `voxface-host <user-id> [--config <path>]` or
//! `voxface-host --devices`.
//!
//! Engine events are written to stdout as JSON lines; all tracing output
//! goes to stderr so stdout stays machine readable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use voxface::audio::{CpalSink, CpalSource};
use voxface::host::run_stdio_host;
use voxface::{EngineConfig, VoiceEngine};

struct Args {
    user_id: Option<String>,
    config: Option<PathBuf>,
    devices: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        user_id: None,
        config: None,
        devices: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--devices" => args.devices = true,
            flag if flag.starts_with('-') => bail!("unknown option '{flag}'"),
            _ if args.user_id.is_none() => args.user_id = Some(arg),
            _ => bail!("unexpected argument '{arg}'"),
        }
    }
    Ok(args)
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalSource::list_input_devices()? {
        println!("  - {name}");
    }
    println!("\nOutput devices:");
    for name in CpalSink::list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxface=info")),
        )
        .init();

    let args = parse_args()?;
    if args.devices {
        return list_devices();
    }
    let Some(user_id) = args.user_id else {
        bail!("usage: voxface-host <user-id> [--config <path>] | --devices");
    };

    let config = match args.config {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::load_or_default()?,
    };

    tracing::info!("voxface-host starting as {user_id}");
    let engine = Arc::new(VoiceEngine::with_defaults(config)?);

    run_stdio_host(engine, &user_id).await.map_err(|e| {
        tracing::error!("voxface-host exited with error: {e}");
        anyhow::anyhow!("voxface-host failed: {e}")
    })?;

    tracing::info!("voxface-host shut down cleanly");
    Ok(())
}
