use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use aws_log_collector::collector::RunContext;
use aws_log_collector::config::CollectionConfig;
use aws_log_collector::errors::{CollectError, CollectResult};
use aws_log_collector::plugin::{CollectorPlugin, RowSink};

mod cli;

use cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging(args.verbose)?;

    let runtime = Runtime::new().context("Failed to create async runtime")?;
    runtime.block_on(run(args))
}

fn initialize_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logging")
}

async fn run(args: Args) -> Result<()> {
    let config = CollectionConfig::from_yaml_file(&args.config)?;
    info!("Starting collection for table {}", config.table);

    let state_blob = match &args.state {
        Some(path) if path.exists() => Some(
            fs::read_to_string(path)
                .context(format!("Failed to read state file: {}", path.display()))?,
        ),
        _ => None,
    };

    let mut plugin = CollectorPlugin::new();
    plugin.init(config, state_blob)?;

    let ctx = RunContext::new();
    let cancel = ctx.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping collection");
            cancel.cancel();
        }
    });

    let mut sink = NdjsonSink::create(args.output.clone(), args.state.clone())?;
    let summary = plugin.collect(&ctx, &mut sink).await?;
    sink.flush()?;

    info!("{}", summary);
    Ok(())
}

/// Writes one JSON row per line and mirrors state blobs to a file so the
/// next invocation resumes.
struct NdjsonSink {
    out: Box<dyn Write>,
    state_path: Option<PathBuf>,
}

impl NdjsonSink {
    fn create(output: Option<PathBuf>, state_path: Option<PathBuf>) -> Result<Self> {
        let out: Box<dyn Write> = match output {
            Some(path) => Box::new(
                fs::File::create(&path)
                    .context(format!("Failed to create output file: {}", path.display()))?,
            ),
            None => Box::new(io::stdout()),
        };
        Ok(NdjsonSink { out, state_path })
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush output")
    }

    fn persist_state(&self, blob: &str) -> CollectResult<()> {
        if let Some(path) = &self.state_path {
            fs::write(path, blob).map_err(|e| {
                CollectError::Fatal(format!("cannot write state file {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}

impl RowSink for NdjsonSink {
    fn on_row(&mut self, row: &[u8], state_blob: Option<&str>) -> CollectResult<()> {
        self.out
            .write_all(row)
            .and_then(|_| self.out.write_all(b"\n"))
            .map_err(|e| CollectError::Fatal(format!("cannot write row: {}", e)))?;
        if let Some(blob) = state_blob {
            self.persist_state(blob)?;
        }
        Ok(())
    }

    fn on_checkpoint(&mut self, state_blob: &str) -> CollectResult<()> {
        self.persist_state(state_blob)
    }
}
