use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the debug collector binary.
///
/// Runs one collection described by a YAML file and writes enriched rows as
/// NDJSON. State is read from and written back to a blob file, so repeated
/// invocations resume instead of re-collecting.
#[derive(Parser, Debug)]
#[clap(
    name = "aws-log-collector",
    about = "Collect AWS log artifacts into enriched NDJSON rows"
)]
pub struct Args {
    /// Path to the collection YAML file
    #[clap(short = 'c', long)]
    pub config: PathBuf,

    /// State blob file; read on start when present, rewritten on checkpoints
    #[clap(short, long)]
    pub state: Option<PathBuf>,

    /// Output NDJSON file (default: stdout)
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}
