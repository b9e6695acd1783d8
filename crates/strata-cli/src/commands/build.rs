//! Build command - build a unit and print its resources

use clap::Args;
use console::style;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use strata_engine::{DEFAULT_REMOTE_TIMEOUT, Engine, LoadRestrictor};

use crate::display::ErrorFormat;
use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Unit directory
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Write the manifests to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Time limit for each remote fetch, in seconds
    #[arg(long, env = "STRATA_REMOTE_TIMEOUT", value_name = "SECS", default_value_t = DEFAULT_REMOTE_TIMEOUT.as_secs())]
    pub remote_timeout: u64,

    /// Remote fetch cache (default: user cache dir)
    #[arg(long, env = "STRATA_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of units built at once (default: CPU count)
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Which files a unit may read: root-only or none
    #[arg(long, default_value_t = LoadRestrictor::RootOnly)]
    pub load_restrictor: LoadRestrictor,

    /// Error report format
    #[arg(long, value_enum, default_value_t = ErrorFormat::Human)]
    pub error_format: ErrorFormat,
}

pub fn run(args: &BuildArgs) -> Result<()> {
    if args.remote_timeout == 0 {
        return Err(CliError::usage("--remote-timeout must be at least 1 second"));
    }

    let mut builder = Engine::builder()
        .remote_timeout(Duration::from_secs(args.remote_timeout))
        .load_restrictor(args.load_restrictor);
    if let Some(dir) = &args.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(max_parallel) = args.max_parallel {
        if max_parallel == 0 {
            return Err(CliError::usage("--max-parallel must be at least 1"));
        }
        builder = builder.max_parallel(max_parallel);
    }
    let engine = builder.build();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::internal(format!("failed to start the async runtime: {}", e)))?;
    let output = runtime.block_on(engine.build(&args.path))?;

    for record in &output.generated {
        tracing::debug!(
            kind = %record.kind,
            name = %record.name,
            digest = %record.content_digest,
            "generated"
        );
    }

    let yaml = output
        .to_yaml()
        .map_err(|e| CliError::internal(format!("failed to serialize output: {}", e)))?;

    match &args.output {
        Some(path) => {
            fs::write(path, yaml)?;
            eprintln!(
                "{} Wrote {} resources to {}",
                style("✓").green().bold(),
                output.resources.len(),
                path.display()
            );
        }
        None => print!("{}", yaml),
    }

    Ok(())
}
