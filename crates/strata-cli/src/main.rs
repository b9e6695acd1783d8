//! Strata CLI - compose Kubernetes manifests from layered units

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use display::ErrorFormat;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Strata Contributors")]
#[command(version)]
#[command(about = "Compose Kubernetes manifests from bases, overlays and patches", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a unit and print its resources
    Build(commands::build::BuildArgs),

    /// Change the unit file in place
    Edit {
        #[command(subcommand)]
        command: EditCommand,
    },
}

#[derive(Subcommand)]
enum EditCommand {
    /// Set a field of the unit file
    #[command(subcommand)]
    Set(SetCommand),
}

#[derive(Subcommand)]
enum SetCommand {
    /// Add or update image overrides
    Image {
        /// <name>=<newName>[:tag][@digest]
        #[arg(required = true)]
        images: Vec<String>,

        /// Unit directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Add or update replica overrides
    Replicas {
        /// <name>=<count>
        #[arg(required = true)]
        replicas: Vec<String>,

        /// Unit directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

/// Log to stderr, filtered by STRATA_LOG (default `warn`)
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.debug {
        // SAFETY: We're the only thread at this point (start of main)
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }

    let (result, format) = match cli.command {
        Commands::Build(args) => (commands::build::run(&args), args.error_format),

        Commands::Edit {
            command: EditCommand::Set(SetCommand::Image { images, dir }),
        } => (commands::edit::set_image(&dir, &images), ErrorFormat::Human),

        Commands::Edit {
            command: EditCommand::Set(SetCommand::Replicas { replicas, dir }),
        } => (commands::edit::set_replicas(&dir, &replicas), ErrorFormat::Human),
    };

    let code = match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            display::report(err, format);
            code
        }
    };
    if code != exit_codes::SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}
