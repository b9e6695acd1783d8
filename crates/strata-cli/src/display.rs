//! Error reporting for the CLI
//!
//! stdout carries only manifests, so every report goes to stderr.

use clap::ValueEnum;

use crate::error::CliError;

/// How a failed command reports its error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ErrorFormat {
    /// Rendered diagnostic with code and help
    #[default]
    Human,
    /// One JSON object with code, kind, unit, message and help
    Json,
}

pub fn report(err: CliError, format: ErrorFormat) {
    match format {
        ErrorFormat::Human => eprintln!("{:?}", miette::Report::new(err)),
        ErrorFormat::Json => {
            let json = err.to_json();
            match serde_json::to_string_pretty(&json) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}", json),
            }
        }
    }
}
