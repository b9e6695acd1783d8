//! Edit command - update overrides in the unit file
//!
//! Every argument is parsed before the file is touched, so a bad argument
//! leaves the unit file unchanged.

use console::style;
use std::path::Path;
use strata_core::{ImageEdit, UnitFile, parse_replicas_arg};

use crate::error::{CliError, Result};

pub fn set_image(dir: &Path, images: &[String]) -> Result<()> {
    let edits = images
        .iter()
        .map(|arg| arg.parse::<ImageEdit>())
        .collect::<strata_core::Result<Vec<_>>>()
        .map_err(CliError::edit)?;

    let mut file = UnitFile::open(dir).map_err(CliError::edit)?;
    for edit in &edits {
        file.set_image(edit).map_err(CliError::edit)?;
    }
    file.save().map_err(CliError::edit)?;

    eprintln!(
        "{} Updated {} image(s) in {}",
        style("✓").green().bold(),
        edits.len(),
        file.path().display()
    );
    Ok(())
}

pub fn set_replicas(dir: &Path, replicas: &[String]) -> Result<()> {
    let counts = replicas
        .iter()
        .map(|arg| parse_replicas_arg(arg))
        .collect::<strata_core::Result<Vec<_>>>()
        .map_err(CliError::edit)?;

    let mut file = UnitFile::open(dir).map_err(CliError::edit)?;
    for (name, count) in &counts {
        file.set_replicas(name, *count).map_err(CliError::edit)?;
    }
    file.save().map_err(CliError::edit)?;

    eprintln!(
        "{} Updated {} replica count(s) in {}",
        style("✓").green().bold(),
        counts.len(),
        file.path().display()
    );
    Ok(())
}
