//! `check-config`: dry-run validation of a configuration file.

use crate::utils;
use anyhow::{Context, Result};
use rust_ndnd_face::{FaceSystem, FaceTable};
use std::path::Path;

pub fn execute(path: &Path) -> Result<()> {
    let section = utils::load_face_system_section(path)?;

    let face_system = FaceSystem::new(FaceTable::new());
    face_system
        .process_config(&section, true)
        .with_context(|| format!("{} is invalid", path.display()))?;

    println!("{} is OK", path.display());
    Ok(())
}
