//! Settings layering and output handling for the CLI.
//!
//! Built-in defaults are overlaid by an optional TOML file, which is in turn
//! overlaid by command-line flags.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use beltflow_gcode::CylinderSettings;
use clap::Args;
use tempfile::NamedTempFile;

/// File name used when no output path is given.
pub const DEFAULT_OUTPUT_NAME: &str = "output.gcode";

/// Command-line overrides for [`CylinderSettings`].
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    /// Height climbed per spiral revolution in mm (default: from the base file)
    #[arg(long, value_name = "MM")]
    pub layer_height: Option<f64>,

    /// Height of each constant-flow section in mm
    #[arg(long, value_name = "MM")]
    pub section_height: Option<f64>,

    /// Flow percentage of the first section (default: from the base file)
    #[arg(long, value_name = "PERCENT")]
    pub initial_flow: Option<f64>,

    /// Flow percentage added per section; may be negative
    #[arg(long, value_name = "PERCENT", allow_hyphen_values = true)]
    pub flow_increase: Option<f64>,

    /// Number of sections
    #[arg(long, value_name = "N")]
    pub sections: Option<u32>,

    /// Cylinder diameter in mm
    #[arg(long, value_name = "MM")]
    pub diameter: Option<f64>,

    /// Nozzle diameter in mm (default: from the base file, then 0.4)
    #[arg(long, value_name = "MM")]
    pub nozzle_diameter: Option<f64>,

    /// Leave the printer running after the cylinder (no end sequence)
    #[arg(long)]
    pub no_finish: bool,
}

impl SettingsOverrides {
    /// Apply every flag that was given.
    pub fn apply(&self, settings: &mut CylinderSettings) {
        if let Some(v) = self.layer_height {
            settings.layer_height = Some(v);
        }
        if let Some(v) = self.section_height {
            settings.section_height = v;
        }
        if let Some(v) = self.initial_flow {
            settings.initial_flow_percent = Some(v);
        }
        if let Some(v) = self.flow_increase {
            settings.flow_increase_per_section = v;
        }
        if let Some(v) = self.sections {
            settings.section_count = v;
        }
        if let Some(v) = self.diameter {
            settings.cylinder_diameter = v;
        }
        if let Some(v) = self.nozzle_diameter {
            settings.nozzle_diameter = Some(v);
        }
        if self.no_finish {
            settings.finish_print = false;
        }
    }
}

/// Parse settings from TOML text. Missing keys keep their defaults.
pub fn parse_settings(text: &str) -> Result<CylinderSettings> {
    toml::from_str(text).context("invalid settings file")
}

/// Defaults, overlaid by the TOML file at `path` if any, overlaid by `overrides`.
pub fn load_settings(
    path: Option<&Path>,
    overrides: &SettingsOverrides,
) -> Result<CylinderSettings> {
    let mut settings = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_settings(&text).with_context(|| format!("in {}", path.display()))?
        }
        None => CylinderSettings::default(),
    };
    overrides.apply(&mut settings);
    Ok(settings)
}

/// `output.gcode` in the input's directory.
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_file_name(DEFAULT_OUTPUT_NAME)
}

/// Write `contents` to a temporary file in the same directory, then move it
/// over `path`. A failed write leaves any existing `path` untouched.
pub fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .with_context(|| format!("failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
