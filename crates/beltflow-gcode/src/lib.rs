#![warn(missing_docs)]

//! Flow-calibration cylinders for belt printers.
//!
//! Takes a sliced base file, works out where its last layer ends, and splices
//! in a spiral-vase cylinder that climbs from that height in sections, each
//! printed at a different flow override.
//!
//! # Example
//!
//! ```ignore
//! use beltflow_gcode::{generate_cylinder, CylinderSettings};
//!
//! let base = std::fs::read_to_string("base.gcode")?;
//! let settings = CylinderSettings {
//!     section_count: 4,
//!     ..Default::default()
//! };
//! let result = generate_cylinder(&base, &settings)?;
//! std::fs::write("output.gcode", &result.gcode)?;
//! ```

pub mod analyze;
pub mod dialect;
pub mod emit;
pub mod error;
pub mod line;
pub mod schedule;
pub mod settings;
pub mod spiral;

pub use analyze::{analyze, analyze_with, Analysis, AnalysisWarning, ParsedBaseState, SlicerHints};
pub use dialect::Dialect;
pub use emit::{format_coord, format_number, GcodeEmitter};
pub use error::{BeltflowError, Result};
pub use line::{classify_line, source_lines, GcodeLine, MoveCommand};
pub use schedule::{schedule_sections, Section};
pub use settings::{CylinderPlan, CylinderSettings, ExtrusionModel, FeedRates};
pub use spiral::{
    generate_spiral, CylinderToolpath, MotionCommand, MoveKind, SpiralParams, ToolpathStep,
    SEGMENTS_PER_REVOLUTION,
};

use log::info;
use serde::{Deserialize, Serialize};

/// Summary of a generated cylinder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CylinderStats {
    /// Extruding moves in the spiral.
    pub print_moves: usize,
    /// Full revolutions.
    pub revolutions: usize,
    /// Cylinder height (mm).
    pub height: f64,
    /// Filament used, priming included (mm).
    pub filament_mm: f64,
    /// Estimated time for the cylinder alone (s).
    pub print_time_seconds: f64,
}

impl CylinderStats {
    /// Compute statistics for a toolpath.
    pub fn from_toolpath(toolpath: &CylinderToolpath) -> Self {
        let mut print_moves = 0;
        let mut seconds = 0.0;
        let mut previous: Option<beltflow_math::Point3> = None;
        for step in &toolpath.steps {
            match step {
                ToolpathStep::Move(m) => {
                    if m.kind == MoveKind::Print {
                        print_moves += 1;
                    }
                    if let (Some(from), Some(feed)) = (previous, m.feed_rate) {
                        seconds += (m.position - from).norm() / feed * 60.0;
                    }
                    previous = Some(m.position);
                }
                ToolpathStep::Prime { length, feed_rate } => {
                    seconds += length / feed_rate * 60.0;
                }
                _ => {}
            }
        }
        Self {
            print_moves,
            revolutions: print_moves / SEGMENTS_PER_REVOLUTION,
            height: toolpath.end_z - toolpath.start_z,
            filament_mm: toolpath.total_extrusion(),
            print_time_seconds: seconds,
        }
    }
}

/// Everything produced by one [`generate_cylinder`] run.
#[derive(Debug, Clone)]
pub struct GeneratedCylinder {
    /// Base-file prefix followed by the cylinder.
    pub gcode: String,
    /// What was recovered from the base file.
    pub analysis: Analysis,
    /// Settings with defaults filled in.
    pub plan: CylinderPlan,
    /// Flow schedule.
    pub sections: Vec<Section>,
    /// The cylinder toolpath.
    pub toolpath: CylinderToolpath,
    /// Toolpath statistics.
    pub stats: CylinderStats,
}

/// Analyze `source` and append a flow cylinder configured by `settings`.
///
/// Settings are validated before the base file is read, so configuration
/// errors are reported even for unusable input.
pub fn generate_cylinder(source: &str, settings: &CylinderSettings) -> Result<GeneratedCylinder> {
    generate_cylinder_with(source, settings, Dialect::default())
}

/// [`generate_cylinder`] for an explicit dialect.
pub fn generate_cylinder_with(
    source: &str,
    settings: &CylinderSettings,
    dialect: Dialect,
) -> Result<GeneratedCylinder> {
    settings.validate()?;

    let analysis = analyze_with(source, dialect)?;
    let plan = settings.resolve(&analysis)?;

    let sections = schedule_sections(
        analysis.state.last_layer_z,
        plan.section_height,
        plan.section_count,
        plan.initial_flow_percent,
        plan.flow_increase_per_section,
    )?;

    let toolpath = generate_spiral(
        &SpiralParams {
            center: analysis.state.center,
            diameter: plan.cylinder_diameter,
            layer_height: plan.layer_height,
            extrusion: plan.extrusion_model(),
            feed_rates: plan.feed_rates,
            prime_length: plan.prime_length,
        },
        &sections,
    )?;

    let gcode = GcodeEmitter::new(dialect, plan.feed_rates).emit(source, &analysis, &plan, &toolpath)?;
    let stats = CylinderStats::from_toolpath(&toolpath);

    info!(
        "cylinder: {} sections, Z {:.3}..{:.3} mm, {:.1} mm filament, ~{:.0}s",
        sections.len(),
        toolpath.start_z,
        toolpath.end_z,
        stats.filament_mm,
        stats.print_time_seconds
    );

    Ok(GeneratedCylinder {
        gcode,
        analysis,
        plan,
        sections,
        toolpath,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BASE: &str = "M221 S100\nG1 X0 Y0 Z0.2\nG1 X20 Y20 E1\nG1 X0 Y0 Z0.4\nG1 X20 Y20 E1\n";

    #[test]
    fn test_stats() {
        let settings = CylinderSettings {
            section_height: 1.0,
            section_count: 2,
            cylinder_diameter: 10.0,
            prime_length: 0.0,
            ..Default::default()
        };
        let result = generate_cylinder(BASE, &settings).unwrap();
        let stats = result.stats;
        // 2 mm at 0.2 mm per revolution.
        assert_eq!(stats.revolutions, 10);
        assert_eq!(stats.print_moves, 10 * SEGMENTS_PER_REVOLUTION);
        assert_relative_eq!(stats.height, 2.0, epsilon = 1e-9);
        assert!(stats.filament_mm > 0.0);
        assert!(stats.print_time_seconds > 0.0);
    }

    #[test]
    fn test_config_errors_win_over_input_errors() {
        let settings = CylinderSettings {
            section_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            generate_cylinder("", &settings),
            Err(BeltflowError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            generate_cylinder("", &CylinderSettings::default()),
            Err(BeltflowError::MalformedInput(_))
        ));
    }
}
