//! Spiral-vase cylinder toolpath generation.
//!
//! The cylinder is one continuous helix: every step advances the nozzle a
//! fixed angle around the circle and raises Z by a fixed fraction of the
//! layer height, so there is no seam, layer change or retraction anywhere.

use std::f64::consts::TAU;

use beltflow_math::{point_on_circle, Point2, Point3};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{BeltflowError, Result};
use crate::schedule::Section;
use crate::settings::{ExtrusionModel, FeedRates};

/// Straight segments per revolution (5° each).
pub const SEGMENTS_PER_REVOLUTION: usize = 72;

/// Slack when deciding which section a Z belongs to (mm).
const SECTION_EPSILON: f64 = 1e-9;

/// Upper bound on spiral moves in one cylinder.
pub const MAX_SPIRAL_STEPS: usize = 10_000_000;

/// Whether a move deposits material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveKind {
    /// Non-extruding repositioning.
    Travel,
    /// Extruding move.
    Print,
}

/// One synthesized absolute move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    /// Travel or print.
    pub kind: MoveKind,
    /// Absolute target position (mm).
    pub position: Point3,
    /// Relative filament length (mm), for print moves.
    pub extrusion: Option<f64>,
    /// Feed rate (mm/min).
    pub feed_rate: Option<f64>,
}

/// An element of the generated toolpath.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ToolpathStep {
    /// A move.
    Move(MotionCommand),
    /// Push filament without moving, before the spiral starts.
    Prime {
        /// Filament length (mm).
        length: f64,
        /// Feed rate (mm/min).
        feed_rate: f64,
    },
    /// Start of a section: switch the flow override.
    SetFlow {
        /// Index of the section being entered.
        section: usize,
        /// New flow percentage.
        flow_percent: f64,
    },
    /// A full revolution has been completed.
    LayerMark {
        /// Revolutions completed so far.
        layer: usize,
        /// Z at the end of the revolution (mm).
        z: f64,
    },
}

/// Geometry and extrusion inputs for [`generate_spiral`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpiralParams {
    /// Cylinder axis in XY.
    pub center: Point2,
    /// Cylinder diameter (mm).
    pub diameter: f64,
    /// Z climbed per revolution (mm).
    pub layer_height: f64,
    /// Filament cross-section model.
    pub extrusion: ExtrusionModel,
    /// Feed rates.
    pub feed_rates: FeedRates,
    /// Priming length (mm); 0 skips the prime.
    pub prime_length: f64,
}

/// Generated cylinder toolpath.
#[derive(Debug, Clone, PartialEq)]
pub struct CylinderToolpath {
    /// Cylinder axis in XY.
    pub center: Point2,
    /// Cylinder radius (mm).
    pub radius: f64,
    /// Z of the first point (mm).
    pub start_z: f64,
    /// Z of the last point (mm).
    pub end_z: f64,
    /// Steps in execution order.
    pub steps: Vec<ToolpathStep>,
}

impl CylinderToolpath {
    /// All moves in order.
    pub fn moves(&self) -> impl Iterator<Item = &MotionCommand> {
        self.steps.iter().filter_map(|step| match step {
            ToolpathStep::Move(m) => Some(m),
            _ => None,
        })
    }

    /// Flow percentages in the order they are set.
    pub fn flow_changes(&self) -> Vec<f64> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                ToolpathStep::SetFlow { flow_percent, .. } => Some(*flow_percent),
                _ => None,
            })
            .collect()
    }

    /// Total filament pushed, priming included (mm).
    pub fn total_extrusion(&self) -> f64 {
        self.steps
            .iter()
            .map(|step| match step {
                ToolpathStep::Move(m) => m.extrusion.unwrap_or(0.0),
                ToolpathStep::Prime { length, .. } => *length,
                _ => 0.0,
            })
            .sum()
    }
}

fn section_at(sections: &[Section], z: f64) -> usize {
    sections
        .iter()
        .position(|s| s.contains(z + SECTION_EPSILON))
        .unwrap_or(sections.len() - 1)
}

/// Generate the spiral over the Z range covered by `sections`.
pub fn generate_spiral(params: &SpiralParams, sections: &[Section]) -> Result<CylinderToolpath> {
    if !(params.diameter.is_finite() && params.diameter > 0.0) {
        return Err(BeltflowError::InvalidConfiguration(format!(
            "cylinder diameter must be positive, got {}",
            params.diameter
        )));
    }
    if !(params.layer_height.is_finite() && params.layer_height > 0.0) {
        return Err(BeltflowError::InvalidConfiguration(format!(
            "layer height must be positive, got {}",
            params.layer_height
        )));
    }
    let (Some(first), Some(last)) = (sections.first(), sections.last()) else {
        return Err(BeltflowError::InvalidConfiguration(
            "at least one section is required".into(),
        ));
    };

    let center = params.center;
    let radius = params.diameter / 2.0;
    let start_z = first.start_z;
    let end_z = last.end_z;
    let dz = params.layer_height / SEGMENTS_PER_REVOLUTION as f64;
    let step_angle = TAU / SEGMENTS_PER_REVOLUTION as f64;
    // The final step is clamped to end_z and may be shorter than dz.
    let steps_needed = (((end_z - start_z) / dz) - 1e-6).ceil().max(1.0);
    if !(steps_needed <= MAX_SPIRAL_STEPS as f64) {
        return Err(BeltflowError::InvalidConfiguration(format!(
            "cylinder of {:.3} mm at {} mm per revolution needs more than {} moves",
            end_z - start_z,
            params.layer_height,
            MAX_SPIRAL_STEPS
        )));
    }
    let step_count = steps_needed as usize;

    let mut steps = Vec::with_capacity(step_count + step_count / SEGMENTS_PER_REVOLUTION + 8);

    let mut previous = point_on_circle(&center, radius, 0.0);
    steps.push(ToolpathStep::Move(MotionCommand {
        kind: MoveKind::Travel,
        position: Point3::new(previous.x, previous.y, start_z),
        extrusion: None,
        feed_rate: Some(params.feed_rates.travel),
    }));
    if params.prime_length > 0.0 {
        steps.push(ToolpathStep::Prime {
            length: params.prime_length,
            feed_rate: params.feed_rates.prime,
        });
    }

    let mut active: Option<usize> = None;
    for i in 1..=step_count {
        let z_from = start_z + (i - 1) as f64 * dz;
        let z = if i == step_count {
            end_z
        } else {
            start_z + i as f64 * dz
        };

        let section = section_at(sections, z_from);
        let flow_percent = sections[section].flow_percent;
        if active != Some(section) {
            steps.push(ToolpathStep::SetFlow {
                section,
                flow_percent,
            });
            active = Some(section);
        }

        let angle = (i % SEGMENTS_PER_REVOLUTION) as f64 * step_angle;
        let point = point_on_circle(&center, radius, angle);
        let length = (point - previous).norm();
        steps.push(ToolpathStep::Move(MotionCommand {
            kind: MoveKind::Print,
            position: Point3::new(point.x, point.y, z),
            extrusion: Some(params.extrusion.extrusion(length, flow_percent)),
            feed_rate: Some(params.feed_rates.spiral),
        }));
        previous = point;

        if i % SEGMENTS_PER_REVOLUTION == 0 {
            steps.push(ToolpathStep::LayerMark {
                layer: i / SEGMENTS_PER_REVOLUTION,
                z,
            });
        }
    }

    info!(
        "spiral: {} moves, Z {:.3}..{:.3} mm, diameter {} mm, {} section(s)",
        step_count,
        start_z,
        end_z,
        params.diameter,
        sections.len()
    );

    Ok(CylinderToolpath {
        center,
        radius,
        start_z,
        end_z,
        steps,
    })
}
