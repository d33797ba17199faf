//! Cylinder generation settings.

use serde::{Deserialize, Serialize};

use crate::analyze::Analysis;
use crate::error::{BeltflowError, Result};

/// Layer height used when neither the settings nor the base file provide one (mm).
pub const DEFAULT_LAYER_HEIGHT: f64 = 0.2;
/// Flow percentage assumed when the base file never sets one.
pub const DEFAULT_FLOW_PERCENT: f64 = 100.0;
/// Nozzle diameter used when neither the settings nor the base file provide one (mm).
pub const DEFAULT_NOZZLE_DIAMETER: f64 = 0.4;

/// Feed rates used by the generated toolpath (mm/min).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedRates {
    /// Rapid move to the first point of the cylinder.
    pub travel: f64,
    /// Z-only moves.
    pub z_move: f64,
    /// Priming the extruder before the spiral.
    pub prime: f64,
    /// Spiral perimeter.
    pub spiral: f64,
}

impl Default for FeedRates {
    fn default() -> Self {
        Self {
            travel: 3000.0,
            z_move: 1200.0,
            prime: 300.0,
            spiral: 800.0,
        }
    }
}

/// Parameters for the flow-calibration cylinder.
///
/// Options left as `None` are filled from the analyzed base file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CylinderSettings {
    /// Height climbed per spiral revolution (mm). Defaults to the base file's.
    pub layer_height: Option<f64>,
    /// Height of each constant-flow section (mm).
    pub section_height: f64,
    /// Flow percentage of the first section. Defaults to the base file's last value.
    pub initial_flow_percent: Option<f64>,
    /// Flow percentage added per section; may be zero or negative.
    pub flow_increase_per_section: f64,
    /// Number of sections.
    pub section_count: u32,
    /// Cylinder diameter (mm).
    pub cylinder_diameter: f64,
    /// Nozzle diameter (mm). Defaults to the base file's hint, then 0.4.
    pub nozzle_diameter: Option<f64>,
    /// Filament diameter (mm).
    pub filament_diameter: f64,
    /// Extrusion line width as a multiple of the nozzle diameter.
    pub line_width_factor: f64,
    /// Filament pushed before the spiral starts (mm); 0 disables priming.
    pub prime_length: f64,
    /// Feed rates.
    pub feed_rates: FeedRates,
    /// Append the end-of-print sequence after the cylinder.
    pub finish_print: bool,
}

impl Default for CylinderSettings {
    fn default() -> Self {
        Self {
            layer_height: None,
            section_height: 5.0,
            initial_flow_percent: None,
            flow_increase_per_section: 10.0,
            section_count: 1,
            cylinder_diameter: 20.0,
            nozzle_diameter: None,
            filament_diameter: 1.75,
            line_width_factor: 1.2,
            prime_length: 5.0,
            feed_rates: FeedRates::default(),
            finish_print: true,
        }
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(BeltflowError::InvalidConfiguration(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

impl CylinderSettings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if let Some(layer_height) = self.layer_height {
            require_positive("layer_height", layer_height)?;
        }
        require_positive("section_height", self.section_height)?;
        if let Some(flow) = self.initial_flow_percent {
            require_positive("initial_flow_percent", flow)?;
        }
        if !self.flow_increase_per_section.is_finite() {
            return Err(BeltflowError::InvalidConfiguration(
                "flow_increase_per_section must be finite".into(),
            ));
        }
        if self.section_count == 0 {
            return Err(BeltflowError::InvalidConfiguration(
                "section_count must be at least 1".into(),
            ));
        }
        require_positive("cylinder_diameter", self.cylinder_diameter)?;
        if let Some(nozzle) = self.nozzle_diameter {
            require_positive("nozzle_diameter", nozzle)?;
        }
        require_positive("filament_diameter", self.filament_diameter)?;
        require_positive("line_width_factor", self.line_width_factor)?;
        if !(self.prime_length.is_finite() && self.prime_length >= 0.0) {
            return Err(BeltflowError::InvalidConfiguration(format!(
                "prime_length must be zero or positive, got {}",
                self.prime_length
            )));
        }
        require_positive("feed_rates.travel", self.feed_rates.travel)?;
        require_positive("feed_rates.z_move", self.feed_rates.z_move)?;
        require_positive("feed_rates.prime", self.feed_rates.prime)?;
        require_positive("feed_rates.spiral", self.feed_rates.spiral)?;
        Ok(())
    }

    /// Fill unset options from the analyzed base file and validate.
    pub fn resolve(&self, analysis: &Analysis) -> Result<CylinderPlan> {
        self.validate()?;
        let nozzle_diameter = self
            .nozzle_diameter
            .or(analysis.hints.nozzle_diameter)
            .unwrap_or(DEFAULT_NOZZLE_DIAMETER);
        let plan = CylinderPlan {
            layer_height: self.layer_height.unwrap_or(analysis.state.layer_height),
            section_height: self.section_height,
            initial_flow_percent: self
                .initial_flow_percent
                .unwrap_or(analysis.state.last_flow_percent),
            flow_increase_per_section: self.flow_increase_per_section,
            section_count: self.section_count,
            cylinder_diameter: self.cylinder_diameter,
            nozzle_diameter,
            filament_diameter: self.filament_diameter,
            line_width: nozzle_diameter * self.line_width_factor,
            prime_length: self.prime_length,
            feed_rates: self.feed_rates,
            finish_print: self.finish_print,
        };
        require_positive("layer_height", plan.layer_height)?;
        require_positive("initial_flow_percent", plan.initial_flow_percent)?;
        Ok(plan)
    }
}

/// Settings with every default filled in; fixed for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CylinderPlan {
    /// Height climbed per revolution (mm).
    pub layer_height: f64,
    /// Height of each section (mm).
    pub section_height: f64,
    /// Flow of the first section (percent).
    pub initial_flow_percent: f64,
    /// Flow added per section (percent).
    pub flow_increase_per_section: f64,
    /// Number of sections.
    pub section_count: u32,
    /// Cylinder diameter (mm).
    pub cylinder_diameter: f64,
    /// Nozzle diameter (mm).
    pub nozzle_diameter: f64,
    /// Filament diameter (mm).
    pub filament_diameter: f64,
    /// Extruded line width (mm).
    pub line_width: f64,
    /// Priming length (mm).
    pub prime_length: f64,
    /// Feed rates.
    pub feed_rates: FeedRates,
    /// Append the end-of-print sequence.
    pub finish_print: bool,
}

impl CylinderPlan {
    /// Extrusion model at this plan's layer height.
    pub fn extrusion_model(&self) -> ExtrusionModel {
        ExtrusionModel {
            line_width: self.line_width,
            layer_height: self.layer_height,
            filament_diameter: self.filament_diameter,
        }
    }
}

/// Filament cross-section model that turns path length into E distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrusionModel {
    /// Extruded line width (mm).
    pub line_width: f64,
    /// Extruded line height (mm).
    pub layer_height: f64,
    /// Filament diameter (mm).
    pub filament_diameter: f64,
}

impl ExtrusionModel {
    /// Filament length per mm of path at 100% flow.
    pub fn ratio(&self) -> f64 {
        let bead_area = self.line_width * self.layer_height;
        let filament_area = std::f64::consts::PI * (self.filament_diameter / 2.0).powi(2);
        bead_area / filament_area
    }

    /// Filament length for `path_length` mm of travel at `flow_percent`.
    pub fn extrusion(&self, path_length: f64, flow_percent: f64) -> f64 {
        path_length * self.ratio() * flow_percent / 100.0
    }
}
