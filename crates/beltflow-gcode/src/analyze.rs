//! Base-file analysis.
//!
//! Walks the source toolpath once, tracking modal position, and recovers the
//! geometry the cylinder continues from: the last layer height, the XY
//! bounding-box center, the flow override in effect, and the byte offset
//! where the new toolpath is spliced in.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use beltflow_math::{Bounds2, Point2};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialect::Dialect;
use crate::error::{BeltflowError, Result};
use crate::line::{classify_line, source_lines, GcodeLine, Heater, Positioning};
use crate::settings::{DEFAULT_FLOW_PERCENT, DEFAULT_LAYER_HEIGHT};

/// Z values closer than this are the same layer (mm).
const Z_QUANTUM: f64 = 1e-4;
/// Allowed deviation of a layer gap from a multiple of the smallest gap (mm).
const GAP_TOLERANCE: f64 = 1e-3;

static MM_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+\.?[0-9]*)\s*mm").expect("valid regex"));

/// Print geometry recovered from the base file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedBaseState {
    /// Highest Z reached by any move before the insertion point (mm).
    pub last_layer_z: f64,
    /// Flow override in effect at the last move (percent).
    pub last_flow_percent: f64,
    /// Center of the XY bounding box.
    pub center: Point2,
    /// XY bounding box of every analyzed move.
    pub bounds: Bounds2,
    /// Detected layer height, or the fallback if detection was ambiguous (mm).
    pub layer_height: f64,
    /// Number of distinct Z values.
    pub layer_count: usize,
    /// Byte offset just past the final move; the new toolpath starts here.
    pub last_line_index: usize,
}

/// Settings the slicer left in the file, used only as defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlicerHints {
    /// Layer height from a header comment (mm).
    pub layer_height: Option<f64>,
    /// Nozzle diameter from a header comment (mm).
    pub nozzle_diameter: Option<f64>,
    /// Last hotend target (°C).
    pub nozzle_temp: Option<f64>,
    /// Last bed target (°C).
    pub bed_temp: Option<f64>,
}

impl SlicerHints {
    fn observe(&mut self, line: &GcodeLine) {
        match line {
            GcodeLine::Temperature {
                heater: Heater::Nozzle,
                target,
                ..
            } => self.nozzle_temp = Some(*target),
            GcodeLine::Temperature {
                heater: Heater::Bed,
                target,
                ..
            } => self.bed_temp = Some(*target),
            GcodeLine::Comment(text) => {
                let lower = text.to_lowercase();
                if self.layer_height.is_none() && lower.contains("layer") && lower.contains("height")
                {
                    self.layer_height = millimetres(&lower);
                }
                if self.nozzle_diameter.is_none()
                    && lower.contains("nozzle")
                    && lower.contains("diameter")
                {
                    self.nozzle_diameter = millimetres(&lower);
                }
            }
            _ => {}
        }
    }
}

fn millimetres(text: &str) -> Option<f64> {
    MM_VALUE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|v| *v > 0.0)
}

/// A numeric fallback the analyzer applied instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisWarning {
    /// Layer gaps are not multiples of a single height.
    #[error("layer height is ambiguous (smallest gap {smallest_gap:.4} mm), using {fallback} mm")]
    AmbiguousLayerHeight {
        /// Smallest gap between consecutive layers (mm).
        smallest_gap: f64,
        /// Layer height used instead (mm).
        fallback: f64,
    },

    /// No flow override precedes the last move.
    #[error("no flow rate command found, assuming {fallback}%")]
    MissingFlowRate {
        /// Flow percentage used instead.
        fallback: f64,
    },
}

/// Result of analyzing a base file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Recovered print geometry.
    pub state: ParsedBaseState,
    /// Slicer settings found in the file.
    pub hints: SlicerHints,
    /// Fallbacks that were applied.
    pub warnings: Vec<AnalysisWarning>,
    /// The base file's print-end macro line, re-emitted after the cylinder.
    pub print_end: Option<String>,
}

enum LayerHeight {
    Unique(f64),
    Ambiguous { smallest_gap: f64 },
}

/// Smallest gap between sorted distinct Z values, if every other gap is a
/// whole multiple of it.
fn detect_layer_height(zs: &[f64]) -> LayerHeight {
    let gaps: Vec<f64> = zs.windows(2).map(|w| w[1] - w[0]).collect();
    let smallest_gap = gaps.iter().copied().fold(f64::INFINITY, f64::min);
    let uniform = gaps.iter().all(|gap| {
        let multiple = (gap / smallest_gap).round();
        (gap - multiple * smallest_gap).abs() <= GAP_TOLERANCE
    });
    if uniform {
        LayerHeight::Unique(smallest_gap)
    } else {
        LayerHeight::Ambiguous { smallest_gap }
    }
}

/// Analyze a base file in the default dialect.
pub fn analyze(source: &str) -> Result<Analysis> {
    analyze_with(source, Dialect::default())
}

/// Analyze a base file.
///
/// Fails with [`BeltflowError::MalformedInput`] if the file has no moves with
/// coordinates, no XY positions, or fewer than two distinct Z layers.
pub fn analyze_with(source: &str, dialect: Dialect) -> Result<Analysis> {
    let mut positioning = Positioning::Absolute;
    let mut position: [Option<f64>; 3] = [None; 3];
    let mut flow: Option<f64> = None;
    let mut flow_at_last_move: Option<f64> = None;
    let mut bounds: Option<Bounds2> = None;
    let mut layer_keys: BTreeSet<i64> = BTreeSet::new();
    let mut max_z = f64::NEG_INFINITY;
    let mut last_move_end: Option<usize> = None;
    let mut hints = SlicerHints::default();
    let mut temps_at_last_move: (Option<f64>, Option<f64>) = (None, None);
    let mut print_end: Option<String> = None;

    for line in source_lines(source) {
        if dialect.is_print_end_marker(line.text) {
            debug!("print end marker at byte {}, stopping analysis", line.start);
            print_end = Some(line.text.trim().to_string());
            break;
        }

        let parsed = classify_line(line.text);
        hints.observe(&parsed);

        match parsed {
            GcodeLine::Move(mv) if mv.has_position() => {
                for (axis, word) in [mv.x, mv.y, mv.z].into_iter().enumerate() {
                    if let Some(value) = word {
                        position[axis] = Some(match (positioning, position[axis]) {
                            (Positioning::Relative, Some(current)) => current + value,
                            _ => value,
                        });
                    }
                }
                if let [Some(x), Some(y), _] = position {
                    let p = Point2::new(x, y);
                    match bounds.as_mut() {
                        Some(b) => b.include(p),
                        None => bounds = Some(Bounds2::from_point(p)),
                    }
                }
                if let Some(z) = position[2] {
                    layer_keys.insert((z / Z_QUANTUM).round() as i64);
                    max_z = max_z.max(z);
                }
                flow_at_last_move = flow;
                temps_at_last_move = (hints.nozzle_temp, hints.bed_temp);
                last_move_end = Some(line.end);
            }
            GcodeLine::FlowRate(cmd) => flow = Some(cmd.percent),
            GcodeLine::Positioning(mode) => positioning = mode,
            _ => {}
        }
    }

    let last_line_index = last_move_end.ok_or_else(|| {
        BeltflowError::MalformedInput("no motion commands with coordinates".into())
    })?;
    let bounds =
        bounds.ok_or_else(|| BeltflowError::MalformedInput("no X/Y coordinates found".into()))?;
    if layer_keys.len() < 2 {
        return Err(BeltflowError::MalformedInput(format!(
            "found {} distinct layer(s), need at least 2",
            layer_keys.len()
        )));
    }

    // Cool-down commands after the last move are dropped with the tail.
    (hints.nozzle_temp, hints.bed_temp) = temps_at_last_move;

    let mut warnings = Vec::new();

    let zs: Vec<f64> = layer_keys.iter().map(|k| *k as f64 * Z_QUANTUM).collect();
    let layer_height = match detect_layer_height(&zs) {
        LayerHeight::Unique(height) => height,
        LayerHeight::Ambiguous { smallest_gap } => {
            let fallback = hints.layer_height.unwrap_or(DEFAULT_LAYER_HEIGHT);
            warnings.push(AnalysisWarning::AmbiguousLayerHeight {
                smallest_gap,
                fallback,
            });
            fallback
        }
    };

    let last_flow_percent = flow_at_last_move.unwrap_or_else(|| {
        warnings.push(AnalysisWarning::MissingFlowRate {
            fallback: DEFAULT_FLOW_PERCENT,
        });
        DEFAULT_FLOW_PERCENT
    });

    let state = ParsedBaseState {
        last_layer_z: max_z,
        last_flow_percent,
        center: bounds.center(),
        bounds,
        layer_height,
        layer_count: zs.len(),
        last_line_index,
    };

    info!(
        "base file: {} layers, last Z {:.3} mm, layer height {:.3} mm, flow {}%, center ({:.2}, {:.2})",
        state.layer_count,
        state.last_layer_z,
        state.layer_height,
        state.last_flow_percent,
        state.center.x,
        state.center.y
    );
    for warning in &warnings {
        warn!("{}", warning);
    }

    Ok(Analysis {
        state,
        hints,
        warnings,
        print_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One square perimeter per Z over `[x0, x1] x [y0, y1]`.
    fn square_layers(zs: &[f64], x0: f64, y0: f64, x1: f64, y1: f64) -> String {
        let mut out = String::from("G90\nM83\n");
        for z in zs {
            out.push_str(&format!("G0 X{x0} Y{y0} Z{z}\n"));
            out.push_str(&format!("G1 X{x1} Y{y0} E1.0\n"));
            out.push_str(&format!("G1 X{x1} Y{y1} E1.0\n"));
            out.push_str(&format!("G1 X{x0} Y{y1} E1.0\n"));
            out.push_str(&format!("G1 X{x0} Y{y0} E1.0\n"));
        }
        out
    }

    #[test]
    fn test_bounding_box_center() {
        let src = square_layers(&[0.2, 0.4, 0.6], 10.0, 0.0, 50.0, 40.0);
        let analysis = analyze(&src).unwrap();
        let state = &analysis.state;
        assert_relative_eq!(state.center.x, 30.0);
        assert_relative_eq!(state.center.y, 20.0);
        assert_relative_eq!(state.bounds.width(), 40.0);
        assert_relative_eq!(state.last_layer_z, 0.6);
        assert_relative_eq!(state.layer_height, 0.2, epsilon = 1e-9);
        assert_eq!(state.layer_count, 3);
        assert_eq!(state.last_line_index, src.len());
    }

    #[test]
    fn test_center_is_not_centroid() {
        // Most points crowd the left edge; the box center ignores that.
        let src = "G1 X0 Y0 Z0.2\nG1 X1 Y0\nG1 X1 Y1\nG1 X2 Y2\nG1 X100 Y10 Z0.4\n";
        let state = analyze(src).unwrap().state;
        assert_relative_eq!(state.center.x, 50.0);
        assert_relative_eq!(state.center.y, 5.0);
    }

    #[test]
    fn test_single_layer_is_malformed() {
        let src = square_layers(&[0.2], 0.0, 0.0, 20.0, 20.0);
        assert!(matches!(
            analyze(&src),
            Err(BeltflowError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_no_moves_is_malformed() {
        let src = "; just a comment\nM104 S200\nG90\n";
        assert!(matches!(
            analyze(src),
            Err(BeltflowError::MalformedInput(_))
        ));
        assert!(matches!(analyze(""), Err(BeltflowError::MalformedInput(_))));
    }

    #[test]
    fn test_first_layer_and_z_hop_are_unambiguous() {
        // 0.3 first layer, 0.2 after, plus a 0.4 z-hop above the top layer.
        let mut src = square_layers(&[0.3, 0.5, 0.7], 0.0, 0.0, 10.0, 10.0);
        src.push_str("G1 Z1.1\nG0 X5 Y5\nG1 Z0.7\nG1 X6 Y6 E0.1\n");
        let analysis = analyze(&src).unwrap();
        assert!(analysis.warnings.iter().all(|w| !matches!(
            w,
            AnalysisWarning::AmbiguousLayerHeight { .. }
        )));
        assert_relative_eq!(analysis.state.layer_height, 0.2, epsilon = 1e-9);
        assert_relative_eq!(analysis.state.last_layer_z, 1.1);
    }

    #[test]
    fn test_ambiguous_layer_height_falls_back() {
        let mut src = String::from(";Layer height: 0.25 mm\nM221 S100\n");
        src.push_str(&square_layers(&[0.2, 0.4, 0.65], 0.0, 0.0, 10.0, 10.0));
        let analysis = analyze(&src).unwrap();
        assert_relative_eq!(analysis.state.layer_height, 0.25);
        assert_eq!(analysis.warnings.len(), 1);
        match &analysis.warnings[0] {
            AnalysisWarning::AmbiguousLayerHeight {
                smallest_gap,
                fallback,
            } => {
                assert_relative_eq!(*smallest_gap, 0.2, epsilon = 1e-9);
                assert_relative_eq!(*fallback, 0.25);
            }
            other => panic!("unexpected warning {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_without_hint_uses_default() {
        let mut src = String::from("M221 S100\n");
        src.push_str(&square_layers(&[0.2, 0.5, 0.7], 0.0, 0.0, 10.0, 10.0));
        let analysis = analyze(&src).unwrap();
        assert_relative_eq!(analysis.state.layer_height, DEFAULT_LAYER_HEIGHT);
    }

    #[test]
    fn test_flow_rate_tracking() {
        let mut src = String::from("M221 S95\n");
        src.push_str(&square_layers(&[0.2], 0.0, 0.0, 10.0, 10.0));
        src.push_str("M221 S103\n");
        src.push_str(&square_layers(&[0.4], 0.0, 0.0, 10.0, 10.0));
        // Set after the final move: part of the discarded tail.
        src.push_str("M221 S120\n");
        let analysis = analyze(&src).unwrap();
        assert_relative_eq!(analysis.state.last_flow_percent, 103.0);
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn test_missing_flow_rate_warns() {
        let src = square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0);
        let analysis = analyze(&src).unwrap();
        assert_relative_eq!(analysis.state.last_flow_percent, DEFAULT_FLOW_PERCENT);
        assert_eq!(
            analysis.warnings,
            vec![AnalysisWarning::MissingFlowRate {
                fallback: DEFAULT_FLOW_PERCENT
            }]
        );
    }

    #[test]
    fn test_insertion_point_drops_tail() {
        let body = square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0);
        let src = format!("{body}G1 E-2 F2700\n;TIME_ELAPSED:120\nM107\n");
        let state = analyze(&src).unwrap().state;
        assert_eq!(state.last_line_index, body.len());
        assert!(src[..state.last_line_index].ends_with("G1 X0 Y0 E1.0\n"));
    }

    #[test]
    fn test_print_end_stops_analysis() {
        let body = square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0);
        let src = format!("{body}PRINT_END\nG1 Z10\nG1 X0 Y200\n");
        let state = analyze(&src).unwrap().state;
        assert_eq!(state.last_line_index, body.len());
        assert_relative_eq!(state.last_layer_z, 0.4);
        assert_relative_eq!(state.bounds.max.y, 10.0);
    }

    #[test]
    fn test_print_end_line_is_captured() {
        let body = square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0);
        let src = format!("{body}PRINT_END X=0 Y=200 ; park
M84
");
        assert_eq!(
            analyze(&src).unwrap().print_end.as_deref(),
            Some("PRINT_END X=0 Y=200 ; park")
        );
        assert_eq!(analyze(&body).unwrap().print_end, None);
    }

    #[test]
    fn test_relative_positioning() {
        let src = "G90\nG1 X10 Y10 Z0.2\nG91\nG1 X5 Y-5\nG1 Z0.2\nG90\nG1 X12 Y8\n";
        let state = analyze(src).unwrap().state;
        assert_relative_eq!(state.bounds.max.x, 15.0);
        assert_relative_eq!(state.bounds.min.y, 5.0);
        assert_relative_eq!(state.last_layer_z, 0.4, epsilon = 1e-12);
        assert_eq!(state.layer_count, 2);
    }

    #[test]
    fn test_unterminated_last_line() {
        let src = "G1 X0 Y0 Z0.2\nG1 X10 Y10 Z0.4";
        let state = analyze(src).unwrap().state;
        assert_eq!(state.last_line_index, src.len());
    }

    #[test]
    fn test_hints() {
        let mut src = String::from(
            ";Layer height: 0.2 mm\n;Nozzle diameter = 0.6mm\nM140 S60\nM104 S205\nM109 S210\n",
        );
        src.push_str(&square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0));
        let hints = analyze(&src).unwrap().hints;
        assert_eq!(hints.layer_height, Some(0.2));
        assert_eq!(hints.nozzle_diameter, Some(0.6));
        assert_eq!(hints.nozzle_temp, Some(210.0));
        assert_eq!(hints.bed_temp, Some(60.0));
    }

    #[test]
    fn test_cooldown_in_tail_does_not_override_temperatures() {
        let mut src = String::from("M104 S210\nM140 S60\n");
        src.push_str(&square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0));
        src.push_str("M104 S0\nM140 S0\nM84\n");
        let hints = analyze(&src).unwrap().hints;
        assert_eq!(hints.nozzle_temp, Some(210.0));
        assert_eq!(hints.bed_temp, Some(60.0));
    }

    #[test]
    fn test_analysis_serializes() {
        let mut src = String::from("M221 S95\n");
        src.push_str(&square_layers(&[0.2, 0.4], 0.0, 0.0, 10.0, 10.0));
        let analysis = analyze(&src).unwrap();
        let json = serde_json::to_string(&analysis).unwrap();
        assert!(json.contains("\"last_flow_percent\":95.0"));
        let parsed: Analysis = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state.layer_count, 2);
        assert_eq!(parsed.state.last_line_index, analysis.state.last_line_index);
        assert_relative_eq!(parsed.state.layer_height, analysis.state.layer_height);
        assert_eq!(parsed.warnings, analysis.warnings);
    }

    #[test]
    fn test_reanalysis_of_prefix_is_stable() {
        let body = square_layers(&[0.2, 0.4, 0.6], 5.0, 5.0, 25.0, 15.0);
        let src = format!("M221 S98\n{body}; tail comment\nM84\n");
        let first = analyze(&src).unwrap();
        let prefix = &src[..first.state.last_line_index];
        let second = analyze(prefix).unwrap();
        assert_eq!(first.state, second.state);
    }
}
