//! Rendering of the generated toolpath as G-code text.

use std::fmt::Write as _;

use crate::analyze::Analysis;
use crate::dialect::Dialect;
use crate::error::{BeltflowError, Result};
use crate::settings::{CylinderPlan, FeedRates};
use crate::spiral::{CylinderToolpath, MotionCommand, MoveKind, ToolpathStep};

/// Name written into the marker comment.
pub const GENERATOR_NAME: &str = "beltflow flow cylinder";

/// State tracked while rendering.
#[derive(Debug, Clone, Default)]
pub struct EmitState {
    /// Last feed rate written; `F` words are only emitted when it changes.
    pub feed: Option<f64>,
    /// Number of sections, for section comments.
    pub section_count: usize,
}

/// Format a coordinate with fixed precision.
pub fn format_coord(value: f64, precision: usize) -> String {
    format!("{:.prec$}", value, prec = precision)
}

/// Format a value with at most `precision` decimals and no trailing zeros.
pub fn format_number(value: f64, precision: usize) -> String {
    let fixed = format_coord(value, precision);
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Renders cylinder toolpaths in one dialect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcodeEmitter {
    /// Output dialect.
    pub dialect: Dialect,
    /// Feed rates for moves the toolpath leaves implicit.
    pub feed_rates: FeedRates,
}

impl GcodeEmitter {
    /// Create an emitter.
    pub fn new(dialect: Dialect, feed_rates: FeedRates) -> Self {
        Self {
            dialect,
            feed_rates,
        }
    }

    fn comment(&self, out: &mut String, text: &str) {
        out.push_str(self.dialect.comment_prefix());
        out.push_str(text);
        out.push('\n');
    }

    fn feed_word(&self, feed: Option<f64>, state: &mut EmitState) -> Option<String> {
        let feed = feed?;
        if state.feed == Some(feed) {
            return None;
        }
        state.feed = Some(feed);
        Some(format!("F{}", format_number(feed, 1)))
    }

    /// The single-line traceability marker: generator and full configuration.
    pub fn marker(&self, plan: &CylinderPlan) -> String {
        format!(
            "{}{} {}: layer_height={} section_height={} initial_flow={} flow_increase={} \
             sections={} diameter={} nozzle={} filament={} line_width={} prime={}\n",
            self.dialect.comment_prefix(),
            GENERATOR_NAME,
            env!("CARGO_PKG_VERSION"),
            format_number(plan.layer_height, 4),
            format_number(plan.section_height, 4),
            format_number(plan.initial_flow_percent, 2),
            format_number(plan.flow_increase_per_section, 2),
            plan.section_count,
            format_number(plan.cylinder_diameter, 4),
            format_number(plan.nozzle_diameter, 4),
            format_number(plan.filament_diameter, 4),
            format_number(plan.line_width, 4),
            format_number(plan.prime_length, 4),
        )
    }

    /// Informational comments and motion modes.
    pub fn header(&self, analysis: &Analysis, toolpath: &CylinderToolpath) -> String {
        let mut out = String::new();
        let state = &analysis.state;
        self.comment(
            &mut out,
            &format!("start Z: {}", format_coord(toolpath.start_z, 4)),
        );
        self.comment(
            &mut out,
            &format!("end Z: {}", format_coord(toolpath.end_z, 4)),
        );
        self.comment(
            &mut out,
            &format!(
                "cylinder center: X={} Y={}",
                format_coord(toolpath.center.x, 3),
                format_coord(toolpath.center.y, 3)
            ),
        );
        self.comment(
            &mut out,
            &format!(
                "print bounding box: X=[{}, {}] Y=[{}, {}]",
                format_coord(state.bounds.min.x, 3),
                format_coord(state.bounds.max.x, 3),
                format_coord(state.bounds.min.y, 3),
                format_coord(state.bounds.max.y, 3)
            ),
        );
        if let Some(temp) = analysis.hints.nozzle_temp {
            self.comment(
                &mut out,
                &format!("base nozzle temperature: {}", format_number(temp, 1)),
            );
        }
        if let Some(temp) = analysis.hints.bed_temp {
            self.comment(
                &mut out,
                &format!("base bed temperature: {}", format_number(temp, 1)),
            );
        }
        out.push_str(self.dialect.motion_mode_gcode());
        out
    }

    fn motion(&self, m: &MotionCommand, state: &mut EmitState) -> String {
        let mut out = String::new();
        match m.kind {
            MoveKind::Travel => {
                // Raise to the start height first, then cross over in XY.
                let mut z_line = String::from("G1");
                if let Some(f) = self.feed_word(Some(self.feed_rates.z_move), state) {
                    let _ = write!(z_line, " {f}");
                }
                let _ = writeln!(
                    out,
                    "{z_line} Z{} ; Move to cylinder start height",
                    format_coord(m.position.z, 4)
                );

                let mut xy_line = String::from("G0");
                if let Some(f) = self.feed_word(m.feed_rate, state) {
                    let _ = write!(xy_line, " {f}");
                }
                let _ = writeln!(
                    out,
                    "{xy_line} X{} Y{} ; Move to first point",
                    format_coord(m.position.x, 3),
                    format_coord(m.position.y, 3)
                );
            }
            MoveKind::Print => {
                let _ = write!(
                    out,
                    "G1 X{} Y{} Z{}",
                    format_coord(m.position.x, 3),
                    format_coord(m.position.y, 3),
                    format_coord(m.position.z, 4)
                );
                if let Some(e) = m.extrusion {
                    let _ = write!(out, " E{}", format_coord(e, 5));
                }
                if let Some(f) = self.feed_word(m.feed_rate, state) {
                    let _ = write!(out, " {f}");
                }
                out.push('\n');
            }
        }
        out
    }

    /// G-code for a single toolpath step.
    pub fn step(&self, step: &ToolpathStep, state: &mut EmitState) -> String {
        match step {
            ToolpathStep::Move(m) => self.motion(m, state),
            ToolpathStep::Prime { length, feed_rate } => {
                let mut line = String::from("G1");
                if let Some(f) = self.feed_word(Some(*feed_rate), state) {
                    let _ = write!(line, " {f}");
                }
                format!("{line} E{} ; Prime extruder\n", format_coord(*length, 5))
            }
            ToolpathStep::SetFlow {
                section,
                flow_percent,
            } => {
                let value = format_number(*flow_percent, 2);
                let mut out = String::new();
                self.comment(
                    &mut out,
                    &format!(
                        "section {}/{}: flow {}%",
                        section + 1,
                        state.section_count,
                        value
                    ),
                );
                let _ = writeln!(out, "{} S{}", self.dialect.flow_rate_command(), value);
                out
            }
            ToolpathStep::LayerMark { layer, z } => {
                let mut out = String::new();
                self.comment(
                    &mut out,
                    &format!("spiral layer {}, Z={}", layer, format_coord(*z, 2)),
                );
                out
            }
        }
    }

    /// Closing comment and, if requested, the end-of-print sequence.
    ///
    /// The base file's own print-end macro is preferred over the dialect's
    /// generic sequence.
    pub fn footer(&self, plan: &CylinderPlan, print_end: Option<&str>) -> String {
        let mut out = String::new();
        self.comment(&mut out, "end flow cylinder");
        if plan.finish_print {
            match print_end {
                Some(line) => {
                    out.push_str(line);
                    out.push('\n');
                }
                None => out.push_str(self.dialect.end_gcode()),
            }
        }
        out
    }

    /// Marker, header, steps and footer for a toolpath.
    pub fn render(
        &self,
        analysis: &Analysis,
        plan: &CylinderPlan,
        toolpath: &CylinderToolpath,
    ) -> String {
        let mut state = EmitState {
            section_count: plan.section_count as usize,
            ..Default::default()
        };
        let mut out = self.marker(plan);
        out.push_str(&self.header(analysis, toolpath));
        for step in &toolpath.steps {
            out.push_str(&self.step(step, &mut state));
        }
        out.push_str(&self.footer(plan, analysis.print_end.as_deref()));
        out
    }

    /// The base file up to the insertion point followed by the rendered
    /// toolpath. Anything after the insertion point is dropped.
    pub fn emit(
        &self,
        source: &str,
        analysis: &Analysis,
        plan: &CylinderPlan,
        toolpath: &CylinderToolpath,
    ) -> Result<String> {
        let prefix = source
            .get(..analysis.state.last_line_index)
            .ok_or_else(|| {
                BeltflowError::MalformedInput(format!(
                    "insertion point {} is outside the {}-byte source",
                    analysis.state.last_line_index,
                    source.len()
                ))
            })?;
        let block = self.render(analysis, plan, toolpath);

        let mut out = String::with_capacity(prefix.len() + block.len() + 1);
        out.push_str(prefix);
        if !prefix.is_empty() && !prefix.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&block);
        Ok(out)
    }
}
