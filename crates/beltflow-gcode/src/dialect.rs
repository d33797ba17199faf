//! G-code dialect definitions.

use serde::{Deserialize, Serialize};

/// G-code dialect (machine flavor) understood by the analyzer and emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// IdeaMaker output for belt printers (Marlin/Klipper style commands).
    #[default]
    IdeaMakerBelt,
}

impl Dialect {
    /// Command word that sets the flow-rate override percentage.
    pub fn flow_rate_command(&self) -> &'static str {
        match self {
            Dialect::IdeaMakerBelt => "M221",
        }
    }

    /// Does this line start the end-of-print sequence?
    ///
    /// Anything from this line on is outside the analyzed print.
    pub fn is_print_end_marker(&self, line: &str) -> bool {
        match self {
            Dialect::IdeaMakerBelt => line.contains("PRINT_END"),
        }
    }

    /// Positioning and extruder modes the generated toolpath requires.
    pub fn motion_mode_gcode(&self) -> &'static str {
        match self {
            Dialect::IdeaMakerBelt => {
                "G90 ; Absolute positioning\n\
                 M83 ; Relative extruder mode\n"
            }
        }
    }

    /// End-of-print G-code appended after the generated toolpath.
    pub fn end_gcode(&self) -> &'static str {
        match self {
            Dialect::IdeaMakerBelt => {
                "M104 S0 ; Turn off extruder\n\
                 M140 S0 ; Turn off bed\n\
                 M107 ; Turn off fan\n\
                 M84 ; Disable motors\n"
            }
        }
    }

    /// Comment prefix used for generated comment lines.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Dialect::IdeaMakerBelt => "; ",
        }
    }
}
