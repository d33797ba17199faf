//! Flow-rate section scheduling.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{BeltflowError, Result};

/// A vertical run of the cylinder printed at one flow rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Position in the schedule, starting at 0.
    pub index: usize,
    /// Flow override for this section (percent).
    pub flow_percent: f64,
    /// Bottom of the section (mm).
    pub start_z: f64,
    /// Top of the section (mm); equals the next section's `start_z`.
    pub end_z: f64,
}

impl Section {
    /// Does `z` fall within `[start_z, end_z)`?
    pub fn contains(&self, z: f64) -> bool {
        z >= self.start_z && z < self.end_z
    }
}

/// Split the cylinder into `section_count` sections of `section_height`
/// starting at `start_z`, with flow rising by `flow_increase` per section.
///
/// No clamping is applied to the flow percentages.
pub fn schedule_sections(
    start_z: f64,
    section_height: f64,
    section_count: u32,
    initial_flow_percent: f64,
    flow_increase: f64,
) -> Result<Vec<Section>> {
    if section_count == 0 {
        return Err(BeltflowError::InvalidConfiguration(
            "section_count must be at least 1".into(),
        ));
    }
    if !(section_height.is_finite() && section_height > 0.0) {
        return Err(BeltflowError::InvalidConfiguration(format!(
            "section_height must be positive, got {section_height}"
        )));
    }

    // Computed from the index, never accumulated.
    let boundary = |i: u32| start_z + f64::from(i) * section_height;
    let sections: Vec<Section> = (0..section_count)
        .map(|i| Section {
            index: i as usize,
            flow_percent: initial_flow_percent + f64::from(i) * flow_increase,
            start_z: boundary(i),
            end_z: boundary(i + 1),
        })
        .collect();

    for section in &sections {
        debug!(
            "section {}: Z {:.3}..{:.3} mm at {}% flow",
            section.index + 1,
            section.start_z,
            section.end_z,
            section.flow_percent
        );
        if section.flow_percent <= 0.0 {
            warn!(
                "section {} has non-positive flow {}%",
                section.index + 1,
                section.flow_percent
            );
        }
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flow_progression() {
        let sections = schedule_sections(0.4, 5.0, 3, 100.0, 10.0).unwrap();
        let flows: Vec<f64> = sections.iter().map(|s| s.flow_percent).collect();
        assert_eq!(flows, vec![100.0, 110.0, 120.0]);
    }

    #[test]
    fn test_sections_are_contiguous() {
        let sections = schedule_sections(1.3, 0.7, 7, 92.5, -2.5).unwrap();
        assert_eq!(sections.len(), 7);
        assert_relative_eq!(sections[0].start_z, 1.3);
        for pair in sections.windows(2) {
            assert_eq!(pair[0].end_z, pair[1].start_z);
            assert_eq!(pair[1].index, pair[0].index + 1);
        }
        for (i, section) in sections.iter().enumerate() {
            assert_relative_eq!(
                section.flow_percent,
                92.5 + i as f64 * -2.5,
                epsilon = 1e-12
            );
        }
        assert_relative_eq!(sections[6].end_z, 1.3 + 7.0 * 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_no_clamp() {
        let sections = schedule_sections(0.0, 1.0, 3, 100.0, -60.0).unwrap();
        assert_relative_eq!(sections[2].flow_percent, -20.0);
    }

    #[test]
    fn test_zero_sections_rejected() {
        assert!(matches!(
            schedule_sections(0.4, 5.0, 0, 100.0, 10.0),
            Err(BeltflowError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_section_contains() {
        let sections = schedule_sections(0.0, 2.0, 2, 100.0, 5.0).unwrap();
        assert!(sections[0].contains(0.0));
        assert!(!sections[0].contains(2.0));
        assert!(sections[1].contains(2.0));
    }
}
