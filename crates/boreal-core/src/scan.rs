use tracing::warn;

use crate::integration::Integration;

/// One observation: an ordered list of integrations reduced together and
/// merged into the source model under a single weight.
pub struct Scan {
    pub index: usize,
    pub id: String,
    pub weight: f64,
    pub integrations: Vec<Integration>,
}

impl Scan {
    pub fn new(index: usize, id: &str) -> Self {
        Self {
            index,
            id: id.to_string(),
            weight: 1.0,
            integrations: Vec::new(),
        }
    }

    /// Retire integrations that are too short or too sparse to reduce.
    /// Retired integrations keep their slot so summary ordering holds.
    pub fn validate(&mut self, min_frames: usize, min_channels: usize) {
        for integration in &mut self.integrations {
            if integration.retired {
                continue;
            }
            let frames = integration.n_frames();
            let channels = integration.valid_channel_count();
            if frames < min_frames {
                warn!(
                    scan = %self.id,
                    integration = integration.index,
                    frames,
                    required = min_frames,
                    "integration too short, dropping"
                );
                integration.retired = true;
                integration.comment(&format!("[dropped: {frames} frames]"));
            } else if channels < min_channels {
                warn!(
                    scan = %self.id,
                    integration = integration.index,
                    channels,
                    required = min_channels,
                    "too few valid channels, dropping"
                );
                integration.retired = true;
                integration.comment(&format!("[dropped: {channels} channels]"));
            }
        }
    }
}
