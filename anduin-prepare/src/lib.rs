//! # Anduin preprocessing
//!
//! Turns an imported node-based road graph into a query-ready dataset:
//! expansion into the edge-based (turn) graph, connected-component
//! labeling, and contraction-hierarchy construction.

pub mod components;
pub mod contractor;
pub mod edge_based;
pub mod import;
pub mod restriction_map;

use anduin_graph::EdgeWeight;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("preprocessing was cancelled")]
    Cancelled,
    #[error("the import data is inconsistent: {0}")]
    InvalidImport(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("import file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Penalties applied while expanding turns, as produced by the profile.
#[derive(Clone, Copy, Debug)]
pub struct SpeedProfile {
    pub traffic_signal_penalty: EdgeWeight,
    pub u_turn_penalty: EdgeWeight,
    pub use_turn_restrictions: bool,
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self {
            traffic_signal_penalty: 10,
            u_turn_penalty: 20,
            use_turn_restrictions: true,
        }
    }
}

/// Preprocessing knobs.
#[derive(Clone, Copy, Debug)]
pub struct PrepareConfig {
    pub speed_profile: SpeedProfile,
    /// Components with fewer nodes than this are flagged tiny and
    /// suppressed from low-zoom snapping.
    pub tiny_component_max_size: u32,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            speed_profile: SpeedProfile::default(),
            tiny_component_max_size: 1000,
        }
    }
}
