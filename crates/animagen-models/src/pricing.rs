//! Provider pricing for pre-submission cost estimates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::stage::{StageKind, VideoDuration};

/// Price per item for each stage kind, in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub per_stage: HashMap<StageKind, f64>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self {
            per_stage: HashMap::new(),
        }
    }

    pub fn with_stage(mut self, kind: StageKind, usd: f64) -> Self {
        self.per_stage.insert(kind, usd);
        self
    }

    /// Vendor list prices for the configured clip duration
    /// ($0.02 per keyframe, $0.05 per video-second, $0.01 per LLM call).
    pub fn standard(duration: VideoDuration) -> Self {
        Self::new()
            .with_stage(StageKind::Llm, 0.01)
            .with_stage(StageKind::Keyframe, 0.02)
            .with_stage(StageKind::Video, 0.05 * f64::from(duration.seconds()))
    }

    pub fn price(&self, kind: StageKind) -> f64 {
        self.per_stage.get(&kind).copied().unwrap_or(0.0)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::standard(VideoDuration::default())
    }
}

/// Result of a cost estimate. Purely informational, never enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub item_count: usize,
    pub per_item_usd: f64,
    pub total_usd: f64,
}
