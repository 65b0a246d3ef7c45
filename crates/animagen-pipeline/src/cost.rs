//! Pre-submission cost estimation.
//!
//! Pure and synchronous; never reads queue or job state.

use animagen_models::{CostEstimate, PricingTable, StageSpec};

/// Estimate the cost of running `item_count` items through `stages` at the
/// given prices.
pub fn estimate(item_count: usize, stages: &[StageSpec], pricing: &PricingTable) -> CostEstimate {
    let per_item_usd: f64 = stages.iter().map(|s| pricing.price(s.kind)).sum();
    CostEstimate {
        item_count,
        per_item_usd,
        total_usd: per_item_usd * item_count as f64,
    }
}
