// =============================================================================
// Advice history — 24h-capped per-asset ring of generated Advice
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{Advice, Asset};

const RETENTION_HOURS: i64 = 24;

/// Every piece of advice the pipeline has generated, grouped by asset and
/// trimmed to the last 24 hours on each push. Read access clones the
/// requested slice; writers never block readers of a different asset.
#[derive(Default)]
pub struct AdviceHistory {
    by_asset: RwLock<HashMap<String, Vec<Advice>>>,
}

impl AdviceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, asset: &Asset, advice: Advice) {
        let mut guard = self.by_asset.write();
        let entries = guard.entry(asset.to_string()).or_default();
        entries.push(advice);

        let cutoff = Utc::now() - chrono::Duration::hours(RETENTION_HOURS);
        entries.retain(|a| {
            DateTime::parse_from_rfc3339(&a.generated_at)
                .map(|t| t.with_timezone(&Utc) >= cutoff)
                .unwrap_or(true)
        });
    }

    /// Most recent `limit` entries for `asset`, newest last.
    pub fn recent(&self, asset: &Asset, limit: usize) -> Vec<Advice> {
        let guard = self.by_asset.read();
        match guard.get(&asset.to_string()) {
            Some(entries) => {
                let start = entries.len().saturating_sub(limit);
                entries[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Latest advice across every asset, one per asset.
    pub fn latest_all(&self) -> Vec<Advice> {
        self.by_asset
            .read()
            .values()
            .filter_map(|v| v.last().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdviceAction, AdviceSource};

    fn advice(asset: &Asset) -> Advice {
        Advice {
            asset: asset.clone(),
            action: AdviceAction::Buy,
            confidence: 0.8,
            entry: 100.0,
            stop_loss: 98.0,
            take_profit_tiers: Vec::new(),
            reasoning_text: "test".into(),
            source: AdviceSource::Rules,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn push_and_recent_round_trip() {
        let history = AdviceHistory::new();
        let asset = Asset::crypto("BTCUSDT");
        history.push(&asset, advice(&asset));
        history.push(&asset, advice(&asset));
        let recent = history.recent(&asset, 1);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn old_entries_are_trimmed() {
        let history = AdviceHistory::new();
        let asset = Asset::crypto("BTCUSDT");
        let mut stale = advice(&asset);
        stale.generated_at = (Utc::now() - chrono::Duration::hours(30)).to_rfc3339();
        history.by_asset.write().insert(asset.to_string(), vec![stale]);
        history.push(&asset, advice(&asset));
        assert_eq!(history.recent(&asset, 10).len(), 1);
    }

    #[test]
    fn unknown_asset_returns_empty() {
        let history = AdviceHistory::new();
        assert!(history.recent(&Asset::crypto("XRPUSDT"), 5).is_empty());
    }
}
