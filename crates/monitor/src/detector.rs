use metrics::counter;
use serde::Serialize;

/// Classification of one balance reading against the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum BalanceDelta {
    /// First reading after a (re)start; establishes the baseline only.
    Initial(u64),
    Increase(u64),
    Decrease(u64),
    Unchanged,
}

impl BalanceDelta {
    fn label(&self) -> &'static str {
        match self {
            BalanceDelta::Initial(_) => "initial",
            BalanceDelta::Increase(_) => "increase",
            BalanceDelta::Decrease(_) => "decrease",
            BalanceDelta::Unchanged => "unchanged",
        }
    }
}

/// Remembers the last observed balance and classifies each new reading.
#[derive(Debug, Default, Clone)]
pub struct DeltaDetector {
    previous: Option<u64>,
}

impl DeltaDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the baseline to `amount` and reports how it moved.
    pub fn observe(&mut self, amount: u64) -> BalanceDelta {
        let delta = match self.previous {
            None => BalanceDelta::Initial(amount),
            Some(previous) if amount > previous => BalanceDelta::Increase(amount - previous),
            Some(previous) if amount < previous => BalanceDelta::Decrease(previous - amount),
            Some(_) => BalanceDelta::Unchanged,
        };
        self.previous = Some(amount);
        counter!("monitor_deltas_total", "kind" => delta.label()).increment(1);
        delta
    }

    pub fn baseline(&self) -> Option<u64> {
        self.previous
    }

    /// Forgets the baseline so the next reading is treated as initial.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
