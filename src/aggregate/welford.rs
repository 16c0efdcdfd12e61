//! Welford online mean/variance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metric::MetricResult;

use super::{AggregateError, Aggregator, AggregatorFactory, Summary};

/// Single-pass running statistics for one value stream.
///
/// Keeps count, mean, the sum of squared deviations (M2) and min/max in
/// constant memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WelfordState {
    count: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl WelfordState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of a whole batch computed in two passes.
    pub fn from_batch(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::new();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let m2 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        Self {
            count: values.len() as u64,
            mean,
            m2,
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
        }
    }

    /// Adds one observation.
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;

        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Combines two states as if all observations had been pushed into one.
    pub fn merge(&mut self, other: &WelfordState) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        let na = self.count as f64;
        let nb = other.count as f64;
        let n = na + nb;
        let delta = other.mean - self.mean;

        self.mean += delta * nb / n;
        self.m2 += other.m2 + delta * delta * na * nb / n;
        self.count += other.count;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean, `None` without observations.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population variance (divides by n).
    pub fn variance(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }

    /// Sample variance (divides by n - 1), `None` below two observations.
    pub fn sample_variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Writes `prefix.mean`, `prefix.variance`, ... into `out`.
    fn write_statistics(&self, prefix: &str, out: &mut BTreeMap<String, f64>) {
        let entries = [
            ("mean", self.mean()),
            ("variance", self.variance()),
            ("std", self.std_dev()),
            ("min", self.min()),
            ("max", self.max()),
        ];
        for (name, value) in entries {
            if let Some(value) = value {
                out.insert(format!("{}.{}", prefix, name), value);
            }
        }
        out.insert(format!("{}.count", prefix), self.count as f64);
    }
}

/// Default aggregator: one [`WelfordState`] per value key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerKeyWelford {
    count: u64,
    keys: BTreeMap<String, WelfordState>,
}

impl PerKeyWelford {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a single value key.
    pub fn key(&self, name: &str) -> Option<&WelfordState> {
        self.keys.get(name)
    }
}

impl Aggregator for PerKeyWelford {
    fn update(&mut self, result: &MetricResult) {
        self.count += 1;
        for (key, value) in &result.values {
            self.keys.entry(key.clone()).or_default().push(*value);
        }
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn finalize(&self) -> Summary {
        let mut statistics = BTreeMap::new();
        for (key, state) in &self.keys {
            state.write_statistics(key, &mut statistics);
        }
        Summary {
            count: self.count,
            statistics,
        }
    }

    fn snapshot(&self) -> Result<serde_json::Value, AggregateError> {
        serde_json::to_value(self).map_err(AggregateError::Snapshot)
    }
}

/// Factory for [`PerKeyWelford`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PerKeyWelfordFactory;

impl AggregatorFactory for PerKeyWelfordFactory {
    fn name(&self) -> &str {
        "welford"
    }

    fn create(&self) -> Box<dyn Aggregator> {
        Box::new(PerKeyWelford::new())
    }

    fn restore(&self, state: serde_json::Value) -> Result<Box<dyn Aggregator>, AggregateError> {
        let restored: PerKeyWelford =
            serde_json::from_value(state).map_err(|source| AggregateError::Restore {
                aggregator: self.name().to_string(),
                source,
            })?;
        Ok(Box::new(restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-10;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < TOLERANCE).unwrap_or(false)
    }

    #[test]
    fn test_empty_state_has_no_statistics() {
        let state = WelfordState::new();
        assert_eq!(state.mean(), None);
        assert_eq!(state.variance(), None);
        assert_eq!(state.min(), None);
        assert!(PerKeyWelford::new().finalize().statistics.is_empty());
    }

    #[test]
    fn test_identical_values() {
        let mut agg = PerKeyWelford::new();
        for _ in 0..25 {
            agg.update(&MetricResult::new("m").with_value("v", 0.75));
        }
        let summary = agg.finalize();
        assert_eq!(summary.count, 25);
        assert_eq!(summary.get("v.mean"), Some(0.75));
        assert_eq!(summary.get("v.variance"), Some(0.0));
        assert_eq!(summary.get("v.min"), Some(0.75));
        assert_eq!(summary.get("v.max"), Some(0.75));
        assert_eq!(summary.get("v.count"), Some(25.0));
    }

    #[test]
    fn test_incremental_matches_batch() {
        let values: Vec<f64> = (0..1000)
            .map(|i| ((i * 37 % 101) as f64).sin() * 1e3 + 1e6)
            .collect();

        let mut incremental = WelfordState::new();
        for v in &values {
            incremental.push(*v);
        }
        let batch = WelfordState::from_batch(&values);

        assert_eq!(incremental.count(), batch.count());
        assert!(close(incremental.mean(), batch.mean().unwrap_or(f64::NAN)));
        let relative = (incremental.variance().unwrap_or(f64::NAN)
            - batch.variance().unwrap_or(f64::NAN))
        .abs()
            / batch.variance().unwrap_or(1.0);
        assert!(relative < 1e-9, "relative variance error {}", relative);
        assert_eq!(incremental.min(), batch.min());
        assert_eq!(incremental.max(), batch.max());
    }

    #[test]
    fn test_merge_matches_single_stream() {
        let values = [0.5, 1.5, 2.0, 8.0, -3.0, 4.25, 0.0];
        let mut whole = WelfordState::new();
        values.iter().for_each(|v| whole.push(*v));

        let mut left = WelfordState::from_batch(&values[..3]);
        let right = WelfordState::from_batch(&values[3..]);
        left.merge(&right);

        assert_eq!(left.count(), whole.count());
        assert!(close(left.mean(), whole.mean().unwrap_or(f64::NAN)));
        assert!(close(left.variance(), whole.variance().unwrap_or(f64::NAN)));
        assert_eq!(left.min(), Some(-3.0));
        assert_eq!(left.max(), Some(8.0));

        let mut empty = WelfordState::new();
        empty.merge(&whole);
        assert_eq!(empty, whole);
    }

    #[test]
    fn test_known_variance() {
        let state = WelfordState::from_batch(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!(close(state.mean(), 5.0));
        assert!(close(state.variance(), 4.0));
        assert!(close(state.std_dev(), 2.0));
        assert!(close(state.sample_variance(), 32.0 / 7.0));
    }

    #[test]
    fn test_snapshot_restore_is_exact() {
        let mut agg = PerKeyWelford::new();
        for i in 0..17 {
            agg.update(
                &MetricResult::new("m")
                    .with_value("a", (i as f64).sqrt() / 3.0)
                    .with_value("b", 1.0 / (i as f64 + 7.0)),
            );
        }
        let snapshot = agg.snapshot().expect("snapshot");
        let text = serde_json::to_string(&snapshot).expect("encode");
        let decoded: serde_json::Value = serde_json::from_str(&text).expect("decode");
        let mut restored = PerKeyWelfordFactory.restore(decoded).expect("restore");

        let next = MetricResult::new("m").with_value("a", 0.3).with_value("b", 0.9);
        agg.update(&next);
        restored.update(&next);
        assert_eq!(restored.finalize(), agg.finalize());
    }
}
