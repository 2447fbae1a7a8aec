use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

/// Exponentially weighted health per (provider, model) pair.
///
/// Scores live in [0, 1]. Outcomes update an EWMA and old observations decay
/// back toward healthy over the observation window, so a provider that
/// failed five minutes ago is not punished forever. A pair whose score falls
/// through the floor is skipped entirely for a cool-down period.
///
/// The map is read on every routing decision and written once per attempt
/// outcome, so updates copy the map and swap the `Arc` while readers keep
/// scanning the previous snapshot.
pub struct HealthTracker {
    inner: RwLock<Arc<HashMap<PairKey, Sample>>>,
    alpha: f64,
    floor: f64,
    cooldown: Duration,
    window: Duration,
}

type PairKey = (String, String);

#[derive(Debug, Clone, Copy)]
struct Sample {
    score: f64,
    updated_at: Instant,
    cooldown_until: Option<Instant>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_tuning(0.1, Duration::from_secs(30), Duration::from_secs(300))
    }

    /// Tuning constructor used by tests and benchmarks.
    pub fn with_tuning(floor: f64, cooldown: Duration, window: Duration) -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashMap::new())),
            alpha: 0.5,
            floor,
            cooldown,
            window,
        }
    }

    /// Current score for a pair. Unobserved pairs are healthy.
    pub fn score(&self, provider: &str, model: &str) -> f64 {
        let snapshot = self.snapshot();

        snapshot
            .get(&(provider.to_string(), model.to_string()))
            .map(|sample| self.decayed(sample))
            .unwrap_or(1.0)
    }

    /// False while the pair sits in its cool-down window.
    pub fn is_available(&self, provider: &str, model: &str) -> bool {
        let snapshot = self.snapshot();

        snapshot
            .get(&(provider.to_string(), model.to_string()))
            .and_then(|sample| sample.cooldown_until)
            .is_none_or(|until| Instant::now() >= until)
    }

    /// Snapshot of every observed pair, for health reporting.
    pub fn entries(&self) -> Vec<(String, String, f64)> {
        let snapshot = self.snapshot();

        let mut entries: Vec<(String, String, f64)> = snapshot
            .iter()
            .map(|((provider, model), sample)| (provider.clone(), model.clone(), self.decayed(sample)))
            .collect();

        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries
    }

    pub fn record_success(&self, provider: &str, model: &str) {
        self.record(provider, model, 1.0);
    }

    pub fn record_failure(&self, provider: &str, model: &str) {
        self.record(provider, model, 0.0);
    }

    fn record(&self, provider: &str, model: &str, outcome: f64) {
        let key = (provider.to_string(), model.to_string());
        let now = Instant::now();

        let Ok(mut guard) = self.inner.write() else {
            return;
        };

        let mut map: HashMap<PairKey, Sample> = (**guard).clone();

        let previous = map.get(&key).map(|sample| self.decayed(sample)).unwrap_or(1.0);
        let score = ((1.0 - self.alpha) * previous + self.alpha * outcome).clamp(0.0, 1.0);

        let cooldown_until = if outcome > 0.0 {
            // A success ends any cool-down immediately.
            None
        } else if score < self.floor {
            Some(now + self.cooldown)
        } else {
            map.get(&key).and_then(|sample| sample.cooldown_until)
        };

        map.insert(
            key,
            Sample {
                score,
                updated_at: now,
                cooldown_until,
            },
        );

        *guard = Arc::new(map);
    }

    /// Decays the recorded penalty toward healthy as the observation ages
    /// out of the window.
    fn decayed(&self, sample: &Sample) -> f64 {
        let age = sample.updated_at.elapsed();
        let window = self.window.as_secs_f64().max(1.0);
        let retention = (-age.as_secs_f64() / window).exp();

        1.0 - (1.0 - sample.score) * retention
    }

    fn snapshot(&self) -> Arc<HashMap<PairKey, Sample>> {
        self.inner
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|_| Arc::new(HashMap::new()))
    }
}
