/// Composite 0–10 provider score (spec.md §4.E "Scoring"): a weighted sum of
/// response-speed, model-efficiency, cost-effectiveness, capability, and
/// recency, smoothed with an EMA so transient latency spikes don't flap
/// provider selection (spec.md §9 "Score stability") — the supplemented
/// helper named in SPEC_FULL.md's ambient-stack section.
#[derive(Debug, Clone, Copy)]
pub struct ScoreComponents {
    pub response_speed: f64,
    pub model_efficiency: f64,
    pub cost_effectiveness: f64,
    pub capability: f64,
    pub recency: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub response_speed: f64,
    pub model_efficiency: f64,
    pub cost_effectiveness: f64,
    pub capability: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            response_speed: 0.3,
            model_efficiency: 0.2,
            cost_effectiveness: 0.2,
            capability: 0.2,
            recency: 0.1,
        }
    }
}

impl ScoreComponents {
    /// Raw composite in [0, 10] before smoothing.
    pub fn composite(&self, weights: &ScoreWeights) -> f64 {
        (self.response_speed * weights.response_speed
            + self.model_efficiency * weights.model_efficiency
            + self.cost_effectiveness * weights.cost_effectiveness
            + self.capability * weights.capability
            + self.recency * weights.recency)
            .clamp(0.0, 10.0)
    }
}

/// Exponential moving average tracker for a provider's score across
/// verification passes.
#[derive(Debug, Clone, Copy)]
pub struct ScoreTracker {
    alpha: f64,
    current: Option<f64>,
}

impl ScoreTracker {
    pub fn new(alpha: f64) -> Self {
        Self { alpha: alpha.clamp(0.0, 1.0), current: None }
    }

    /// Folds a new sample in; the first sample sets the baseline directly.
    pub fn observe(&mut self, sample: f64) -> f64 {
        let updated = match self.current {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.current = Some(updated);
        updated
    }

    pub fn current(&self) -> f64 {
        self.current.unwrap_or(0.0)
    }
}
