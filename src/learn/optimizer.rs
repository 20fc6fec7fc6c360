//! Epsilon-greedy parameter optimization.
//!
//! Exploration samples a parameter uniformly from its bounds. Exploitation
//! picks the parameter whose history correlates most with observed accuracy
//! and nudges it along the direction that has been improving. Epsilon itself
//! adapts to rewards: good outcomes shrink exploration, bad ones grow it.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::{ParameterAdjustment, TunableParameter};

/// Bounds on the adaptive exploration rate.
const EPSILON_MIN: f64 = 0.05;
const EPSILON_MAX: f64 = 0.3;
/// Rewards past these marks shrink / grow epsilon.
const REWARD_GOOD: f64 = 0.8;
const REWARD_POOR: f64 = 0.3;
/// Per-parameter history window.
const HISTORY: usize = 100;
/// Trend window for the exploitation nudge.
const TREND_WINDOW: usize = 5;

pub struct AdaptiveOptimizer {
    epsilon: f64,
    learning_rate: f64,
    history: HashMap<TunableParameter, VecDeque<(f64, f64)>>,
    rng: StdRng,
}

impl AdaptiveOptimizer {
    pub fn new(exploration_rate: f64, learning_rate: f64) -> Self {
        Self {
            epsilon: exploration_rate,
            learning_rate,
            history: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(exploration_rate: f64, learning_rate: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(exploration_rate, learning_rate)
        }
    }

    /// Propose one parameter adjustment given the current values.
    pub fn propose(
        &mut self,
        current: &HashMap<TunableParameter, f64>,
    ) -> ParameterAdjustment {
        if self.rng.gen::<f64>() < self.epsilon {
            self.explore(current)
        } else {
            self.exploit(current)
        }
    }

    /// Uniform sample of a random parameter within its bounds.
    fn explore(&mut self, current: &HashMap<TunableParameter, f64>) -> ParameterAdjustment {
        let parameter = TunableParameter::ALL[self.rng.gen_range(0..TunableParameter::ALL.len())];
        let (lo, hi) = parameter.bounds();
        let new_value = self.rng.gen_range(lo..=hi);

        ParameterAdjustment {
            parameter,
            old_value: current_value(current, parameter),
            new_value,
            expected_improvement: 0.0,
            at: Utc::now(),
        }
    }

    /// Nudge the historically best-correlated parameter along its improving
    /// direction. Falls back to exploration with no usable history.
    fn exploit(&mut self, current: &HashMap<TunableParameter, f64>) -> ParameterAdjustment {
        let best = self
            .history
            .iter()
            .filter(|(_, entries)| entries.len() >= 2)
            .map(|(&param, entries)| (param, correlation(entries)))
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let Some((parameter, score)) = best else {
            return self.explore(current);
        };

        let old_value = current_value(current, parameter);
        let entries = &self.history[&parameter];
        let recent: Vec<&(f64, f64)> = entries.iter().rev().take(TREND_WINDOW).rev().collect();

        let delta = if recent.len() >= 2 {
            let value_trend = recent[recent.len() - 1].0 - recent[0].0;
            let reward_trend = recent[recent.len() - 1].1 - recent[0].1;
            // Keep moving the way rewards improved; reverse otherwise.
            if reward_trend >= 0.0 {
                self.learning_rate * value_trend
            } else {
                -self.learning_rate * value_trend
            }
        } else {
            self.learning_rate * old_value * (self.rng.gen::<f64>() - 0.5)
        };

        let (lo, hi) = parameter.bounds();
        ParameterAdjustment {
            parameter,
            old_value,
            new_value: (old_value + delta).clamp(lo, hi),
            expected_improvement: score,
            at: Utc::now(),
        }
    }

    /// Record the reward observed after an adjustment and adapt epsilon.
    pub fn record_outcome(&mut self, parameter: TunableParameter, value: f64, reward: f64) {
        let entries = self.history.entry(parameter).or_default();
        if entries.len() >= HISTORY {
            entries.pop_front();
        }
        entries.push_back((value, reward));

        if reward > REWARD_GOOD {
            self.epsilon = (self.epsilon * 0.99).max(EPSILON_MIN);
        } else if reward < REWARD_POOR {
            self.epsilon = (self.epsilon * 1.01).min(EPSILON_MAX);
        }
        debug!(parameter = %parameter, reward, epsilon = self.epsilon, "Optimizer outcome recorded");
    }

    pub fn exploration_rate(&self) -> f64 {
        self.epsilon
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

fn current_value(current: &HashMap<TunableParameter, f64>, parameter: TunableParameter) -> f64 {
    current.get(&parameter).copied().unwrap_or_else(|| {
        let (lo, hi) = parameter.bounds();
        (lo + hi) / 2.0
    })
}

/// Absolute Pearson correlation between values and rewards.
fn correlation(entries: &VecDeque<(f64, f64)>) -> f64 {
    let n = entries.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_v = entries.iter().map(|(v, _)| v).sum::<f64>() / n;
    let mean_r = entries.iter().map(|(_, r)| r).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_v = 0.0;
    let mut var_r = 0.0;
    for (v, r) in entries {
        cov += (v - mean_v) * (r - mean_r);
        var_v += (v - mean_v).powi(2);
        var_r += (r - mean_r).powi(2);
    }
    if var_v <= 0.0 || var_r <= 0.0 {
        return 0.0;
    }
    (cov / (var_v * var_r).sqrt()).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> HashMap<TunableParameter, f64> {
        let mut map = HashMap::new();
        map.insert(TunableParameter::TickInterval, 0.1);
        map.insert(TunableParameter::SafetyThreshold, 0.5);
        map
    }

    #[test]
    fn proposals_respect_parameter_bounds() {
        let mut optimizer = AdaptiveOptimizer::with_seed(1.0, 0.01, 7);
        for _ in 0..50 {
            let adjustment = optimizer.propose(&current());
            let (lo, hi) = adjustment.parameter.bounds();
            assert!(
                adjustment.new_value >= lo && adjustment.new_value <= hi,
                "{} out of bounds: {}",
                adjustment.parameter,
                adjustment.new_value
            );
        }
    }

    #[test]
    fn good_rewards_shrink_exploration() {
        let mut optimizer = AdaptiveOptimizer::with_seed(0.1, 0.01, 7);
        for _ in 0..20 {
            optimizer.record_outcome(TunableParameter::TickInterval, 0.1, 0.95);
        }
        assert!(optimizer.exploration_rate() < 0.1);
        assert!(optimizer.exploration_rate() >= EPSILON_MIN);
    }

    #[test]
    fn poor_rewards_grow_exploration_up_to_the_cap() {
        let mut optimizer = AdaptiveOptimizer::with_seed(0.29, 0.01, 7);
        for _ in 0..200 {
            optimizer.record_outcome(TunableParameter::TickInterval, 0.1, 0.1);
        }
        assert!((optimizer.exploration_rate() - EPSILON_MAX).abs() < 1e-9);
    }

    #[test]
    fn neutral_rewards_leave_epsilon_alone() {
        let mut optimizer = AdaptiveOptimizer::with_seed(0.1, 0.01, 7);
        optimizer.record_outcome(TunableParameter::TickInterval, 0.1, 0.5);
        assert_eq!(optimizer.exploration_rate(), 0.1);
    }

    #[test]
    fn exploitation_prefers_the_correlated_parameter() {
        // epsilon 0 forces exploitation
        let mut optimizer = AdaptiveOptimizer::with_seed(0.0, 0.01, 7);
        // Strongly correlated rewards for TickInterval
        for i in 0..10 {
            let v = 0.05 + 0.01 * i as f64;
            optimizer.record_outcome(TunableParameter::TickInterval, v, 0.5 + 0.04 * i as f64);
        }
        // Uncorrelated noise for SafetyThreshold
        for i in 0..10 {
            let v = 0.1 + 0.08 * (i % 2) as f64;
            optimizer.record_outcome(TunableParameter::SafetyThreshold, v, 0.5);
        }

        let adjustment = optimizer.propose(&current());
        assert_eq!(adjustment.parameter, TunableParameter::TickInterval);
        assert!(adjustment.expected_improvement > 0.9);
        // Rewards improved while the value grew, so keep growing
        assert!(adjustment.new_value > adjustment.old_value);
    }

    #[test]
    fn correlation_of_constant_series_is_zero() {
        let mut entries = VecDeque::new();
        entries.push_back((0.1, 0.5));
        entries.push_back((0.1, 0.6));
        assert_eq!(correlation(&entries), 0.0);
    }
}
