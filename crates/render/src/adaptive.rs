use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Instance budgets, from worst to best frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLadder {
    pub min: usize,
    pub low: usize,
    pub medium: usize,
    pub max: usize,
}

impl Default for BudgetLadder {
    fn default() -> Self {
        Self {
            min: 80_000,
            low: 100_000,
            medium: 120_000,
            max: 150_000,
        }
    }
}

/// Frame rates separating the ladder steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FpsThresholds {
    /// Below this: `min`.
    pub low: f32,
    /// Below this: `low`.
    pub medium: f32,
    /// Below this: `medium`; otherwise `max`.
    pub high: f32,
}

impl Default for FpsThresholds {
    fn default() -> Self {
        Self {
            low: 45.0,
            medium: 55.0,
            high: 59.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// When off, the budget is always `fixed_budget`.
    pub enabled: bool,
    pub ladder: BudgetLadder,
    pub fps_thresholds: FpsThresholds,
    /// Minimum time between two budget changes, in milliseconds.
    pub debounce_ms: u64,
    pub fixed_budget: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ladder: BudgetLadder::default(),
            fps_thresholds: FpsThresholds::default(),
            debounce_ms: 2000,
            fixed_budget: 150_000,
        }
    }
}

/// Instance budget driven by the measured frame rate.
#[derive(Debug)]
pub struct AdaptiveBudget {
    config: AdaptiveConfig,
    current: usize,
    last_change: Option<Instant>,
    changes: usize,
}

impl AdaptiveBudget {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            current: if config.enabled {
                config.ladder.max
            } else {
                config.fixed_budget
            },
            config,
            last_change: None,
            changes: 0,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Budget without re-evaluating.
    pub fn current(&self) -> usize {
        if self.config.enabled {
            self.current
        } else {
            self.config.fixed_budget
        }
    }

    /// Number of budget changes so far.
    pub fn changes(&self) -> usize {
        self.changes
    }

    /// Ladder step for a frame rate. Zero or non-finite counts as the worst case.
    pub fn target_for(&self, fps: f32) -> usize {
        let ladder = &self.config.ladder;
        let t = &self.config.fps_thresholds;
        if !fps.is_finite() || fps <= 0.0 || fps < t.low {
            ladder.min
        } else if fps < t.medium {
            ladder.low
        } else if fps < t.high {
            ladder.medium
        } else {
            ladder.max
        }
    }

    /// Re-evaluate against `fps`, unless the last change is more recent than
    /// the debounce interval.
    pub fn evaluate(&mut self, fps: f32, now: Instant) -> usize {
        if !self.config.enabled {
            return self.config.fixed_budget;
        }
        let debounce = Duration::from_millis(self.config.debounce_ms);
        if self
            .last_change
            .is_some_and(|t| now.saturating_duration_since(t) < debounce)
        {
            return self.current;
        }
        let target = self.target_for(fps);
        if target != self.current {
            tracing::debug!(fps, from = self.current, to = target, "adaptive budget changed");
            self.current = target;
            self.last_change = Some(now);
            self.changes += 1;
        }
        self.current
    }
}
