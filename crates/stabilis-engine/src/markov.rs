//! Four-state Markov model of the system's operating mode.
//!
//! States are fixed: {normal, suspicious, attack, blocked}. Every observed
//! transition bumps a count and renormalizes its row, so the probability
//! matrix is row-stochastic after any sequence of updates. A row with no
//! observations is a self-loop of probability 1.
//!
//! Derived quantities:
//!
//! - stationary distribution by power iteration from uniform
//!   (`π ← πP` until `‖π' − π‖₁ < tol` or the iteration cap)
//! - n-step attack probability `(π₀ Pⁿ)[attack]` from the empirical
//!   visit distribution `π₀`
//! - mean time to attack from the fundamental matrix `N = (I − Q)⁻¹` over the
//!   non-attack states reachable from the start; undefined when
//!   `|det(I − Q)|` is below the configured epsilon
//! - Dobrushin contraction `δ(P) = max_{i,j} TV(P(·|i), P(·|j))`

use crate::config::MarkovConfig;
use crate::error::Result;

pub const STATE_COUNT: usize = 4;

/// Non-attack states, in the order used for `Q`.
const TRANSIENT: [MarkovState; 3] = [
    MarkovState::Normal,
    MarkovState::Suspicious,
    MarkovState::Blocked,
];

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkovState {
    Normal = 0,
    Suspicious = 1,
    Attack = 2,
    Blocked = 3,
}

impl MarkovState {
    pub const ALL: [Self; STATE_COUNT] = [
        Self::Normal,
        Self::Suspicious,
        Self::Attack,
        Self::Blocked,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Suspicious => "suspicious",
            Self::Attack => "attack",
            Self::Blocked => "blocked",
        }
    }
}

// ---------------------------------------------------------------------------
// Transition matrix
// ---------------------------------------------------------------------------

/// Observation counts and their row-normalized probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    counts: [[u64; STATE_COUNT]; STATE_COUNT],
    probs: [[f64; STATE_COUNT]; STATE_COUNT],
}

impl TransitionMatrix {
    #[must_use]
    pub fn new() -> Self {
        let mut probs = [[0.0; STATE_COUNT]; STATE_COUNT];
        for (i, row) in probs.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self {
            counts: [[0; STATE_COUNT]; STATE_COUNT],
            probs,
        }
    }

    /// Count one `from → to` transition and renormalize that row.
    pub fn record(&mut self, from: MarkovState, to: MarkovState) {
        let i = from.index();
        self.counts[i][to.index()] += 1;
        self.renormalize(i);
    }

    fn renormalize(&mut self, i: usize) {
        let total: u64 = self.counts[i].iter().sum();
        if total == 0 {
            self.probs[i] = [0.0; STATE_COUNT];
            self.probs[i][i] = 1.0;
            return;
        }
        let total = total as f64;
        for j in 0..STATE_COUNT {
            self.probs[i][j] = self.counts[i][j] as f64 / total;
        }
    }

    #[must_use]
    pub fn probability(&self, from: MarkovState, to: MarkovState) -> f64 {
        self.probs[from.index()][to.index()]
    }

    #[must_use]
    pub fn count(&self, from: MarkovState, to: MarkovState) -> u64 {
        self.counts[from.index()][to.index()]
    }

    #[must_use]
    pub fn row(&self, from: MarkovState) -> &[f64; STATE_COUNT] {
        &self.probs[from.index()]
    }

    #[must_use]
    pub fn rows(&self) -> &[[f64; STATE_COUNT]; STATE_COUNT] {
        &self.probs
    }

    #[must_use]
    pub fn total_transitions(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    fn step(&self, pi: &[f64; STATE_COUNT]) -> [f64; STATE_COUNT] {
        let mut next = [0.0; STATE_COUNT];
        for (i, &mass) in pi.iter().enumerate() {
            for (j, slot) in next.iter_mut().enumerate() {
                *slot += mass * self.probs[i][j];
            }
        }
        next
    }
}

impl Default for TransitionMatrix {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationaryDistribution {
    pub distribution: [f64; STATE_COUNT],
    pub iterations: u32,
    pub converged: bool,
}

impl StationaryDistribution {
    #[must_use]
    pub fn probability(&self, state: MarkovState) -> f64 {
        self.distribution[state.index()]
    }
}

/// Mean number of steps until `attack` is first reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeanTimeToAttack {
    Steps(f64),
    /// `(I − Q)` singular or ill-conditioned.
    Undefined,
}

impl MeanTimeToAttack {
    #[must_use]
    pub fn steps(self) -> Option<f64> {
        match self {
            Self::Steps(s) => Some(s),
            Self::Undefined => None,
        }
    }
}

/// Per-tick Markov summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkovSummary {
    pub state: MarkovState,
    pub stationary: StationaryDistribution,
    /// One-step attack probability from the empirical distribution.
    pub attack_probability: f64,
    pub mean_time_to_attack: MeanTimeToAttack,
    pub contraction: f64,
    pub predicted_next: MarkovState,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MarkovStateTracker {
    config: MarkovConfig,
    matrix: TransitionMatrix,
    current: Option<MarkovState>,
    visits: [u64; STATE_COUNT],
}

impl MarkovStateTracker {
    pub fn new(config: MarkovConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            matrix: TransitionMatrix::new(),
            current: None,
            visits: [0; STATE_COUNT],
        })
    }

    #[must_use]
    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    #[must_use]
    pub fn current_state(&self) -> Option<MarkovState> {
        self.current
    }

    pub fn update_transition(&mut self, from: MarkovState, to: MarkovState) {
        self.matrix.record(from, to);
    }

    /// Record that the system is now in `state`, counting the transition from
    /// the previous state if there was one.
    pub fn observe(&mut self, state: MarkovState) {
        if let Some(prev) = self.current {
            self.update_transition(prev, state);
        }
        self.visits[state.index()] += 1;
        self.current = Some(state);
    }

    /// Visit frequencies; uniform before any observation.
    #[must_use]
    pub fn empirical_distribution(&self) -> [f64; STATE_COUNT] {
        let total: u64 = self.visits.iter().sum();
        if total == 0 {
            return [1.0 / STATE_COUNT as f64; STATE_COUNT];
        }
        self.visits.map(|v| v as f64 / total as f64)
    }

    #[must_use]
    pub fn stationary_distribution(&self) -> StationaryDistribution {
        let mut pi = [1.0 / STATE_COUNT as f64; STATE_COUNT];
        for iteration in 1..=self.config.max_iterations {
            let next = self.matrix.step(&pi);
            let diff: f64 = next.iter().zip(&pi).map(|(a, b)| (a - b).abs()).sum();
            pi = next;
            if diff < self.config.tolerance {
                return StationaryDistribution {
                    distribution: pi,
                    iterations: iteration,
                    converged: true,
                };
            }
        }
        StationaryDistribution {
            distribution: pi,
            iterations: self.config.max_iterations,
            converged: false,
        }
    }

    /// `(π₀ Pⁿ)[attack]`.
    #[must_use]
    pub fn attack_probability(&self, steps: u32) -> f64 {
        let mut pi = self.empirical_distribution();
        for _ in 0..steps {
            pi = self.matrix.step(&pi);
        }
        pi[MarkovState::Attack.index()]
    }

    #[must_use]
    pub fn mean_time_to_attack(&self) -> MeanTimeToAttack {
        self.mean_time_to_attack_from(MarkovState::Normal)
    }

    /// Expected steps from `start` until `attack`; 0 from `attack` itself.
    ///
    /// `Q` is restricted to the non-attack states reachable from `start`
    /// without passing through `attack`.
    #[must_use]
    pub fn mean_time_to_attack_from(&self, start: MarkovState) -> MeanTimeToAttack {
        if start == MarkovState::Attack {
            return MeanTimeToAttack::Steps(0.0);
        }
        let reachable = self.reachable_transient(start);
        let n = reachable.len();
        let mut a = [[0.0; 3]; 3];
        for (r, from) in reachable.iter().enumerate() {
            for (c, to) in reachable.iter().enumerate() {
                let id = if r == c { 1.0 } else { 0.0 };
                a[r][c] = id - self.matrix.probability(*from, *to);
            }
        }
        // `start` is always first in `reachable`.
        match solve(a, n, self.config.singular_epsilon) {
            Some(t) if t[0].is_finite() && t[0] >= 0.0 => MeanTimeToAttack::Steps(t[0]),
            _ => MeanTimeToAttack::Undefined,
        }
    }

    fn reachable_transient(&self, start: MarkovState) -> Vec<MarkovState> {
        let mut seen = vec![start];
        let mut i = 0;
        while i < seen.len() {
            let from = seen[i];
            for to in TRANSIENT {
                if self.matrix.probability(from, to) > 0.0 && !seen.contains(&to) {
                    seen.push(to);
                }
            }
            i += 1;
        }
        seen
    }

    /// Most likely successor of `state` (lowest index on ties).
    #[must_use]
    pub fn predict_next_state(&self, state: MarkovState) -> MarkovState {
        let row = self.matrix.row(state);
        let mut best = 0;
        for j in 1..STATE_COUNT {
            if row[j] > row[best] {
                best = j;
            }
        }
        MarkovState::ALL[best]
    }

    /// Dobrushin `δ(P) ∈ [0, 1]`; `1 − δ` is the per-step mixing margin.
    #[must_use]
    pub fn contraction_coefficient(&self) -> f64 {
        let rows = self.matrix.rows();
        let mut delta: f64 = 0.0;
        for i in 0..STATE_COUNT {
            for j in (i + 1)..STATE_COUNT {
                let tv: f64 = rows[i]
                    .iter()
                    .zip(&rows[j])
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    * 0.5;
                delta = delta.max(tv);
            }
        }
        delta.clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn summary(&self) -> Option<MarkovSummary> {
        let state = self.current?;
        Some(MarkovSummary {
            state,
            stationary: self.stationary_distribution(),
            attack_probability: self.attack_probability(1),
            mean_time_to_attack: self.mean_time_to_attack(),
            contraction: self.contraction_coefficient(),
            predicted_next: self.predict_next_state(state),
        })
    }
}

/// Solve `a·x = 1` over the leading `n × n` block by Gauss-Jordan
/// elimination with partial pivoting. `None` when `|det(a)| < eps`.
fn solve(mut a: [[f64; 3]; 3], n: usize, eps: f64) -> Option<[f64; 3]> {
    let mut b = [1.0; 3];
    let mut det = 1.0;
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if pivot != col {
            a.swap(pivot, col);
            b.swap(pivot, col);
            det = -det;
        }
        let p = a[col][col];
        det *= p;
        if p == 0.0 {
            return None;
        }
        for k in 0..n {
            a[col][k] /= p;
        }
        b[col] /= p;
        for row in 0..n {
            if row != col {
                let f = a[row][col];
                if f != 0.0 {
                    for k in 0..n {
                        a[row][k] -= f * a[col][k];
                    }
                    b[row] -= f * b[col];
                }
            }
        }
    }
    if det.abs() < eps { None } else { Some(b) }
}
