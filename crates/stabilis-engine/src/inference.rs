//! Interval estimates of arrival rates and a two-sample shift test.
//!
//! - Poisson rate from a count over a window: `λ̂ = n / T` with the normal
//!   interval `λ̂ ± z·√(λ̂ / T)`, lower bound clamped at 0.
//! - Exponential rate from inter-arrival gaps: `λ̂ = 1 / mean` with the
//!   exact chi-square interval `λ̂·χ²(α/2; 2n) / 2n ..= λ̂·χ²(1−α/2; 2n) / 2n`.
//! - Baseline vs current window: pooled Student t, Mann-Whitney U (normal
//!   approximation with tie and continuity correction) and two-sample
//!   Kolmogorov-Smirnov (asymptotic). The three p-values are combined by
//!   their harmonic mean; the current window is flagged when that falls
//!   below `α = 1 − confidence_level`.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

use crate::error::{EngineError, Result};

/// Fewest points per sample the two-sample test accepts.
pub const MIN_TEST_SAMPLES: usize = 5;

/// Series cutoff for the Kolmogorov distribution tail.
const KS_TERMS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateModel {
    Poisson,
    Exponential,
}

/// Point estimate and interval of an arrival rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    pub model: RateModel,
    pub lambda: f64,
    /// Mean of the modelled quantity (count rate or inter-arrival gap).
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
}

impl RateEstimate {
    #[must_use]
    pub fn contains(&self, lambda: f64) -> bool {
        (self.lower..=self.upper).contains(&lambda)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestStatistic {
    pub statistic: f64,
    pub p_value: f64,
}

/// Outcome of comparing a current window against the baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoSampleTest {
    pub t_test: TestStatistic,
    /// `U` of the baseline sample.
    pub mann_whitney: TestStatistic,
    /// `D = sup |F_baseline − F_current|`.
    pub kolmogorov_smirnov: TestStatistic,
    pub combined_p_value: f64,
    pub significance: f64,
    pub is_anomaly: bool,
}

impl TwoSampleTest {
    #[must_use]
    pub fn confidence(&self) -> f64 {
        1.0 - self.combined_p_value
    }
}

/// Estimators and tests at one confidence level.
#[derive(Debug, Clone)]
pub struct StatisticalInference {
    confidence_level: f64,
    standard_normal: Normal,
}

impl StatisticalInference {
    pub fn new(confidence_level: f64) -> Result<Self> {
        if !(confidence_level.is_finite() && confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(EngineError::config("confidence_level", "must lie in (0, 1)"));
        }
        let standard_normal = Normal::new(0.0, 1.0).map_err(|_| EngineError::NumericDegeneracy {
            what: "standard normal",
        })?;
        Ok(Self {
            confidence_level,
            standard_normal,
        })
    }

    #[must_use]
    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// `α = 1 − confidence_level`.
    #[must_use]
    pub fn significance(&self) -> f64 {
        1.0 - self.confidence_level
    }

    /// Two-sided critical value `z(1 − α/2)`.
    #[must_use]
    pub fn critical_z(&self) -> f64 {
        self.standard_normal.inverse_cdf(1.0 - self.significance() / 2.0)
    }

    /// Rate of `arrivals` events observed over `window` seconds.
    pub fn poisson_rate(&self, arrivals: f64, window: f64) -> Result<RateEstimate> {
        if !(window.is_finite() && window > 0.0) {
            return Err(EngineError::config("window", "must be finite and > 0"));
        }
        if !(arrivals.is_finite() && arrivals >= 0.0) {
            return Err(EngineError::NumericDegeneracy {
                what: "arrival count must be finite and >= 0",
            });
        }
        let lambda = arrivals / window;
        let half_width = self.critical_z() * (lambda / window).sqrt();
        Ok(RateEstimate {
            model: RateModel::Poisson,
            lambda,
            mean: lambda,
            variance: lambda,
            std_dev: lambda.sqrt(),
            lower: (lambda - half_width).max(0.0),
            upper: lambda + half_width,
        })
    }

    /// Rate of a process with the given inter-arrival gaps.
    pub fn exponential_rate(&self, gaps: &[f64]) -> Result<RateEstimate> {
        if gaps.len() < 2 {
            return Err(EngineError::InsufficientData {
                needed: 2,
                have: gaps.len(),
            });
        }
        if gaps.iter().any(|g| !(g.is_finite() && *g >= 0.0)) {
            return Err(EngineError::NumericDegeneracy {
                what: "inter-arrival gaps must be finite and >= 0",
            });
        }
        let n = gaps.len() as f64;
        let mean = gaps.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return Err(EngineError::NumericDegeneracy {
                what: "zero mean inter-arrival gap",
            });
        }
        let lambda = 1.0 / mean;
        let dof = 2.0 * n;
        let chi2 = ChiSquared::new(dof).map_err(|_| EngineError::NumericDegeneracy {
            what: "chi-square degrees of freedom",
        })?;
        let alpha = self.significance();
        let variance = mean * mean;
        Ok(RateEstimate {
            model: RateModel::Exponential,
            lambda,
            mean,
            variance,
            std_dev: mean,
            lower: lambda * chi2.inverse_cdf(alpha / 2.0) / dof,
            upper: lambda * chi2.inverse_cdf(1.0 - alpha / 2.0) / dof,
        })
    }

    /// Test whether `current` is drawn from the same law as `baseline`.
    ///
    /// Non-finite values are dropped first; each side then needs at least
    /// [`MIN_TEST_SAMPLES`] points.
    pub fn two_sample_test(&self, baseline: &[f64], current: &[f64]) -> Result<TwoSampleTest> {
        let a: Vec<f64> = baseline.iter().copied().filter(|x| x.is_finite()).collect();
        let b: Vec<f64> = current.iter().copied().filter(|x| x.is_finite()).collect();
        let have = a.len().min(b.len());
        if have < MIN_TEST_SAMPLES {
            return Err(EngineError::InsufficientData {
                needed: MIN_TEST_SAMPLES,
                have,
            });
        }

        let t_test = pooled_t(&a, &b)?;
        let mann_whitney = self.mann_whitney(&a, &b);
        let kolmogorov_smirnov = kolmogorov_smirnov(&a, &b);

        let ps = [t_test.p_value, mann_whitney.p_value, kolmogorov_smirnov.p_value];
        let combined_p_value = if ps.iter().any(|p| *p <= 0.0) {
            0.0
        } else {
            ps.len() as f64 / ps.iter().map(|p| 1.0 / p).sum::<f64>()
        };
        let significance = self.significance();
        Ok(TwoSampleTest {
            t_test,
            mann_whitney,
            kolmogorov_smirnov,
            combined_p_value,
            significance,
            is_anomaly: combined_p_value < significance,
        })
    }

    fn mann_whitney(&self, a: &[f64], b: &[f64]) -> TestStatistic {
        let (n1, n2) = (a.len(), b.len());
        let mut pooled: Vec<(f64, bool)> = a
            .iter()
            .map(|x| (*x, true))
            .chain(b.iter().map(|x| (*x, false)))
            .collect();
        pooled.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut rank_sum_a = 0.0;
        let mut ties = 0.0;
        let mut i = 0;
        while i < pooled.len() {
            let mut j = i + 1;
            while j < pooled.len() && pooled[j].0 == pooled[i].0 {
                j += 1;
            }
            let rank = (i + 1 + j) as f64 / 2.0;
            let from_a = pooled[i..j].iter().filter(|(_, in_a)| *in_a).count();
            rank_sum_a += rank * from_a as f64;
            let t = (j - i) as f64;
            ties += t * t * t - t;
            i = j;
        }

        let (n1f, n2f) = (n1 as f64, n2 as f64);
        let n = n1f + n2f;
        let u = rank_sum_a - n1f * (n1f + 1.0) / 2.0;
        let mu = n1f * n2f / 2.0;
        let var = n1f * n2f / 12.0 * ((n + 1.0) - ties / (n * (n - 1.0)));
        let p_value = if var > 0.0 {
            let z = ((u - mu).abs() - 0.5).max(0.0) / var.sqrt();
            (2.0 * (1.0 - self.standard_normal.cdf(z))).clamp(0.0, 1.0)
        } else {
            1.0
        };
        TestStatistic {
            statistic: u,
            p_value,
        }
    }
}

fn pooled_t(a: &[f64], b: &[f64]) -> Result<TestStatistic> {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (m1, v1) = mean_sample_var(a);
    let (m2, v2) = mean_sample_var(b);
    let dof = n1 + n2 - 2.0;
    let pooled = ((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / dof;
    let se = (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
    let diff = m1 - m2;
    if se <= 0.0 {
        // Both samples are constant.
        return Ok(if diff == 0.0 {
            TestStatistic {
                statistic: 0.0,
                p_value: 1.0,
            }
        } else {
            TestStatistic {
                statistic: diff.signum() * f64::INFINITY,
                p_value: 0.0,
            }
        });
    }
    let t = diff / se;
    let dist = StudentsT::new(0.0, 1.0, dof).map_err(|_| EngineError::NumericDegeneracy {
        what: "student t degrees of freedom",
    })?;
    Ok(TestStatistic {
        statistic: t,
        p_value: (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
    })
}

fn mean_sample_var(v: &[f64]) -> (f64, f64) {
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    let ss: f64 = v.iter().map(|x| (x - mean) * (x - mean)).sum();
    (mean, ss / (n - 1.0))
}

fn kolmogorov_smirnov(a: &[f64], b: &[f64]) -> TestStatistic {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (n1, n2) = (a.len() as f64, b.len() as f64);

    let (mut i, mut j, mut d) = (0, 0, 0.0_f64);
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let en = (n1 * n2 / (n1 + n2)).sqrt();
    TestStatistic {
        statistic: d,
        p_value: kolmogorov_tail((en + 0.12 + 0.11 / en) * d),
    }
}

/// `Q_KS(λ) = 2 Σ_{j≥1} (−1)^{j−1} e^{−2j²λ²}`.
fn kolmogorov_tail(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let a = -2.0 * lambda * lambda;
    let mut sum = 0.0;
    let mut sign = 2.0;
    for j in 1..=KS_TERMS {
        let jf = j as f64;
        let term = sign * (a * jf * jf).exp();
        sum += term;
        if term.abs() <= 1e-12 * sum.abs() {
            break;
        }
        sign = -sign;
    }
    sum.clamp(0.0, 1.0)
}
