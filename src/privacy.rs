// 🔐 Differential Privacy Engine - calibrated noise under a bounded budget
// Laplace mechanism for pure ε-DP, Gaussian for (ε,δ)-DP, with an
// append-only audit trail of every spend.

use crate::dataset::{Column, Dataset};
use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// MECHANISM & POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMechanism {
    /// Pure ε-DP: scale = Δf / ε.
    Laplace,
    /// (ε,δ)-DP: σ = Δf · √(2·ln(1.25/δ)) / ε.
    Gaussian,
}

/// What happens when a noise request would push spend past the nominal
/// budget. Lenient (the default) warns and proceeds; Enforce refuses
/// before spending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    Lenient,
    Enforce,
}

// ============================================================================
// REPORTS
// ============================================================================

/// One entry of the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct NoiseOperation {
    pub timestamp: String,
    pub column: String,
    pub epsilon_used: f64,
    pub sensitivity: f64,
    pub noise_scale: f64,
    pub mechanism: NoiseMechanism,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivacyGuarantee {
    pub epsilon: f64,
    pub delta: f64,
    pub mechanism: NoiseMechanism,
    pub interpretation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetTracking {
    pub total_budget: f64,
    pub budget_used: f64,
    pub budget_remaining: f64,
    pub utilization_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivacyReport {
    pub report_id: Uuid,
    pub privacy_guarantee: PrivacyGuarantee,
    pub budget_tracking: BudgetTracking,
    pub operations: Vec<NoiseOperation>,
    pub timestamp: String,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Injects calibrated random noise into numeric columns and accounts for
/// the cumulative privacy spend. Budget accounting is per engine
/// instance; composing budgets across instances is the caller's job.
pub struct DifferentialPrivacyEngine {
    epsilon: f64,
    delta: f64,
    mechanism: NoiseMechanism,
    policy: BudgetPolicy,
    budget_used: f64,
    operations: Vec<NoiseOperation>,
    rng: StdRng,
}

impl DifferentialPrivacyEngine {
    /// Create an engine. Epsilon must be positive and delta in [0, 1);
    /// the Gaussian mechanism additionally needs delta > 0 for its
    /// calibration to be defined.
    pub fn new(epsilon: f64, delta: f64, mechanism: NoiseMechanism) -> Result<Self> {
        if epsilon <= 0.0 {
            bail!("Epsilon must be positive, got {}", epsilon);
        }
        if !(0.0..1.0).contains(&delta) {
            bail!("Delta must be in [0, 1), got {}", delta);
        }
        if mechanism == NoiseMechanism::Gaussian && delta == 0.0 {
            bail!("Gaussian mechanism requires delta > 0");
        }

        info!(epsilon, delta, ?mechanism, "Initialized differential privacy engine");
        Ok(DifferentialPrivacyEngine {
            epsilon,
            delta,
            mechanism,
            policy: BudgetPolicy::Lenient,
            budget_used: 0.0,
            operations: Vec::new(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Deterministic RNG for reproducible noise.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_policy(mut self, policy: BudgetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn mechanism(&self) -> NoiseMechanism {
        self.mechanism
    }

    pub fn budget_used(&self) -> f64 {
        self.budget_used
    }

    pub fn operations(&self) -> &[NoiseOperation] {
        &self.operations
    }

    // ========================================================================
    // NOISE CALIBRATION
    // ========================================================================

    /// Noise scale for a query of the given sensitivity. The closed-form
    /// calibrations from the DP literature, reproduced exactly:
    /// Laplace b = Δf/ε; Gaussian σ = Δf·√(2·ln(1.25/δ))/ε.
    /// `epsilon`/`delta` override the engine defaults when given.
    pub fn calibrate_noise_scale(
        &self,
        sensitivity: f64,
        epsilon: Option<f64>,
        delta: Option<f64>,
    ) -> f64 {
        let eps = epsilon.unwrap_or(self.epsilon);
        let dlt = delta.unwrap_or(self.delta);

        let scale = match self.mechanism {
            NoiseMechanism::Laplace => sensitivity / eps,
            NoiseMechanism::Gaussian => sensitivity * (2.0 * (1.25 / dlt).ln()).sqrt() / eps,
        };
        debug!(
            mechanism = ?self.mechanism,
            sensitivity,
            epsilon = eps,
            scale,
            "Calibrated noise scale"
        );
        scale
    }

    // ========================================================================
    // NOISE INJECTION
    // ========================================================================

    /// Add calibrated noise to a single column, spending
    /// `epsilon · epsilon_fraction` of the budget.
    ///
    /// Without an explicit sensitivity the observed range `max − min` is
    /// used — an approximation that assumes one record can move the value
    /// across the whole observed span, not a per-record bound. Callers
    /// with a domain-derived bound should pass it.
    pub fn add_noise_to_column(
        &mut self,
        column_name: &str,
        data: &[f64],
        sensitivity: Option<f64>,
        epsilon_fraction: f64,
    ) -> Result<Vec<f64>> {
        if data.is_empty() {
            warn!(column = column_name, "Empty column, no noise added");
            return Ok(Vec::new());
        }

        let sensitivity = match sensitivity {
            Some(s) => s,
            None => {
                let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
                let range = max - min;
                debug!(column = column_name, min, max, "Auto-calculated sensitivity");
                range
            }
        };

        let effective_epsilon = self.epsilon * epsilon_fraction;

        if self.policy == BudgetPolicy::Enforce
            && self.budget_used + effective_epsilon > self.epsilon
        {
            bail!(
                "Privacy budget exhausted: {:.4} used of {:.4}, refusing to spend {:.4}",
                self.budget_used,
                self.epsilon,
                effective_epsilon
            );
        }

        let noise_scale = self.calibrate_noise_scale(sensitivity, Some(effective_epsilon), None);

        let noisy = match self.mechanism {
            NoiseMechanism::Gaussian => {
                let normal = Normal::new(0.0, noise_scale)
                    .map_err(|e| anyhow!("Invalid Gaussian noise scale {}: {}", noise_scale, e))?;
                data.iter()
                    .map(|v| v + normal.sample(&mut self.rng))
                    .collect()
            }
            NoiseMechanism::Laplace => data
                .iter()
                .map(|v| {
                    // Inverse CDF: -b · sgn(u) · ln(1 - 2|u|), u ~ U(-0.5, 0.5)
                    let u: f64 = self.rng.gen::<f64>() - 0.5;
                    v - noise_scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
                })
                .collect(),
        };

        self.operations.push(NoiseOperation {
            timestamp: Utc::now().to_rfc3339(),
            column: column_name.to_string(),
            epsilon_used: effective_epsilon,
            sensitivity,
            noise_scale,
            mechanism: self.mechanism,
        });
        self.budget_used += effective_epsilon;

        if self.budget_used > self.epsilon {
            warn!(
                budget_used = self.budget_used,
                epsilon = self.epsilon,
                "Privacy budget exceeded, output guarantees are weaker than nominal"
            );
        }

        info!(
            column = column_name,
            epsilon_used = effective_epsilon,
            budget_used = self.budget_used,
            "Added {:?} noise",
            self.mechanism
        );

        Ok(noisy)
    }

    /// Add noise to every numeric column of a dataset; non-numeric
    /// columns pass through unchanged. With `auto_allocate` the total
    /// epsilon is split evenly across the numeric columns (uniform
    /// composition — not sensitivity-weighted).
    pub fn add_noise_to_dataframe(
        &mut self,
        df: &Dataset,
        column_sensitivities: Option<&HashMap<String, f64>>,
        auto_allocate: bool,
    ) -> Result<Dataset> {
        let numeric: Vec<String> = df
            .numeric_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        if numeric.is_empty() {
            warn!("No numeric columns found, returning dataset unchanged");
            return Ok(df.clone());
        }

        let fraction = if auto_allocate {
            1.0 / numeric.len() as f64
        } else {
            1.0
        };
        info!(
            columns = numeric.len(),
            epsilon = self.epsilon,
            fraction,
            "Adding noise to numeric columns"
        );

        let mut result = df.clone();
        for name in &numeric {
            let Some(data) = df.column(name).and_then(|c| c.as_numeric()) else {
                continue;
            };
            let sensitivity = column_sensitivities.and_then(|m| m.get(name)).copied();
            let noisy = self.add_noise_to_column(name, data, sensitivity, fraction)?;
            result.replace_column(name, Column::Numeric(noisy))?;
        }

        Ok(result)
    }

    // ========================================================================
    // BUDGET TRACKING & REPORTING
    // ========================================================================

    /// Budget left before the nominal epsilon is exhausted (never
    /// negative; overruns show up in the report's utilization instead).
    pub fn get_budget_remaining(&self) -> f64 {
        (self.epsilon - self.budget_used).max(0.0)
    }

    /// Clear the spend counter and the audit trail. Explicit and logged:
    /// resetting a budget means the nominal guarantee starts over.
    pub fn reset_budget(&mut self) {
        warn!(
            previous_budget_used = self.budget_used,
            "Resetting privacy budget"
        );
        self.budget_used = 0.0;
        self.operations.clear();
    }

    /// Full privacy accounting: the (ε,δ) guarantee, budget utilization,
    /// and the complete operation log.
    pub fn get_privacy_report(&self) -> PrivacyReport {
        PrivacyReport {
            report_id: Uuid::new_v4(),
            privacy_guarantee: PrivacyGuarantee {
                epsilon: self.epsilon,
                delta: self.delta,
                mechanism: self.mechanism,
                interpretation: self.interpret_epsilon().to_string(),
            },
            budget_tracking: BudgetTracking {
                total_budget: self.epsilon,
                budget_used: self.budget_used,
                budget_remaining: self.get_budget_remaining(),
                utilization_percent: self.budget_used / self.epsilon * 100.0,
            },
            operations: self.operations.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Write the privacy report to disk as JSON (temp file + rename).
    pub fn export_report<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let report = self.get_privacy_report();
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize privacy report")?;

        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write report: {:?}", tmp))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move report into place: {:?}", path))?;

        info!(path = ?path, "Privacy report exported");
        Ok(())
    }

    /// Human-readable privacy-strength tier for the configured epsilon.
    fn interpret_epsilon(&self) -> &'static str {
        if self.epsilon < 0.5 {
            "Very Strong Privacy - High noise, significant utility loss expected"
        } else if self.epsilon < 1.5 {
            "Strong Privacy - Balanced noise and utility (RECOMMENDED)"
        } else if self.epsilon < 5.0 {
            "Moderate Privacy - Lower noise, better utility"
        } else {
            "Weak Privacy - Minimal noise, privacy guarantees may be insufficient"
        }
    }
}

impl Default for DifferentialPrivacyEngine {
    /// Balanced defaults: ε=1.0, δ=1e-5, Gaussian mechanism, lenient
    /// budget policy.
    fn default() -> Self {
        DifferentialPrivacyEngine {
            epsilon: 1.0,
            delta: 1e-5,
            mechanism: NoiseMechanism::Gaussian,
            policy: BudgetPolicy::Lenient,
            budget_used: 0.0,
            operations: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn laplace_engine() -> DifferentialPrivacyEngine {
        DifferentialPrivacyEngine::new(1.0, 1e-5, NoiseMechanism::Laplace)
            .unwrap()
            .with_seed(42)
    }

    fn gaussian_engine() -> DifferentialPrivacyEngine {
        DifferentialPrivacyEngine::new(1.0, 1e-5, NoiseMechanism::Gaussian)
            .unwrap()
            .with_seed(42)
    }

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_column("Age", Column::Numeric(vec![25.0, 30.0, 45.0, 60.0, 75.0]))
            .unwrap();
        ds.add_column(
            "Glucose",
            Column::Numeric(vec![85.0, 90.0, 120.0, 140.0, 160.0]),
        )
        .unwrap();
        ds.add_column(
            "Gender",
            Column::Categorical(
                ["M", "F", "M", "F", "M"].iter().map(|s| s.to_string()).collect(),
            ),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_constructor_rejects_bad_parameters() {
        assert!(DifferentialPrivacyEngine::new(0.0, 1e-5, NoiseMechanism::Laplace).is_err());
        assert!(DifferentialPrivacyEngine::new(-1.0, 1e-5, NoiseMechanism::Laplace).is_err());
        assert!(DifferentialPrivacyEngine::new(1.0, 1.0, NoiseMechanism::Gaussian).is_err());
        assert!(DifferentialPrivacyEngine::new(1.0, -0.1, NoiseMechanism::Gaussian).is_err());
        assert!(DifferentialPrivacyEngine::new(1.0, 0.0, NoiseMechanism::Gaussian).is_err());
        // Laplace ignores delta, so zero is fine there
        assert!(DifferentialPrivacyEngine::new(1.0, 0.0, NoiseMechanism::Laplace).is_ok());
    }

    #[test]
    fn test_laplace_calibration_formula() {
        let engine = laplace_engine();
        let scale = engine.calibrate_noise_scale(1.0, None, None);
        assert_eq!(scale, 1.0);

        // b = Δf/ε
        let scale = engine.calibrate_noise_scale(120.0, Some(0.5), None);
        assert_eq!(scale, 240.0);
    }

    #[test]
    fn test_gaussian_calibration_formula() {
        let engine = gaussian_engine();
        let scale = engine.calibrate_noise_scale(1.0, None, None);
        let expected = (2.0 * (1.25f64 / 1e-5).ln()).sqrt();
        assert!((scale - expected).abs() < 1e-12);
    }

    #[test]
    fn test_add_noise_preserves_length_and_perturbs() {
        let mut engine = gaussian_engine();
        let data = vec![25.0, 30.0, 45.0, 60.0, 75.0];
        let noisy = engine
            .add_noise_to_column("Age", &data, None, 1.0)
            .unwrap();

        assert_eq!(noisy.len(), data.len());
        assert!(noisy.iter().zip(data.iter()).any(|(a, b)| (a - b).abs() > 1e-12));
    }

    #[test]
    fn test_seeded_noise_is_deterministic() {
        let data = vec![25.0, 30.0, 45.0];
        let first = laplace_engine()
            .add_noise_to_column("Age", &data, None, 1.0)
            .unwrap();
        let second = laplace_engine()
            .add_noise_to_column("Age", &data, None, 1.0)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_budget_monotonicity_and_audit_trail() {
        let mut engine = laplace_engine();
        let data = vec![1.0, 2.0, 3.0];

        let mut previous = 0.0;
        for _ in 0..4 {
            engine
                .add_noise_to_column("Value", &data, Some(1.0), 0.2)
                .unwrap();
            assert!(engine.budget_used() >= previous);
            previous = engine.budget_used();
        }

        let logged: f64 = engine.operations().iter().map(|op| op.epsilon_used).sum();
        assert!((engine.budget_used() - logged).abs() < 1e-12);
        assert_eq!(engine.operations().len(), 4);
    }

    #[test]
    fn test_dataframe_uniform_allocation() {
        let mut engine = laplace_engine();
        let noisy = engine
            .add_noise_to_dataframe(&sample_dataset(), None, true)
            .unwrap();

        // Two numeric columns, each spending epsilon/2
        assert_eq!(engine.operations().len(), 2);
        for op in engine.operations() {
            assert!((op.epsilon_used - 0.5).abs() < 1e-12);
        }
        assert!((engine.budget_used() - 1.0).abs() < 1e-12);

        // Categorical columns pass through untouched
        assert_eq!(
            noisy.column("Gender").unwrap().as_categorical().unwrap(),
            sample_dataset().column("Gender").unwrap().as_categorical().unwrap()
        );
    }

    #[test]
    fn test_dataframe_without_numeric_columns_is_noop() {
        let mut ds = Dataset::new();
        ds.add_column(
            "Gender",
            Column::Categorical(vec!["M".into(), "F".into()]),
        )
        .unwrap();

        let mut engine = laplace_engine();
        let noisy = engine.add_noise_to_dataframe(&ds, None, true).unwrap();

        assert_eq!(engine.operations().len(), 0);
        assert_eq!(engine.budget_used(), 0.0);
        assert_eq!(
            noisy.column("Gender").unwrap().as_categorical().unwrap(),
            ds.column("Gender").unwrap().as_categorical().unwrap()
        );
    }

    #[test]
    fn test_lenient_policy_allows_overrun() {
        let mut engine = laplace_engine();
        let data = vec![1.0, 2.0, 3.0];

        for _ in 0..3 {
            engine
                .add_noise_to_column("Value", &data, Some(1.0), 0.5)
                .unwrap();
        }
        assert!(engine.budget_used() > engine.epsilon());
        assert_eq!(engine.get_budget_remaining(), 0.0);
    }

    #[test]
    fn test_enforce_policy_refuses_overrun() {
        let mut engine = laplace_engine().with_policy(BudgetPolicy::Enforce);
        let data = vec![1.0, 2.0, 3.0];

        engine
            .add_noise_to_column("Value", &data, Some(1.0), 0.8)
            .unwrap();
        let result = engine.add_noise_to_column("Value", &data, Some(1.0), 0.8);

        assert!(result.is_err());
        // The refused request spent nothing
        assert!((engine.budget_used() - 0.8).abs() < 1e-12);
        assert_eq!(engine.operations().len(), 1);
    }

    #[test]
    fn test_privacy_report_contents() {
        let mut engine = gaussian_engine();
        engine
            .add_noise_to_column("Age", &[25.0, 30.0, 45.0], None, 0.5)
            .unwrap();

        let report = engine.get_privacy_report();
        assert_eq!(report.privacy_guarantee.epsilon, 1.0);
        assert_eq!(report.privacy_guarantee.mechanism, NoiseMechanism::Gaussian);
        assert!(report
            .privacy_guarantee
            .interpretation
            .starts_with("Strong Privacy"));
        assert!((report.budget_tracking.utilization_percent - 50.0).abs() < 1e-9);
        assert_eq!(report.operations.len(), 1);
    }

    #[test]
    fn test_interpretation_tiers() {
        let tier = |eps: f64| {
            DifferentialPrivacyEngine::new(eps, 1e-5, NoiseMechanism::Laplace)
                .unwrap()
                .interpret_epsilon()
                .to_string()
        };
        assert!(tier(0.1).starts_with("Very Strong"));
        assert!(tier(1.0).starts_with("Strong"));
        assert!(tier(3.0).starts_with("Moderate"));
        assert!(tier(10.0).starts_with("Weak"));
    }

    #[test]
    fn test_reset_budget_clears_state() {
        let mut engine = laplace_engine();
        engine
            .add_noise_to_column("Age", &[1.0, 2.0], Some(1.0), 1.0)
            .unwrap();
        assert!(engine.budget_used() > 0.0);

        engine.reset_budget();
        assert_eq!(engine.budget_used(), 0.0);
        assert!(engine.operations().is_empty());
        assert_eq!(engine.get_budget_remaining(), 1.0);
    }

    #[test]
    fn test_export_report_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privacy_report.json");

        let mut engine = laplace_engine();
        engine
            .add_noise_to_column("Age", &[1.0, 2.0], Some(1.0), 0.5)
            .unwrap();
        engine.export_report(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["budget_tracking"]["budget_used"], 0.5);
        assert_eq!(parsed["privacy_guarantee"]["mechanism"], "laplace");
    }
}
