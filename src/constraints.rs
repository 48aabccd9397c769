// 🧱 Validity Constraints - declarative rules over single columns
// Three kinds: range clipping, categorical membership, statistical rescaling

use crate::dataset::Column;
use crate::stats;
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

// ============================================================================
// SHARED ENUMS
// ============================================================================

/// Target numeric type for a range constraint. `Int` rounds after clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericDtype {
    Int,
    Float,
}

/// How a categorical constraint repairs values outside the allowed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementStrategy {
    /// Most frequent valid value already present in the column.
    Mode,
    /// Independent uniform draw from the allowed set per invalid cell.
    Random,
    /// Nearest valid value on the ordered scale. An out-of-vocabulary
    /// label has no rank, so this falls back to mode (logged).
    Nearest,
}

// ============================================================================
// RANGE CONSTRAINT
// ============================================================================

/// Constrains a numeric column to [min, max]. Enforcement clips rather
/// than rejects: generator noise is expected and rejection sampling is
/// expensive for wide tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConstraint {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub dtype: Option<NumericDtype>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeValidation {
    pub valid: bool,
    pub violations: usize,
    pub below_min: usize,
    pub above_max: usize,
    pub violation_percentage: f64,
    pub min_value: f64,
    pub max_value: f64,
}

impl RangeConstraint {
    pub fn new(column: &str, min: f64, max: f64) -> Result<Self> {
        if min >= max {
            bail!("min ({}) must be < max ({}) for '{}'", min, max, column);
        }
        Ok(RangeConstraint {
            column: column.to_string(),
            min,
            max,
            dtype: None,
            unit: None,
        })
    }

    pub fn with_dtype(mut self, dtype: NumericDtype) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Count values outside [min, max].
    pub fn validate(&self, data: &[f64]) -> RangeValidation {
        let below_min = data.iter().filter(|v| **v < self.min).count();
        let above_max = data.iter().filter(|v| **v > self.max).count();
        let violations = below_min + above_max;
        let violation_percentage = if data.is_empty() {
            0.0
        } else {
            violations as f64 / data.len() as f64 * 100.0
        };

        RangeValidation {
            valid: violations == 0,
            violations,
            below_min,
            above_max,
            violation_percentage,
            min_value: self.min,
            max_value: self.max,
        }
    }

    /// Clip values into range, rounding afterwards for integer columns.
    pub fn apply(&self, data: &[f64]) -> Vec<f64> {
        let report = self.validate(data);
        if report.violations > 0 {
            info!(
                column = %self.column,
                clipped = report.violations,
                below_min = report.below_min,
                above_max = report.above_max,
                "Clipped {} values ({:.1}%) outside [{}, {}]",
                report.violations,
                report.violation_percentage,
                self.min,
                self.max
            );
        }

        data.iter()
            .map(|v| {
                let clipped = v.clamp(self.min, self.max);
                match self.dtype {
                    Some(NumericDtype::Int) => clipped.round(),
                    _ => clipped,
                }
            })
            .collect()
    }
}

// ============================================================================
// CATEGORICAL CONSTRAINT
// ============================================================================

/// Constrains a categorical column to a fixed set of allowed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalConstraint {
    pub column: String,
    pub allowed_values: Vec<String>,
    pub ordered: bool,
    pub replacement_strategy: ReplacementStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoricalValidation {
    pub valid: bool,
    pub violations: usize,
    pub violation_percentage: f64,
    /// First 10 distinct offending values, for display.
    pub invalid_values: Vec<String>,
    pub allowed_values: Vec<String>,
}

impl CategoricalConstraint {
    pub fn new<I, S>(column: &str, allowed_values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed_values: Vec<String> = allowed_values.into_iter().map(Into::into).collect();
        if allowed_values.is_empty() {
            bail!("allowed_values cannot be empty for '{}'", column);
        }
        Ok(CategoricalConstraint {
            column: column.to_string(),
            allowed_values,
            ordered: false,
            replacement_strategy: ReplacementStrategy::Random,
        })
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_strategy(mut self, strategy: ReplacementStrategy) -> Self {
        self.replacement_strategy = strategy;
        self
    }

    pub fn validate(&self, data: &[String]) -> CategoricalValidation {
        let allowed: HashSet<&String> = self.allowed_values.iter().collect();

        let mut violations = 0;
        let mut invalid_values = Vec::new();
        let mut seen_invalid: HashSet<&String> = HashSet::new();
        for value in data {
            if !allowed.contains(value) {
                violations += 1;
                if seen_invalid.insert(value) && invalid_values.len() < 10 {
                    invalid_values.push(value.clone());
                }
            }
        }

        let violation_percentage = if data.is_empty() {
            0.0
        } else {
            violations as f64 / data.len() as f64 * 100.0
        };

        CategoricalValidation {
            valid: violations == 0,
            violations,
            violation_percentage,
            invalid_values,
            allowed_values: self.allowed_values.clone(),
        }
    }

    /// Replace every out-of-set value per the configured strategy.
    /// Values already valid pass through untouched.
    pub fn apply(&self, data: &[String], rng: &mut StdRng) -> Vec<String> {
        let allowed: HashSet<&String> = self.allowed_values.iter().collect();
        let report = self.validate(data);
        if report.violations == 0 {
            return data.to_vec();
        }

        let strategy = match self.replacement_strategy {
            ReplacementStrategy::Nearest => {
                warn!(
                    column = %self.column,
                    "'nearest' replacement has no rank for unseen labels, using mode"
                );
                ReplacementStrategy::Mode
            }
            other => other,
        };

        let mode_value = self.mode_of_valid(data, &allowed);

        let result: Vec<String> = data
            .iter()
            .map(|value| {
                if allowed.contains(value) {
                    value.clone()
                } else {
                    match strategy {
                        ReplacementStrategy::Random => {
                            let idx = rng.gen_range(0..self.allowed_values.len());
                            self.allowed_values[idx].clone()
                        }
                        _ => mode_value.clone(),
                    }
                }
            })
            .collect();

        info!(
            column = %self.column,
            replaced = report.violations,
            strategy = ?self.replacement_strategy,
            "Replaced {} invalid values ({:.1}%)",
            report.violations,
            report.violation_percentage
        );

        result
    }

    /// Most frequent valid value in the column; ties break to the
    /// lexicographically smallest; falls back to the first allowed value
    /// when the column holds no valid values at all.
    fn mode_of_valid(&self, data: &[String], allowed: &HashSet<&String>) -> String {
        let mut counts: HashMap<&String, usize> = HashMap::new();
        for value in data {
            if allowed.contains(value) {
                *counts.entry(value).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by(|(a_val, a_count), (b_val, b_count)| {
                a_count.cmp(b_count).then(b_val.cmp(a_val))
            })
            .map(|(value, _)| value.clone())
            .unwrap_or_else(|| self.allowed_values[0].clone())
    }
}

// ============================================================================
// STATISTICAL CONSTRAINT
// ============================================================================

/// Constrains a numeric column's distribution to a target mean and
/// standard deviation rather than hard bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalConstraint {
    pub column: String,
    pub target_mean: f64,
    pub target_std: f64,
    /// Acceptable relative deviation, as a fraction in (0, 1].
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticalValidation {
    pub valid: bool,
    pub actual_mean: f64,
    pub target_mean: f64,
    pub mean_error_pct: f64,
    pub mean_valid: bool,
    pub actual_std: f64,
    pub target_std: f64,
    pub std_error_pct: f64,
    pub std_valid: bool,
    pub tolerance_pct: f64,
}

impl StatisticalConstraint {
    pub fn new(column: &str, target_mean: f64, target_std: f64, tolerance: f64) -> Result<Self> {
        if target_std <= 0.0 {
            bail!("target_std must be positive for '{}'", column);
        }
        if !(tolerance > 0.0 && tolerance <= 1.0) {
            bail!("tolerance must be in (0, 1] for '{}'", column);
        }
        Ok(StatisticalConstraint {
            column: column.to_string(),
            target_mean,
            target_std,
            tolerance,
        })
    }

    pub fn validate(&self, data: &[f64]) -> StatisticalValidation {
        let actual_mean = stats::mean(data);
        let actual_std = stats::std_sample(data);

        let mean_error = (actual_mean - self.target_mean).abs() / self.target_mean.abs();
        let std_error = (actual_std - self.target_std).abs() / self.target_std.abs();

        let mean_valid = mean_error <= self.tolerance;
        let std_valid = std_error <= self.tolerance;

        StatisticalValidation {
            valid: mean_valid && std_valid,
            actual_mean,
            target_mean: self.target_mean,
            mean_error_pct: mean_error * 100.0,
            mean_valid,
            actual_std,
            target_std: self.target_std,
            std_error_pct: std_error * 100.0,
            std_valid,
            tolerance_pct: self.tolerance * 100.0,
        }
    }

    /// Standardize to zero-mean/unit-variance, then rescale onto the
    /// target distribution. A constant column cannot be rescaled and is
    /// returned unchanged (logged, not silent).
    pub fn apply(&self, data: &[f64]) -> Vec<f64> {
        let current_mean = stats::mean(data);
        let current_std = stats::std_sample(data);

        if current_std == 0.0 {
            warn!(
                column = %self.column,
                "All values identical, cannot rescale to target distribution"
            );
            return data.to_vec();
        }

        info!(
            column = %self.column,
            "Rescaled distribution: mean {:.2} -> {:.2}, std {:.2} -> {:.2}",
            current_mean,
            self.target_mean,
            current_std,
            self.target_std
        );

        data.iter()
            .map(|v| (v - current_mean) / current_std * self.target_std + self.target_mean)
            .collect()
    }
}

// ============================================================================
// TAGGED UNION
// ============================================================================

/// Any of the three constraint kinds, with uniform dispatch. Constraints
/// are immutable once constructed: to change one, replace it.
#[derive(Debug, Clone)]
pub enum Constraint {
    Range(RangeConstraint),
    Categorical(CategoricalConstraint),
    Statistical(StatisticalConstraint),
}

/// Validation outcome for a single constraint, serialized as the plain
/// report of whichever kind ran.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ConstraintValidation {
    Range(RangeValidation),
    Categorical(CategoricalValidation),
    Statistical(StatisticalValidation),
}

impl ConstraintValidation {
    pub fn is_valid(&self) -> bool {
        match self {
            ConstraintValidation::Range(v) => v.valid,
            ConstraintValidation::Categorical(v) => v.valid,
            ConstraintValidation::Statistical(v) => v.valid,
        }
    }
}

impl Constraint {
    pub fn column(&self) -> &str {
        match self {
            Constraint::Range(c) => &c.column,
            Constraint::Categorical(c) => &c.column,
            Constraint::Statistical(c) => &c.column,
        }
    }

    /// Template/report tag for this constraint kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::Range(_) => "range",
            Constraint::Categorical(_) => "categorical",
            Constraint::Statistical(_) => "statistical",
        }
    }

    /// Check the column against this constraint without modifying it.
    /// `None` means the column's type does not match the constraint
    /// (template/dataset mismatch) — logged, never fatal.
    pub fn validate(&self, column: &Column) -> Option<ConstraintValidation> {
        match (self, column) {
            (Constraint::Range(c), Column::Numeric(data)) => {
                Some(ConstraintValidation::Range(c.validate(data)))
            }
            (Constraint::Categorical(c), Column::Categorical(data)) => {
                Some(ConstraintValidation::Categorical(c.validate(data)))
            }
            (Constraint::Statistical(c), Column::Numeric(data)) => {
                Some(ConstraintValidation::Statistical(c.validate(data)))
            }
            _ => {
                warn!(
                    column = self.column(),
                    kind = self.kind(),
                    "Column type does not match constraint, skipping"
                );
                None
            }
        }
    }

    /// Enforce this constraint, producing a new column. `None` means the
    /// column's type does not match (logged, skipped).
    pub fn apply(&self, column: &Column, rng: &mut StdRng) -> Option<Column> {
        match (self, column) {
            (Constraint::Range(c), Column::Numeric(data)) => {
                Some(Column::Numeric(c.apply(data)))
            }
            (Constraint::Categorical(c), Column::Categorical(data)) => {
                Some(Column::Categorical(c.apply(data, rng)))
            }
            (Constraint::Statistical(c), Column::Numeric(data)) => {
                Some(Column::Numeric(c.apply(data)))
            }
            _ => {
                warn!(
                    column = self.column(),
                    kind = self.kind(),
                    "Column type does not match constraint, skipping"
                );
                None
            }
        }
    }

    /// Constraint parameters as a JSON object (the `params` payload of
    /// templates and compliance reports — the column lives outside it).
    pub fn params_value(&self) -> Value {
        match self {
            Constraint::Range(c) => serde_json::json!({
                "min": c.min,
                "max": c.max,
                "dtype": c.dtype,
                "unit": c.unit,
            }),
            Constraint::Categorical(c) => serde_json::json!({
                "allowed_values": c.allowed_values,
                "ordered": c.ordered,
                "replacement_strategy": c.replacement_strategy,
            }),
            Constraint::Statistical(c) => serde_json::json!({
                "target_mean": c.target_mean,
                "target_std": c.target_std,
                "tolerance": c.tolerance,
            }),
        }
    }

    /// Rebuild a constraint from a template entry. `Ok(None)` marks an
    /// unknown kind (skipped by the loader for forward compatibility);
    /// malformed params for a known kind are a hard error.
    pub fn from_template_parts(column: &str, kind: &str, params: &Value) -> Result<Option<Self>> {
        match kind {
            "range" => {
                let p: RangeParams = serde_json::from_value(params.clone())?;
                let mut c = RangeConstraint::new(column, p.min, p.max)?;
                c.dtype = p.dtype;
                c.unit = p.unit;
                Ok(Some(Constraint::Range(c)))
            }
            "categorical" => {
                let p: CategoricalParams = serde_json::from_value(params.clone())?;
                let c = CategoricalConstraint::new(column, p.allowed_values)?
                    .with_ordered(p.ordered)
                    .with_strategy(p.replacement_strategy);
                Ok(Some(Constraint::Categorical(c)))
            }
            "statistical" => {
                let p: StatisticalParams = serde_json::from_value(params.clone())?;
                let c =
                    StatisticalConstraint::new(column, p.target_mean, p.target_std, p.tolerance)?;
                Ok(Some(Constraint::Statistical(c)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct RangeParams {
    min: f64,
    max: f64,
    #[serde(default)]
    dtype: Option<NumericDtype>,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Deserialize)]
struct CategoricalParams {
    allowed_values: Vec<String>,
    #[serde(default)]
    ordered: bool,
    #[serde(default = "default_strategy")]
    replacement_strategy: ReplacementStrategy,
}

fn default_strategy() -> ReplacementStrategy {
    ReplacementStrategy::Random
}

#[derive(Deserialize)]
struct StatisticalParams {
    target_mean: f64,
    target_std: f64,
    #[serde(default = "default_tolerance")]
    tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.1
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_range_constructor_rejects_inverted_bounds() {
        assert!(RangeConstraint::new("Age", 120.0, 0.0).is_err());
        assert!(RangeConstraint::new("Age", 50.0, 50.0).is_err());
        assert!(RangeConstraint::new("Age", 0.0, 120.0).is_ok());
    }

    #[test]
    fn test_range_validate_counts_sides() {
        let c = RangeConstraint::new("Age", 0.0, 120.0).unwrap();
        let report = c.validate(&[25.0, 30.0, -5.0, 150.0, 45.0]);

        assert!(!report.valid);
        assert_eq!(report.violations, 2);
        assert_eq!(report.below_min, 1);
        assert_eq!(report.above_max, 1);
        assert!((report.violation_percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_apply_clamps_elementwise() {
        let c = RangeConstraint::new("Age", 0.0, 120.0).unwrap();
        let applied = c.apply(&[25.0, -5.0, 150.0]);

        assert_eq!(applied, vec![25.0, 0.0, 120.0]);
        assert!(applied.iter().all(|v| (0.0..=120.0).contains(v)));
    }

    #[test]
    fn test_range_apply_int_dtype_rounds() {
        let c = RangeConstraint::new("Age", 0.0, 120.0)
            .unwrap()
            .with_dtype(NumericDtype::Int);
        let applied = c.apply(&[25.4, 25.6, -3.2]);
        assert_eq!(applied, vec![25.0, 26.0, 0.0]);
    }

    #[test]
    fn test_range_apply_idempotent_on_compliant_data() {
        let c = RangeConstraint::new("Age", 0.0, 120.0).unwrap();
        let data = vec![25.0, 30.0, 45.0];

        assert!(c.validate(&data).valid);
        let once = c.apply(&data);
        assert_eq!(once, data);
        assert_eq!(c.apply(&once), once);
    }

    #[test]
    fn test_categorical_constructor_rejects_empty_set() {
        let empty: Vec<String> = Vec::new();
        assert!(CategoricalConstraint::new("Gender", empty).is_err());
    }

    #[test]
    fn test_categorical_validate_reports_invalid_values() {
        let c = CategoricalConstraint::new("Gender", ["M", "F"]).unwrap();
        let data: Vec<String> = ["M", "F", "X", "M", "Invalid"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = c.validate(&data);

        assert!(!report.valid);
        assert_eq!(report.violations, 2);
        assert_eq!(report.invalid_values, vec!["X", "Invalid"]);
    }

    #[test]
    fn test_categorical_apply_random_closure() {
        let c = CategoricalConstraint::new("Gender", ["M", "F"])
            .unwrap()
            .with_strategy(ReplacementStrategy::Random);
        let data: Vec<String> = ["M", "X", "F", "Z"].iter().map(|s| s.to_string()).collect();

        let applied = c.apply(&data, &mut rng());

        assert!(applied.iter().all(|v| v == "M" || v == "F"));
        // Valid values pass through untouched
        assert_eq!(applied[0], "M");
        assert_eq!(applied[2], "F");
    }

    #[test]
    fn test_categorical_apply_mode_picks_most_frequent() {
        let c = CategoricalConstraint::new("Gender", ["M", "F"])
            .unwrap()
            .with_strategy(ReplacementStrategy::Mode);
        let data: Vec<String> = ["F", "F", "M", "X"].iter().map(|s| s.to_string()).collect();

        let applied = c.apply(&data, &mut rng());
        assert_eq!(applied[3], "F");
    }

    #[test]
    fn test_categorical_apply_noop_when_valid() {
        let c = CategoricalConstraint::new("Gender", ["M", "F"]).unwrap();
        let data: Vec<String> = ["M", "F"].iter().map(|s| s.to_string()).collect();
        assert_eq!(c.apply(&data, &mut rng()), data);
    }

    #[test]
    fn test_categorical_nearest_falls_back_to_mode() {
        let c = CategoricalConstraint::new("Grade", ["Low", "Medium", "High"])
            .unwrap()
            .with_ordered(true)
            .with_strategy(ReplacementStrategy::Nearest);
        let data: Vec<String> = ["Low", "Low", "High", "???"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let applied = c.apply(&data, &mut rng());
        assert_eq!(applied[3], "Low");
    }

    #[test]
    fn test_statistical_constructor_validates_params() {
        assert!(StatisticalConstraint::new("BMI", 25.0, 0.0, 0.1).is_err());
        assert!(StatisticalConstraint::new("BMI", 25.0, -1.0, 0.1).is_err());
        assert!(StatisticalConstraint::new("BMI", 25.0, 5.0, 0.0).is_err());
        assert!(StatisticalConstraint::new("BMI", 25.0, 5.0, 1.5).is_err());
        assert!(StatisticalConstraint::new("BMI", 25.0, 5.0, 0.1).is_ok());
    }

    #[test]
    fn test_statistical_apply_hits_targets() {
        let c = StatisticalConstraint::new("BMI", 25.0, 5.0, 0.1).unwrap();
        let data = vec![18.0, 22.0, 27.0, 31.0, 35.0, 40.0];

        let applied = c.apply(&data);
        let report = c.validate(&applied);

        assert!((report.actual_mean - 25.0).abs() < 1e-9);
        assert!((report.actual_std - 5.0).abs() < 1e-9);
        assert!(report.valid);
    }

    #[test]
    fn test_statistical_apply_constant_column_noop() {
        let c = StatisticalConstraint::new("BMI", 25.0, 5.0, 0.1).unwrap();
        let data = vec![30.0, 30.0, 30.0];
        assert_eq!(c.apply(&data), data);
    }

    #[test]
    fn test_constraint_dispatch_skips_type_mismatch() {
        let c = Constraint::Range(RangeConstraint::new("Gender", 0.0, 1.0).unwrap());
        let column = Column::Categorical(vec!["M".into(), "F".into()]);

        assert!(c.validate(&column).is_none());
        assert!(c.apply(&column, &mut rng()).is_none());
    }

    #[test]
    fn test_template_parts_round_trip() {
        let original = Constraint::Categorical(
            CategoricalConstraint::new("Gender", ["M", "F"])
                .unwrap()
                .with_strategy(ReplacementStrategy::Mode),
        );

        let rebuilt =
            Constraint::from_template_parts("Gender", original.kind(), &original.params_value())
                .unwrap()
                .unwrap();

        match rebuilt {
            Constraint::Categorical(c) => {
                assert_eq!(c.allowed_values, vec!["M", "F"]);
                assert_eq!(c.replacement_strategy, ReplacementStrategy::Mode);
            }
            _ => panic!("expected categorical constraint"),
        }
    }

    #[test]
    fn test_template_parts_unknown_kind() {
        let result =
            Constraint::from_template_parts("Age", "regex", &serde_json::json!({})).unwrap();
        assert!(result.is_none());
    }
}
