// 📋 Quality & Leakage Auditor - real vs synthetic comparison
// Exact-match leakage, distance to closest record, fairness flip test,
// and distribution-level statistics.

use crate::dataset::Dataset;
use crate::stats;
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

/// Synthetic records closer than this to their nearest real neighbor
/// (in standardized space) count as "too close". Heuristic constant,
/// preserved for behavioral compatibility.
const DCR_THRESHOLD: f64 = 0.5;

/// Scales mean nearest-neighbor distance onto a 0-100 risk score.
/// Heuristic constant, preserved for behavioral compatibility.
const DCR_RISK_SCALE: f64 = 20.0;

/// Relative mean difference between protected groups above which a
/// column is flagged as potentially biased.
const FLIP_BIAS_THRESHOLD_PCT: f64 = 20.0;

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LeakageReport {
    pub total_real_rows: usize,
    pub total_synthetic_rows: usize,
    pub leaked_rows: usize,
    pub leaked_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DcrReport {
    pub min_distance: f64,
    pub mean_distance: f64,
    pub max_distance: f64,
    pub median_distance: f64,
    pub privacy_risk_score: f64,
    pub too_close_percentage: f64,
    pub close_records: usize,
    pub total_records: usize,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub unit: String,
    pub real_mean: f64,
    pub synth_mean: f64,
    pub mean_diff_pct: Option<f64>,
    pub real_std: f64,
    pub synth_std: f64,
    pub std_diff_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlipColumnStats {
    pub group_a_mean: f64,
    pub group_b_mean: f64,
    pub mean_diff: f64,
    pub group_a_std: f64,
    pub group_b_std: f64,
    pub std_diff: f64,
    pub potential_bias: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlipTestReport {
    pub protected_column: String,
    pub group_a_value: String,
    pub group_a_count: usize,
    pub group_b_value: String,
    pub group_b_count: usize,
    pub column_stats: BTreeMap<String, FlipColumnStats>,
    pub total_biased_columns: usize,
    pub fairness_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KsResult {
    pub ks_statistic: f64,
    pub p_value: f64,
    pub similar: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationComparison {
    pub columns: Vec<String>,
    pub real: Vec<Vec<f64>>,
    pub synthetic: Vec<Vec<f64>>,
    pub difference: Vec<Vec<f64>>,
}

// ============================================================================
// AUDITOR
// ============================================================================

/// Compares a synthetic dataset against the real dataset it was modeled
/// on: how much it leaks, how close it sits, and how fairly it treats
/// protected groups.
pub struct QualityAuditor {
    real: Dataset,
    synthetic: Dataset,
    units: HashMap<String, String>,
}

impl QualityAuditor {
    pub fn new(real: Dataset, synthetic: Dataset) -> Self {
        QualityAuditor {
            real,
            synthetic,
            units: default_units(),
        }
    }

    /// Override or extend the unit labels attached to column statistics.
    pub fn with_unit(mut self, column: &str, unit: &str) -> Self {
        self.units.insert(column.to_string(), unit.to_string());
        self
    }

    // ========================================================================
    // EXACT-MATCH LEAKAGE
    // ========================================================================

    /// Count real rows reproduced verbatim in the synthetic data. A row
    /// is its full tuple of values over all columns; leakage is the
    /// exact intersection.
    pub fn check_privacy(&self) -> LeakageReport {
        let real_rows: HashSet<String> =
            (0..self.real.n_rows()).map(|row| self.real.row_key(row)).collect();
        let synth_rows: HashSet<String> = (0..self.synthetic.n_rows())
            .map(|row| self.synthetic.row_key(row))
            .collect();

        let leaked_rows = real_rows.intersection(&synth_rows).count();
        let leaked_percentage = if real_rows.is_empty() {
            0.0
        } else {
            leaked_rows as f64 / real_rows.len() as f64 * 100.0
        };

        info!(leaked_rows, leaked_percentage, "Exact-match leakage check complete");

        LeakageReport {
            total_real_rows: self.real.n_rows(),
            total_synthetic_rows: self.synthetic.n_rows(),
            leaked_rows,
            leaked_percentage,
        }
    }

    // ========================================================================
    // DISTANCE TO CLOSEST RECORD
    // ========================================================================

    /// Euclidean distance from each synthetic row to its nearest real
    /// row, in space standardized with statistics fit on the real data
    /// only. Small distances mean synthetic records shadow real people.
    pub fn distance_to_closest_record(&self) -> Result<DcrReport> {
        let columns: Vec<&str> = self.real.numeric_column_names();
        if columns.is_empty() {
            bail!("No numeric columns available for distance computation");
        }
        for column in &columns {
            if self.synthetic.column(column).and_then(|c| c.as_numeric()).is_none() {
                bail!("Synthetic dataset missing numeric column '{}'", column);
            }
        }
        if self.real.is_empty() || self.synthetic.is_empty() {
            bail!("Both datasets must be non-empty for distance computation");
        }

        // Standardization parameters from the real data only; a constant
        // column scales by 1 so it contributes offset, not NaN.
        let mut scalers = Vec::with_capacity(columns.len());
        for column in &columns {
            let data = self
                .real
                .column(column)
                .and_then(|c| c.as_numeric())
                .unwrap_or(&[]);
            let mean = stats::mean(data);
            let std = stats::std_population(data);
            scalers.push((mean, if std == 0.0 { 1.0 } else { std }));
        }

        let standardize = |ds: &Dataset, row: usize| -> Vec<f64> {
            columns
                .iter()
                .zip(scalers.iter())
                .filter_map(|(column, (mean, std))| {
                    ds.column(column)
                        .and_then(|c| c.as_numeric())
                        .map(|data| (data[row] - mean) / std)
                })
                .collect()
        };

        let real_points: Vec<Vec<f64>> =
            (0..self.real.n_rows()).map(|row| standardize(&self.real, row)).collect();

        let mut distances = Vec::with_capacity(self.synthetic.n_rows());
        for row in 0..self.synthetic.n_rows() {
            let point = standardize(&self.synthetic, row);
            let nearest = real_points
                .iter()
                .map(|real_point| {
                    point
                        .iter()
                        .zip(real_point.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>()
                        .sqrt()
                })
                .fold(f64::INFINITY, f64::min);
            distances.push(nearest);
        }

        let min_distance = distances.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_distance = distances.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean_distance = stats::mean(&distances);
        let median_distance = stats::median(&distances);

        let close_records = distances.iter().filter(|d| **d < DCR_THRESHOLD).count();
        let total_records = distances.len();

        Ok(DcrReport {
            min_distance: stats::round_to(min_distance, 4),
            mean_distance: stats::round_to(mean_distance, 4),
            max_distance: stats::round_to(max_distance, 4),
            median_distance: stats::round_to(median_distance, 4),
            privacy_risk_score: stats::round_to((mean_distance * DCR_RISK_SCALE).min(100.0), 2),
            too_close_percentage: stats::round_to(
                close_records as f64 / total_records as f64 * 100.0,
                2,
            ),
            close_records,
            total_records,
            threshold: DCR_THRESHOLD,
        })
    }

    // ========================================================================
    // FAIRNESS FLIP TEST
    // ========================================================================

    /// Compare numeric column statistics between the two groups of a
    /// binary protected attribute. Non-binary protected columns are a
    /// configuration error.
    pub fn flip_test(&self, protected_column: &str) -> Result<FlipTestReport> {
        let Some(protected) = self.synthetic.column(protected_column) else {
            bail!(
                "Protected column '{}' not found in synthetic data",
                protected_column
            );
        };

        // Distinct values in first-appearance order
        let mut unique: Vec<String> = Vec::new();
        for row in 0..protected.len() {
            let value = protected.value_string(row);
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        if unique.len() != 2 {
            bail!(
                "Flip test supports only binary protected attributes, '{}' has {} unique values",
                protected_column,
                unique.len()
            );
        }

        let (value_a, value_b) = (unique[0].clone(), unique[1].clone());
        let rows_a: Vec<usize> = (0..protected.len())
            .filter(|row| protected.value_string(*row) == value_a)
            .collect();
        let rows_b: Vec<usize> = (0..protected.len())
            .filter(|row| protected.value_string(*row) == value_b)
            .collect();

        let mut column_stats = BTreeMap::new();
        for column in self.synthetic.numeric_column_names() {
            if column == protected_column {
                continue;
            }
            let Some(data) = self.synthetic.column(column).and_then(|c| c.as_numeric()) else {
                continue;
            };

            let group_a: Vec<f64> = rows_a.iter().map(|row| data[*row]).collect();
            let group_b: Vec<f64> = rows_b.iter().map(|row| data[*row]).collect();

            let mean_a = stats::mean(&group_a);
            let mean_b = stats::mean(&group_b);
            let std_a = stats::std_sample(&group_a);
            let std_b = stats::std_sample(&group_b);

            let diff = (mean_a - mean_b).abs();
            let diff_percentage = if mean_a != 0.0 {
                diff / mean_a.abs() * 100.0
            } else {
                0.0
            };

            column_stats.insert(
                column.to_string(),
                FlipColumnStats {
                    group_a_mean: stats::round_to(mean_a, 2),
                    group_b_mean: stats::round_to(mean_b, 2),
                    mean_diff: stats::round_to(diff, 2),
                    group_a_std: stats::round_to(std_a, 2),
                    group_b_std: stats::round_to(std_b, 2),
                    std_diff: stats::round_to((std_a - std_b).abs(), 2),
                    potential_bias: diff_percentage > FLIP_BIAS_THRESHOLD_PCT,
                },
            );
        }

        let total_biased_columns = column_stats.values().filter(|s| s.potential_bias).count();
        let fairness_score = if column_stats.is_empty() {
            100.0
        } else {
            stats::round_to(
                (1.0 - total_biased_columns as f64 / column_stats.len() as f64) * 100.0,
                2,
            )
        };

        Ok(FlipTestReport {
            protected_column: protected_column.to_string(),
            group_a_value: value_a,
            group_a_count: rows_a.len(),
            group_b_value: value_b,
            group_b_count: rows_b.len(),
            column_stats,
            total_biased_columns,
            fairness_score,
        })
    }

    // ========================================================================
    // DISTRIBUTION STATISTICS
    // ========================================================================

    /// Mean/std comparison for every numeric column present in both
    /// datasets. Relative differences are absent when the real-side
    /// statistic is zero.
    pub fn compare_stats(&self) -> BTreeMap<String, ColumnStats> {
        let mut report = BTreeMap::new();

        for column in self.real.numeric_column_names() {
            let (Some(real), Some(synth)) = (
                self.real.column(column).and_then(|c| c.as_numeric()),
                self.synthetic.column(column).and_then(|c| c.as_numeric()),
            ) else {
                continue;
            };

            let real_mean = stats::mean(real);
            let synth_mean = stats::mean(synth);
            let real_std = stats::std_sample(real);
            let synth_std = stats::std_sample(synth);

            let mean_diff_pct = (real_mean != 0.0)
                .then(|| stats::round_to((real_mean - synth_mean).abs() / real_mean.abs() * 100.0, 2));
            let std_diff_pct = (real_std != 0.0)
                .then(|| stats::round_to((real_std - synth_std).abs() / real_std.abs() * 100.0, 2));

            report.insert(
                column.to_string(),
                ColumnStats {
                    unit: self.units.get(column).cloned().unwrap_or_default(),
                    real_mean: stats::round_to(real_mean, 2),
                    synth_mean: stats::round_to(synth_mean, 2),
                    mean_diff_pct,
                    real_std: stats::round_to(real_std, 2),
                    synth_std: stats::round_to(synth_std, 2),
                    std_diff_pct,
                },
            );
        }

        report
    }

    /// Two-sample Kolmogorov-Smirnov test per numeric column. `similar`
    /// means the distributions are not significantly different at the
    /// 0.05 level.
    pub fn ks_test(&self) -> BTreeMap<String, KsResult> {
        let mut report = BTreeMap::new();

        for column in self.real.numeric_column_names() {
            let (Some(real), Some(synth)) = (
                self.real.column(column).and_then(|c| c.as_numeric()),
                self.synthetic.column(column).and_then(|c| c.as_numeric()),
            ) else {
                continue;
            };
            if real.is_empty() || synth.is_empty() {
                continue;
            }

            let statistic = ks_statistic(real, synth);
            let p_value = ks_p_value(statistic, real.len(), synth.len());

            report.insert(
                column.to_string(),
                KsResult {
                    ks_statistic: stats::round_to(statistic, 4),
                    p_value: stats::round_to(p_value, 4),
                    similar: p_value > 0.05,
                },
            );
        }

        report
    }

    /// Pearson correlation matrices over the shared numeric columns,
    /// plus the elementwise absolute difference.
    pub fn compare_correlation(&self) -> CorrelationComparison {
        let columns: Vec<String> = self
            .real
            .numeric_column_names()
            .into_iter()
            .filter(|c| {
                self.synthetic
                    .column(c)
                    .map_or(false, |col| col.is_numeric())
            })
            .map(|c| c.to_string())
            .collect();

        let matrix = |ds: &Dataset| -> Vec<Vec<f64>> {
            columns
                .iter()
                .map(|a| {
                    columns
                        .iter()
                        .map(|b| {
                            let (Some(x), Some(y)) = (
                                ds.column(a).and_then(|c| c.as_numeric()),
                                ds.column(b).and_then(|c| c.as_numeric()),
                            ) else {
                                return 0.0;
                            };
                            stats::pearson(x, y)
                        })
                        .collect()
                })
                .collect()
        };

        let real = matrix(&self.real);
        let synthetic = matrix(&self.synthetic);
        let difference = real
            .iter()
            .zip(synthetic.iter())
            .map(|(row_r, row_s)| {
                row_r
                    .iter()
                    .zip(row_s.iter())
                    .map(|(r, s)| (r - s).abs())
                    .collect()
            })
            .collect();

        CorrelationComparison {
            columns,
            real,
            synthetic,
            difference,
        }
    }
}

// ============================================================================
// KOLMOGOROV-SMIRNOV HELPERS
// ============================================================================

/// Maximum ECDF gap between two samples.
fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let mut sorted_a = a.to_vec();
    let mut sorted_b = b.to_vec();
    sorted_a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    sorted_b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (n_a, n_b) = (sorted_a.len(), sorted_b.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut max_gap: f64 = 0.0;

    while i < n_a && j < n_b {
        let value = sorted_a[i].min(sorted_b[j]);
        while i < n_a && sorted_a[i] <= value {
            i += 1;
        }
        while j < n_b && sorted_b[j] <= value {
            j += 1;
        }
        let gap = (i as f64 / n_a as f64 - j as f64 / n_b as f64).abs();
        max_gap = max_gap.max(gap);
    }
    max_gap
}

/// Asymptotic two-sample p-value for the KS statistic (Kolmogorov
/// distribution with the small-sample correction).
fn ks_p_value(statistic: f64, n_a: usize, n_b: usize) -> f64 {
    if statistic <= 0.0 {
        return 1.0;
    }
    let en = ((n_a * n_b) as f64 / (n_a + n_b) as f64).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * statistic;

    let mut p = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let term = sign * (-2.0 * (j as f64) * (j as f64) * lambda * lambda).exp();
        p += term;
        sign = -sign;
        if term.abs() < 1e-10 {
            break;
        }
    }
    (2.0 * p).clamp(0.0, 1.0)
}

fn default_units() -> HashMap<String, String> {
    [
        ("Pregnancies", "count"),
        ("Glucose", "mg/dL"),
        ("BloodPressure", "mm Hg"),
        ("SkinThickness", "mm"),
        ("Insulin", "uU/mL"),
        ("BMI", "kg/m^2"),
        ("DiabetesPedigreeFunction", "score"),
        ("Age", "years"),
        ("Outcome", "0/1"),
    ]
    .iter()
    .map(|(column, unit)| (column.to_string(), unit.to_string()))
    .collect()
}

// ============================================================================
// TESTS
// ============================================================================
