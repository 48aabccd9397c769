// 🔍 Re-identification Risk Analysis - structural privacy metrics
// k-anonymity, l-diversity and t-closeness over quasi-identifier groups,
// aggregated into a risk classification.

use crate::dataset::Dataset;
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

/// Numeric columns with fewer distinct values than this are treated as
/// plausible identifiers during auto-detection.
const LOW_CARDINALITY_LIMIT: usize = 20;

/// Column names commonly acting as quasi-identifiers in clinical data.
const COMMON_QUASI_IDENTIFIERS: [&str; 6] =
    ["Age", "Gender", "ZipCode", "ZIP", "Race", "Ethnicity"];

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupRiskLevel {
    /// A group of one: the record is unique on its quasi-identifiers.
    #[serde(rename = "CRITICAL")]
    Critical,
    #[serde(rename = "HIGH")]
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct KAnonymityViolation {
    pub group: BTreeMap<String, String>,
    pub count: usize,
    pub risk_level: GroupRiskLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct KAnonymityReport {
    pub satisfies_k_anonymity: bool,
    pub k: usize,
    pub total_groups: usize,
    pub violating_groups: usize,
    pub smallest_group_size: usize,
    pub records_at_risk: usize,
    pub total_records: usize,
    pub k_anonymity_score: f64,
    /// First 10 violating groups, smallest keys first.
    pub violation_details: Vec<KAnonymityViolation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeDiversity {
    pub satisfies_l_diversity: bool,
    pub l: usize,
    pub total_groups: usize,
    pub violating_groups: usize,
    pub records_at_risk: usize,
    pub diversity_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LDiversityReport {
    pub satisfies_l_diversity: bool,
    pub per_attribute: BTreeMap<String, AttributeDiversity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupDistance {
    pub group: BTreeMap<String, String>,
    pub distance: f64,
    pub violates: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeCloseness {
    pub satisfies_t_closeness: bool,
    pub t: f64,
    pub total_groups: usize,
    pub violating_groups: usize,
    pub max_distance: f64,
    pub avg_distance: f64,
    /// First 10 group distances, for inspection.
    pub distances: Vec<GroupDistance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TClosenessReport {
    pub satisfies_t_closeness: bool,
    pub per_attribute: BTreeMap<String, AttributeCloseness>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub metrics_satisfied: usize,
    pub risk_level: RiskLevel,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivacyAudit {
    pub report_id: Uuid,
    pub k_anonymity: KAnonymityReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l_diversity: Option<LDiversityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_closeness: Option<TClosenessReport>,
    pub summary: AuditSummary,
}

// ============================================================================
// ANALYZER
// ============================================================================

/// Checks structural privacy properties of a synthetic dataset: how well
/// records hide inside quasi-identifier equivalence classes, and how
/// much those classes give away about sensitive attributes.
pub struct ReIdentificationAnalyzer {
    real: Dataset,
    synthetic: Dataset,
    quasi_identifiers: Vec<String>,
    sensitive_attributes: Vec<String>,
}

impl ReIdentificationAnalyzer {
    /// Build an analyzer. Without an explicit quasi-identifier list the
    /// common clinical identifier names are used when present, falling
    /// back to every categorical column plus low-cardinality numeric
    /// columns. Configured names missing from the synthetic dataset are
    /// dropped with a warning.
    pub fn new(
        real: Dataset,
        synthetic: Dataset,
        quasi_identifiers: Option<Vec<String>>,
        sensitive_attributes: Vec<String>,
    ) -> Self {
        let quasi_identifiers = match quasi_identifiers {
            Some(columns) => {
                let (present, missing): (Vec<String>, Vec<String>) = columns
                    .into_iter()
                    .partition(|c| synthetic.has_column(c));
                for column in missing {
                    warn!(column = %column, "Quasi-identifier not in synthetic dataset, dropped");
                }
                present
            }
            None => Self::detect_quasi_identifiers(&synthetic),
        };

        info!(
            quasi_identifiers = ?quasi_identifiers,
            sensitive_attributes = ?sensitive_attributes,
            real_rows = real.n_rows(),
            synthetic_rows = synthetic.n_rows(),
            "Initialized re-identification analyzer"
        );

        ReIdentificationAnalyzer {
            real,
            synthetic,
            quasi_identifiers,
            sensitive_attributes,
        }
    }

    pub fn quasi_identifiers(&self) -> &[String] {
        &self.quasi_identifiers
    }

    pub fn sensitive_attributes(&self) -> &[String] {
        &self.sensitive_attributes
    }

    pub fn real(&self) -> &Dataset {
        &self.real
    }

    fn detect_quasi_identifiers(synthetic: &Dataset) -> Vec<String> {
        let common: Vec<String> = COMMON_QUASI_IDENTIFIERS
            .iter()
            .filter(|c| synthetic.has_column(c))
            .map(|c| c.to_string())
            .collect();
        if !common.is_empty() {
            return common;
        }

        synthetic
            .column_names()
            .iter()
            .filter(|name| {
                synthetic.column(name).map_or(false, |column| {
                    !column.is_numeric() || column.distinct_count() < LOW_CARDINALITY_LIMIT
                })
            })
            .map(|name| name.to_string())
            .collect()
    }

    /// Equivalence classes: synthetic row indices grouped by their
    /// quasi-identifier tuple. Recomputed per call, never cached.
    fn equivalence_classes(&self) -> BTreeMap<Vec<String>, Vec<usize>> {
        let columns: Vec<_> = self
            .quasi_identifiers
            .iter()
            .filter_map(|name| self.synthetic.column(name).map(|c| (name, c)))
            .collect();

        let mut groups: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
        for row in 0..self.synthetic.n_rows() {
            let key: Vec<String> = columns
                .iter()
                .map(|(_, column)| column.value_string(row))
                .collect();
            groups.entry(key).or_default().push(row);
        }
        groups
    }

    fn group_description(&self, key: &[String]) -> BTreeMap<String, String> {
        self.quasi_identifiers
            .iter()
            .zip(key.iter())
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    fn require_configuration(&self) -> Result<()> {
        if self.quasi_identifiers.is_empty() {
            bail!("No quasi-identifiers specified");
        }
        if self.synthetic.is_empty() {
            bail!("Synthetic dataset is empty");
        }
        Ok(())
    }

    // ========================================================================
    // K-ANONYMITY
    // ========================================================================

    /// Every quasi-identifier combination must occur at least k times;
    /// a record then hides in a crowd of at least k-1 others.
    pub fn check_k_anonymity(&self, k: usize) -> Result<KAnonymityReport> {
        self.require_configuration()?;

        let groups = self.equivalence_classes();
        let total_groups = groups.len();
        let total_records = self.synthetic.n_rows();

        let smallest_group_size = groups.values().map(|rows| rows.len()).min().unwrap_or(0);

        let mut violating_groups = 0;
        let mut records_at_risk = 0;
        let mut violation_details = Vec::new();
        for (key, rows) in &groups {
            if rows.len() < k {
                violating_groups += 1;
                records_at_risk += rows.len();
                if violation_details.len() < 10 {
                    violation_details.push(KAnonymityViolation {
                        group: self.group_description(key),
                        count: rows.len(),
                        risk_level: if rows.len() == 1 {
                            GroupRiskLevel::Critical
                        } else {
                            GroupRiskLevel::High
                        },
                    });
                }
            }
        }

        let k_anonymity_score =
            (total_records - records_at_risk) as f64 / total_records as f64 * 100.0;
        let satisfies = violating_groups == 0;

        info!(
            k,
            total_groups,
            violating_groups,
            smallest_group_size,
            satisfies,
            "k-anonymity check complete"
        );

        Ok(KAnonymityReport {
            satisfies_k_anonymity: satisfies,
            k,
            total_groups,
            violating_groups,
            smallest_group_size,
            records_at_risk,
            total_records,
            k_anonymity_score,
            violation_details,
        })
    }

    // ========================================================================
    // L-DIVERSITY
    // ========================================================================

    /// Distinct l-diversity: each equivalence class must expose at least
    /// l distinct values of every sensitive attribute (a k-anonymous
    /// group whose sensitive values are all identical protects nothing).
    pub fn check_l_diversity(&self, l: usize) -> Result<LDiversityReport> {
        self.require_configuration()?;
        if self.sensitive_attributes.is_empty() {
            bail!("No sensitive attributes specified");
        }

        let groups = self.equivalence_classes();
        let total_records = self.synthetic.n_rows();
        let mut per_attribute = BTreeMap::new();

        for attribute in &self.sensitive_attributes {
            let Some(column) = self.synthetic.column(attribute) else {
                warn!(attribute = %attribute, "Sensitive attribute not found, skipping");
                continue;
            };

            let mut violating_groups = 0;
            let mut records_at_risk = 0;
            for rows in groups.values() {
                let distinct: HashSet<String> =
                    rows.iter().map(|row| column.value_string(*row)).collect();
                if distinct.len() < l {
                    violating_groups += 1;
                    records_at_risk += rows.len();
                }
            }

            let diversity_score =
                (total_records - records_at_risk) as f64 / total_records as f64 * 100.0;

            per_attribute.insert(
                attribute.clone(),
                AttributeDiversity {
                    satisfies_l_diversity: violating_groups == 0,
                    l,
                    total_groups: groups.len(),
                    violating_groups,
                    records_at_risk,
                    diversity_score,
                },
            );
        }

        let satisfies = per_attribute
            .values()
            .all(|report| report.satisfies_l_diversity);

        Ok(LDiversityReport {
            satisfies_l_diversity: satisfies,
            per_attribute,
        })
    }

    // ========================================================================
    // T-CLOSENESS
    // ========================================================================

    /// Each equivalence class's sensitive-value distribution must stay
    /// within distance t of the dataset-wide distribution, so a skewed
    /// group cannot leak what a diverse one hides.
    pub fn check_t_closeness(&self, t: f64) -> Result<TClosenessReport> {
        self.require_configuration()?;
        if self.sensitive_attributes.is_empty() {
            bail!("No sensitive attributes specified");
        }

        let groups = self.equivalence_classes();
        let total_records = self.synthetic.n_rows();
        let mut per_attribute = BTreeMap::new();

        for attribute in &self.sensitive_attributes {
            let Some(column) = self.synthetic.column(attribute) else {
                warn!(attribute = %attribute, "Sensitive attribute not found, skipping");
                continue;
            };

            let mut overall: BTreeMap<String, f64> = BTreeMap::new();
            for row in 0..total_records {
                *overall.entry(column.value_string(row)).or_insert(0.0) += 1.0;
            }
            for frequency in overall.values_mut() {
                *frequency /= total_records as f64;
            }

            let mut distances = Vec::new();
            let mut violating_groups = 0;
            let mut max_distance: f64 = 0.0;
            let mut sum_distance = 0.0;

            for (key, rows) in &groups {
                let mut local: BTreeMap<String, f64> = BTreeMap::new();
                for row in rows {
                    *local.entry(column.value_string(*row)).or_insert(0.0) += 1.0;
                }
                for frequency in local.values_mut() {
                    *frequency /= rows.len() as f64;
                }

                let values: HashSet<&String> = overall.keys().chain(local.keys()).collect();
                let distance: f64 = values
                    .iter()
                    .map(|value| {
                        let p = overall.get(*value).copied().unwrap_or(0.0);
                        let q = local.get(*value).copied().unwrap_or(0.0);
                        (p - q).abs()
                    })
                    .sum::<f64>()
                    / 2.0;

                let violates = distance > t;
                if violates {
                    violating_groups += 1;
                }
                max_distance = max_distance.max(distance);
                sum_distance += distance;

                if distances.len() < 10 {
                    distances.push(GroupDistance {
                        group: self.group_description(key),
                        distance,
                        violates,
                    });
                }
            }

            let avg_distance = if groups.is_empty() {
                0.0
            } else {
                sum_distance / groups.len() as f64
            };

            per_attribute.insert(
                attribute.clone(),
                AttributeCloseness {
                    satisfies_t_closeness: violating_groups == 0,
                    t,
                    total_groups: groups.len(),
                    violating_groups,
                    max_distance,
                    avg_distance,
                    distances,
                },
            );
        }

        let satisfies = per_attribute
            .values()
            .all(|report| report.satisfies_t_closeness);

        Ok(TClosenessReport {
            satisfies_t_closeness: satisfies,
            per_attribute,
        })
    }

    // ========================================================================
    // COMPREHENSIVE AUDIT
    // ========================================================================

    /// Run all three metrics and classify the release risk by how many
    /// are satisfied: 3 LOW, 2 MEDIUM, 1 HIGH, 0 CRITICAL. Without
    /// sensitive attributes only k-anonymity can run; the absent metrics
    /// count as unsatisfied.
    pub fn comprehensive_privacy_audit(&self, k: usize, l: usize, t: f64) -> Result<PrivacyAudit> {
        let k_anonymity = self.check_k_anonymity(k)?;

        let (l_diversity, t_closeness) = if self.sensitive_attributes.is_empty() {
            warn!("No sensitive attributes configured, skipping l-diversity and t-closeness");
            (None, None)
        } else {
            (Some(self.check_l_diversity(l)?), Some(self.check_t_closeness(t)?))
        };

        let metrics_satisfied = [
            k_anonymity.satisfies_k_anonymity,
            l_diversity
                .as_ref()
                .is_some_and(|r| r.satisfies_l_diversity),
            t_closeness
                .as_ref()
                .is_some_and(|r| r.satisfies_t_closeness),
        ]
        .iter()
        .filter(|satisfied| **satisfied)
        .count();

        let (risk_level, recommendation) = match metrics_satisfied {
            3 => (
                RiskLevel::Low,
                "Dataset is safe to share with strong privacy guarantees",
            ),
            2 => (
                RiskLevel::Medium,
                "Review violations and consider regenerating with stricter parameters",
            ),
            1 => (
                RiskLevel::High,
                "Regenerate data with stronger privacy settings",
            ),
            _ => (
                RiskLevel::Critical,
                "DO NOT SHARE - Multiple severe privacy violations detected",
            ),
        };

        info!(metrics_satisfied, ?risk_level, "Privacy audit complete");

        Ok(PrivacyAudit {
            report_id: Uuid::new_v4(),
            k_anonymity,
            l_diversity,
            t_closeness,
            summary: AuditSummary {
                metrics_satisfied,
                risk_level,
                recommendation: recommendation.to_string(),
            },
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
