// 🗂 Constraint Profiles - named constraint collections with conflict
// detection, compliance reporting, and portable JSON templates

use crate::constraints::{
    CategoricalConstraint, Constraint, ConstraintValidation, NumericDtype, RangeConstraint,
};
use crate::dataset::Dataset;
use anyhow::{bail, Context as AnyhowContext, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// METADATA & CONFLICTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub created: String,
    pub modified: String,
    pub version: String,
}

impl ProfileMetadata {
    fn now() -> Self {
        let ts = Utc::now().to_rfc3339();
        ProfileMetadata {
            created: ts.clone(),
            modified: ts,
            version: "1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictSeverity {
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "WARNING")]
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub column: String,
    pub issue: String,
    pub severity: ConflictSeverity,
}

/// Outcome of conflict detection. Advisory only: an invalid report does
/// not prevent `apply_constraints` from running — callers decide.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub valid: bool,
    pub conflicts: Vec<Conflict>,
}

// ============================================================================
// COMPLIANCE REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConstraintCompliance {
    #[serde(rename = "type")]
    pub kind: String,
    pub params: Value,
    pub validation: ConstraintValidation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnCompliance {
    pub num_constraints: usize,
    pub constraints: Vec<ConstraintCompliance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub report_id: Uuid,
    pub profile_name: String,
    pub dataset_fingerprint: String,
    pub timestamp: String,
    pub columns: BTreeMap<String, ColumnCompliance>,
}

// ============================================================================
// CONSTRAINT MANAGER
// ============================================================================

struct ColumnEntry {
    column: String,
    constraints: Vec<Constraint>,
}

/// Owns a named collection of constraints keyed by column. One column may
/// hold several constraints; they apply in insertion order, each feeding
/// the next.
pub struct ConstraintManager {
    pub name: String,
    pub metadata: ProfileMetadata,
    entries: Vec<ColumnEntry>,
    strict: bool,
    rng: StdRng,
}

impl ConstraintManager {
    pub fn new(name: &str) -> Self {
        ConstraintManager {
            name: name.to_string(),
            metadata: ProfileMetadata::now(),
            entries: Vec::new(),
            strict: false,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic RNG for random categorical replacement.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// In strict mode each column is re-validated after its constraint
    /// chain runs, and a violation that survived (or reappeared — e.g. a
    /// statistical rescale pushing values back out of range) is an error.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn constraint_count(&self) -> usize {
        self.entries.iter().map(|e| e.constraints.len()).sum()
    }

    pub fn columns_with_constraints(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.column.as_str()).collect()
    }

    /// Append a constraint to its column's list and bump the modified
    /// timestamp. Constraints are never edited in place: replace them.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        let column = constraint.column().to_string();
        info!(column = %column, kind = constraint.kind(), "Added constraint");

        match self.entries.iter_mut().find(|e| e.column == column) {
            Some(entry) => entry.constraints.push(constraint),
            None => self.entries.push(ColumnEntry {
                column,
                constraints: vec![constraint],
            }),
        }
        self.metadata.modified = Utc::now().to_rfc3339();
    }

    // ========================================================================
    // CONFLICT DETECTION
    // ========================================================================

    /// Detect contradictory constraints. Two rules:
    /// 1. More than one range constraint on a column is ambiguous (ERROR).
    /// 2. A statistical target mean outside a coexisting range's bounds
    ///    can reintroduce out-of-range values depending on application
    ///    order (WARNING).
    pub fn validate_constraints(&self) -> ConflictReport {
        let mut conflicts = Vec::new();

        for entry in &self.entries {
            let ranges: Vec<&RangeConstraint> = entry
                .constraints
                .iter()
                .filter_map(|c| match c {
                    Constraint::Range(r) => Some(r),
                    _ => None,
                })
                .collect();

            if ranges.len() > 1 {
                conflicts.push(Conflict {
                    column: entry.column.clone(),
                    issue: "Multiple range constraints".to_string(),
                    severity: ConflictSeverity::Error,
                });
            }

            let stat = entry.constraints.iter().find_map(|c| match c {
                Constraint::Statistical(s) => Some(s),
                _ => None,
            });

            if let (Some(stat), Some(range)) = (stat, ranges.first()) {
                if stat.target_mean < range.min || stat.target_mean > range.max {
                    conflicts.push(Conflict {
                        column: entry.column.clone(),
                        issue: format!(
                            "Statistical mean {} outside range [{}, {}]",
                            stat.target_mean, range.min, range.max
                        ),
                        severity: ConflictSeverity::Warning,
                    });
                }
            }
        }

        for conflict in &conflicts {
            warn!(
                column = %conflict.column,
                severity = ?conflict.severity,
                "Constraint conflict: {}",
                conflict.issue
            );
        }

        ConflictReport {
            valid: !conflicts
                .iter()
                .any(|c| c.severity == ConflictSeverity::Error),
            conflicts,
        }
    }

    // ========================================================================
    // APPLICATION
    // ========================================================================

    /// Apply every registered constraint to the dataset, returning a new
    /// dataset. Per column the constraints run in insertion order, each
    /// feeding the next. Columns absent from the dataset are skipped:
    /// templates are reused across datasets with partially overlapping
    /// schemas.
    pub fn apply_constraints(&mut self, df: &Dataset) -> Result<Dataset> {
        let mut result = df.clone();

        for entry in &self.entries {
            if !result.has_column(&entry.column) {
                warn!(column = %entry.column, "Column not found in dataset, skipping");
                continue;
            }

            for constraint in &entry.constraints {
                let Some(current) = result.column(&entry.column).cloned() else {
                    break;
                };
                if let Some(updated) = constraint.apply(&current, &mut self.rng) {
                    result.replace_column(&entry.column, updated)?;
                }
            }

            if self.strict {
                let current = result.column(&entry.column).cloned();
                if let Some(column) = current {
                    for constraint in &entry.constraints {
                        if let Some(validation) = constraint.validate(&column) {
                            if !validation.is_valid() {
                                bail!(
                                    "Strict mode: '{}' still violates its {} constraint after application",
                                    entry.column,
                                    constraint.kind()
                                );
                            }
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    // ========================================================================
    // COMPLIANCE REPORT
    // ========================================================================

    /// Read-only audit: run every constraint's `validate` against the
    /// given dataset. Independent of `apply_constraints` — typically run
    /// against the already-applied output.
    pub fn generate_compliance_report(&self, df: &Dataset) -> ComplianceReport {
        let mut columns = BTreeMap::new();

        for entry in &self.entries {
            let column = match df.column(&entry.column) {
                Some(c) => c,
                None => {
                    warn!(column = %entry.column, "Column not found in dataset, skipping");
                    continue;
                }
            };

            let mut checks = Vec::new();
            for constraint in &entry.constraints {
                if let Some(validation) = constraint.validate(column) {
                    checks.push(ConstraintCompliance {
                        kind: constraint.kind().to_string(),
                        params: constraint.params_value(),
                        validation,
                    });
                }
            }

            columns.insert(
                entry.column.clone(),
                ColumnCompliance {
                    num_constraints: entry.constraints.len(),
                    constraints: checks,
                },
            );
        }

        ComplianceReport {
            report_id: Uuid::new_v4(),
            profile_name: self.name.clone(),
            dataset_fingerprint: df.fingerprint(),
            timestamp: Utc::now().to_rfc3339(),
            columns,
        }
    }

    // ========================================================================
    // TEMPLATES (JSON persistence)
    // ========================================================================

    /// Save the profile as a JSON template. The write goes to a
    /// temporary sibling first and is renamed into place, so a template
    /// on disk is never half-written.
    pub fn save_template<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let constraints: Vec<TemplateConstraint> = self
            .entries
            .iter()
            .flat_map(|entry| {
                entry.constraints.iter().map(|c| TemplateConstraint {
                    column: c.column().to_string(),
                    constraint_type: c.kind().to_string(),
                    params: c.params_value(),
                })
            })
            .collect();

        let doc = TemplateDoc {
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            constraints,
        };

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        let json = serde_json::to_string_pretty(&doc).context("Failed to serialize template")?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write template: {:?}", tmp))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move template into place: {:?}", path))?;

        info!(path = ?path, constraints = self.constraint_count(), "Template saved");
        Ok(())
    }

    /// Load a profile from a JSON template, reconstructing typed
    /// constraints by their `constraint_type` tag. Unknown tags are
    /// skipped with a warning so newer templates stay loadable.
    pub fn load_template<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read template: {:?}", path.as_ref()))?;
        let doc: TemplateDoc =
            serde_json::from_str(&content).context("Failed to parse template JSON")?;

        let mut manager = ConstraintManager::new(&doc.name);
        manager.metadata = doc.metadata;

        for tc in &doc.constraints {
            match Constraint::from_template_parts(&tc.column, &tc.constraint_type, &tc.params)? {
                Some(constraint) => {
                    match manager.entries.iter_mut().find(|e| e.column == tc.column) {
                        Some(entry) => entry.constraints.push(constraint),
                        None => manager.entries.push(ColumnEntry {
                            column: tc.column.clone(),
                            constraints: vec![constraint],
                        }),
                    }
                }
                None => {
                    warn!(
                        constraint_type = %tc.constraint_type,
                        column = %tc.column,
                        "Unknown constraint type, skipping"
                    );
                }
            }
        }

        info!(name = %manager.name, constraints = manager.constraint_count(), "Template loaded");
        Ok(manager)
    }
}

impl Default for ConstraintManager {
    fn default() -> Self {
        Self::new("Custom Profile")
    }
}

#[derive(Serialize, Deserialize)]
struct TemplateConstraint {
    column: String,
    constraint_type: String,
    params: Value,
}

#[derive(Serialize, Deserialize)]
struct TemplateDoc {
    name: String,
    metadata: ProfileMetadata,
    constraints: Vec<TemplateConstraint>,
}

// ============================================================================
// PRE-BUILT TEMPLATES
// ============================================================================

/// Standard clinical laboratory reference ranges.
pub fn create_clinical_labs_template() -> Result<ConstraintManager> {
    let mut manager = ConstraintManager::new("Clinical Labs");

    // Demographics
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Age", 0.0, 120.0)?
            .with_dtype(NumericDtype::Int)
            .with_unit("years"),
    ));
    manager.add_constraint(Constraint::Categorical(CategoricalConstraint::new(
        "Gender",
        ["M", "F"],
    )?));

    // Vital signs
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("BloodPressure", 40.0, 250.0)?.with_unit("mm Hg"),
    ));
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("HeartRate", 30.0, 200.0)?.with_unit("bpm"),
    ));
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Temperature", 35.0, 42.0)?.with_unit("°C"),
    ));

    // Lab values
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Glucose", 50.0, 600.0)?.with_unit("mg/dL"),
    ));
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Cholesterol", 100.0, 400.0)?.with_unit("mg/dL"),
    ));
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Hemoglobin", 5.0, 20.0)?.with_unit("g/dL"),
    ));

    // Body metrics
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("BMI", 10.0, 80.0)?.with_unit("kg/m²"),
    ));
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Weight", 20.0, 300.0)?.with_unit("kg"),
    ));
    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Height", 50.0, 250.0)?.with_unit("cm"),
    ));

    Ok(manager)
}

/// Standard demographic categories.
pub fn create_demographics_template() -> Result<ConstraintManager> {
    let mut manager = ConstraintManager::new("Demographics");

    manager.add_constraint(Constraint::Range(
        RangeConstraint::new("Age", 0.0, 120.0)?.with_dtype(NumericDtype::Int),
    ));
    manager.add_constraint(Constraint::Categorical(CategoricalConstraint::new(
        "Gender",
        ["M", "F", "Other"],
    )?));
    manager.add_constraint(Constraint::Categorical(CategoricalConstraint::new(
        "Race",
        ["White", "Black", "Asian", "Hispanic", "Other"],
    )?));
    manager.add_constraint(Constraint::Categorical(CategoricalConstraint::new(
        "MaritalStatus",
        ["Single", "Married", "Divorced", "Widowed"],
    )?));
    manager.add_constraint(Constraint::Categorical(
        CategoricalConstraint::new("Education", ["High School", "Bachelor", "Master", "PhD"])?
            .with_ordered(true),
    ));

    Ok(manager)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::StatisticalConstraint;
    use crate::dataset::Column;

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_column("Age", Column::Numeric(vec![25.0, 30.0, -5.0, 150.0, 45.0]))
            .unwrap();
        ds.add_column(
            "Gender",
            Column::Categorical(
                ["M", "F", "X", "M", "Invalid"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        )
        .unwrap();
        ds
    }

    fn demo_manager() -> ConstraintManager {
        let mut manager = ConstraintManager::new("Demo Profile").with_seed(7);
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Age", 0.0, 120.0)
                .unwrap()
                .with_dtype(NumericDtype::Int),
        ));
        manager.add_constraint(Constraint::Categorical(
            CategoricalConstraint::new("Gender", ["M", "F"]).unwrap(),
        ));
        manager
    }

    #[test]
    fn test_duplicate_range_constraints_conflict() {
        let mut manager = ConstraintManager::new("Conflicted");
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Age", 0.0, 120.0).unwrap(),
        ));
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Age", 18.0, 65.0).unwrap(),
        ));

        let report = manager.validate_constraints();
        assert!(!report.valid);
        assert!(report
            .conflicts
            .iter()
            .any(|c| c.severity == ConflictSeverity::Error && c.column == "Age"));
    }

    #[test]
    fn test_statistical_mean_outside_range_warns() {
        let mut manager = ConstraintManager::new("Warned");
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("BMI", 10.0, 80.0).unwrap(),
        ));
        manager.add_constraint(Constraint::Statistical(
            StatisticalConstraint::new("BMI", 200.0, 5.0, 0.1).unwrap(),
        ));

        let report = manager.validate_constraints();
        // Warnings do not invalidate the profile
        assert!(report.valid);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].severity, ConflictSeverity::Warning);
    }

    #[test]
    fn test_apply_constraints_enforces_all_columns() {
        let mut manager = demo_manager();
        let applied = manager.apply_constraints(&sample_dataset()).unwrap();

        let ages = applied.column("Age").unwrap().as_numeric().unwrap();
        assert!(ages.iter().all(|v| (0.0..=120.0).contains(v)));

        let genders = applied.column("Gender").unwrap().as_categorical().unwrap();
        assert!(genders.iter().all(|v| v == "M" || v == "F"));
    }

    #[test]
    fn test_apply_constraints_skips_missing_columns() {
        let mut manager = demo_manager();
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Glucose", 50.0, 600.0).unwrap(),
        ));

        // Dataset has no Glucose column; apply must still succeed
        let applied = manager.apply_constraints(&sample_dataset()).unwrap();
        assert!(!applied.has_column("Glucose"));
    }

    #[test]
    fn test_apply_constraints_insertion_order() {
        // Range first, then statistical: the rescale runs on clipped data
        // and may push values back outside the range. Lenient mode lets
        // that happen — order-dependence is deliberate.
        let mut manager = ConstraintManager::new("Ordered").with_seed(7);
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Age", 0.0, 50.0).unwrap(),
        ));
        manager.add_constraint(Constraint::Statistical(
            StatisticalConstraint::new("Age", 49.0, 30.0, 0.1).unwrap(),
        ));

        let mut ds = Dataset::new();
        ds.add_column("Age", Column::Numeric(vec![10.0, 20.0, 30.0, 40.0, 90.0]))
            .unwrap();

        let applied = manager.apply_constraints(&ds).unwrap();
        let ages = applied.column("Age").unwrap().as_numeric().unwrap();
        assert!(ages.iter().any(|v| *v > 50.0));
    }

    #[test]
    fn test_strict_mode_rejects_reintroduced_violations() {
        let mut manager = ConstraintManager::new("Strict").with_seed(7).with_strict(true);
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Age", 0.0, 50.0).unwrap(),
        ));
        manager.add_constraint(Constraint::Statistical(
            StatisticalConstraint::new("Age", 49.0, 30.0, 0.1).unwrap(),
        ));

        let mut ds = Dataset::new();
        ds.add_column("Age", Column::Numeric(vec![10.0, 20.0, 30.0, 40.0, 90.0]))
            .unwrap();

        assert!(manager.apply_constraints(&ds).is_err());
    }

    #[test]
    fn test_compliance_report_structure() {
        let mut manager = demo_manager();
        let applied = manager.apply_constraints(&sample_dataset()).unwrap();
        let report = manager.generate_compliance_report(&applied);

        assert_eq!(report.profile_name, "Demo Profile");
        assert_eq!(report.columns.len(), 2);

        let age = &report.columns["Age"];
        assert_eq!(age.num_constraints, 1);
        assert_eq!(age.constraints[0].kind, "range");
        assert!(age.constraints[0].validation.is_valid());
    }

    #[test]
    fn test_template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles").join("demo.json");

        let mut manager = demo_manager();
        manager.add_constraint(Constraint::Statistical(
            StatisticalConstraint::new("BMI", 25.0, 5.0, 0.1).unwrap(),
        ));
        manager.save_template(&path).unwrap();

        let loaded = ConstraintManager::load_template(&path).unwrap();
        assert_eq!(loaded.name, "Demo Profile");
        assert_eq!(loaded.constraint_count(), 3);
        assert_eq!(
            loaded.columns_with_constraints(),
            vec!["Age", "Gender", "BMI"]
        );
    }

    #[test]
    fn test_template_load_skips_unknown_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.json");

        let doc = serde_json::json!({
            "name": "Future Profile",
            "metadata": {
                "created": "2025-01-01T00:00:00+00:00",
                "modified": "2025-01-01T00:00:00+00:00",
                "version": "2.0"
            },
            "constraints": [
                {"column": "Age", "constraint_type": "range",
                 "params": {"min": 0.0, "max": 120.0}},
                {"column": "Notes", "constraint_type": "regex",
                 "params": {"pattern": ".*"}}
            ]
        });
        fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

        let loaded = ConstraintManager::load_template(&path).unwrap();
        assert_eq!(loaded.constraint_count(), 1);
        assert_eq!(loaded.columns_with_constraints(), vec!["Age"]);
    }

    #[test]
    fn test_prebuilt_templates() {
        let clinical = create_clinical_labs_template().unwrap();
        assert_eq!(clinical.name, "Clinical Labs");
        assert!(clinical.columns_with_constraints().contains(&"Glucose"));

        let demographics = create_demographics_template().unwrap();
        assert_eq!(demographics.name, "Demographics");
        assert_eq!(demographics.constraint_count(), 5);
    }
}
