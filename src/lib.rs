// Synthguard - Privacy & Constraint Validation Engine
// Certifies synthetic tabular data before release: enforces declarative
// validity constraints, injects differential-privacy noise under a
// bounded budget, and audits structural re-identification risk.

pub mod constraints;
pub mod dataset;
pub mod privacy;
pub mod profile;
pub mod quality;
pub mod reidentification;
pub mod stats;

// Re-export commonly used types
pub use constraints::{
    CategoricalConstraint, CategoricalValidation, Constraint, ConstraintValidation, NumericDtype,
    RangeConstraint, RangeValidation, ReplacementStrategy, StatisticalConstraint,
    StatisticalValidation,
};
pub use dataset::{Column, Dataset, NamedColumn};
pub use privacy::{
    BudgetPolicy, BudgetTracking, DifferentialPrivacyEngine, NoiseMechanism, NoiseOperation,
    PrivacyGuarantee, PrivacyReport,
};
pub use profile::{
    create_clinical_labs_template, create_demographics_template, ColumnCompliance,
    ComplianceReport, Conflict, ConflictReport, ConflictSeverity, ConstraintCompliance,
    ConstraintManager, ProfileMetadata,
};
pub use quality::{
    ColumnStats, CorrelationComparison, DcrReport, FlipColumnStats, FlipTestReport, KsResult,
    LeakageReport, QualityAuditor,
};
pub use reidentification::{
    AttributeCloseness, AttributeDiversity, AuditSummary, GroupDistance, GroupRiskLevel,
    KAnonymityReport, KAnonymityViolation, LDiversityReport, PrivacyAudit,
    ReIdentificationAnalyzer, RiskLevel, TClosenessReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// The full certification pipeline: constrain, noise, audit.
    #[test]
    fn test_release_pipeline_end_to_end() {
        let mut real = Dataset::new();
        real.add_column(
            "Age",
            Column::Numeric(vec![25.0, 25.0, 25.0, 30.0, 30.0, 30.0]),
        )
        .unwrap();
        real.add_column(
            "Gender",
            Column::Categorical(
                ["M", "M", "M", "F", "F", "F"].iter().map(|s| s.to_string()).collect(),
            ),
        )
        .unwrap();
        real.add_column(
            "Diagnosis",
            Column::Categorical(
                ["Diabetes", "Asthma", "Healthy", "Diabetes", "Cancer", "Healthy"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        )
        .unwrap();
        real.add_column(
            "Glucose",
            Column::Numeric(vec![85.0, 90.0, 120.0, 140.0, 160.0, 110.0]),
        )
        .unwrap();

        // A generator produced implausible glucose values; the
        // quasi-identifier columns came out clean
        let mut synthetic = real.clone();
        synthetic
            .replace_column(
                "Glucose",
                Column::Numeric(vec![85.0, 90.0, 1000.0, 140.0, 160.0, -20.0]),
            )
            .unwrap();

        // 1. Enforce validity constraints
        let mut manager = ConstraintManager::new("Pipeline").with_seed(11);
        manager.add_constraint(Constraint::Range(
            RangeConstraint::new("Glucose", 50.0, 600.0).unwrap(),
        ));
        manager.add_constraint(Constraint::Categorical(
            CategoricalConstraint::new("Gender", ["M", "F"]).unwrap(),
        ));
        assert!(manager.validate_constraints().valid);
        let constrained = manager.apply_constraints(&synthetic).unwrap();

        let compliance = manager.generate_compliance_report(&constrained);
        assert!(compliance
            .columns
            .values()
            .all(|c| c.constraints.iter().all(|check| check.validation.is_valid())));

        // 2. Inject calibrated noise into numeric columns
        let mut engine = DifferentialPrivacyEngine::new(1.0, 1e-5, NoiseMechanism::Gaussian)
            .unwrap()
            .with_seed(11);
        let noised = engine.add_noise_to_dataframe(&constrained, None, true).unwrap();
        assert!((engine.budget_used() - 1.0).abs() < 1e-12);
        assert_eq!(noised.n_rows(), constrained.n_rows());

        // 3. Certify structural privacy on the constrained table (the
        // grouping structure is what the analyzer inspects)
        let analyzer = ReIdentificationAnalyzer::new(
            real.clone(),
            constrained.clone(),
            Some(vec!["Age".into(), "Gender".into()]),
            vec!["Diagnosis".into()],
        );
        let audit = analyzer.comprehensive_privacy_audit(3, 2, 0.5).unwrap();
        assert_eq!(audit.k_anonymity.total_groups, 2);
        assert_eq!(audit.k_anonymity.smallest_group_size, 3);
        assert_eq!(audit.summary.risk_level, RiskLevel::Low);

        // 4. Leakage and distance auditing on the released table
        let auditor = QualityAuditor::new(real, noised);
        let leakage = auditor.check_privacy();
        assert_eq!(leakage.total_real_rows, 6);
        let dcr = auditor.distance_to_closest_record().unwrap();
        assert_eq!(dcr.total_records, 6);
        assert!(dcr.threshold == 0.5);
    }
}
