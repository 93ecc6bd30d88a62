use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::models::AnalyzerOutput;
use crate::config::ClassifierConfig;
use crate::errors::ClassificationError;

/// Secure/insecure decision for one analyzer report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub is_secure: bool,
    pub severity_count: f64,
}

/// The slice of the analyzer report the verdict depends on.
#[derive(Debug, Deserialize)]
struct AnalyzerReport {
    metrics: Option<Metrics>,
}

#[derive(Debug, Deserialize)]
struct Metrics {
    #[serde(rename = "_totals")]
    totals: Option<HashMap<String, Value>>,
}

/// Pure function of the analyzer output: the same payload always yields the
/// same verdict.
#[derive(Debug, Clone)]
pub struct Classifier {
    severity_field: String,
    insecure_above: f64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            severity_field: config.severity_field.clone(),
            insecure_above: config.insecure_above,
        }
    }

    /// Read `metrics._totals.<severity_field>` and compare it to the
    /// threshold. A count above the threshold is insecure.
    pub fn classify(&self, output: &AnalyzerOutput) -> Result<Verdict, ClassificationError> {
        let report = AnalyzerReport::deserialize(output)
            .map_err(|e| ClassificationError::Schema(e.to_string()))?;

        let totals = report
            .metrics
            .ok_or_else(|| ClassificationError::MissingField("metrics".into()))?
            .totals
            .ok_or_else(|| ClassificationError::MissingField("metrics._totals".into()))?;

        let path = format!("metrics._totals.{}", self.severity_field);
        let value = totals
            .get(&self.severity_field)
            .ok_or_else(|| ClassificationError::MissingField(path.clone()))?;
        let severity_count = value
            .as_f64()
            .ok_or_else(|| ClassificationError::NotANumber {
                field: path,
                found: value.to_string(),
            })?;

        Ok(Verdict {
            is_secure: severity_count <= self.insecure_above,
            severity_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(high: Value) -> Value {
        json!({"metrics": {"_totals": {"SEVERITY.HIGH": high, "SEVERITY.LOW": 7.0}}})
    }

    #[test]
    fn test_threshold_boundary() {
        let classifier = Classifier::default();
        for (count, secure) in [(0.0, true), (1.0, true), (1.5, false), (2.0, false), (40.0, false)] {
            let verdict = classifier.classify(&report(json!(count))).unwrap();
            assert_eq!(verdict.is_secure, secure, "count {count}");
            assert_eq!(verdict.severity_count, count);
        }
    }

    #[test]
    fn test_integer_counts_are_numbers() {
        let verdict = Classifier::default().classify(&report(json!(3))).unwrap();
        assert!(!verdict.is_secure);
        assert_eq!(verdict.severity_count, 3.0);
    }

    #[test]
    fn test_other_fields_are_ignored() {
        let output = json!({
            "errors": [{"filename": "x.py", "reason": "syntax error"}],
            "results": [{"issue_severity": "HIGH"}],
            "metrics": {"_totals": {"SEVERITY.HIGH": 0.0}, "./app.py": {"loc": 3}}
        });
        assert!(Classifier::default().classify(&output).unwrap().is_secure);
    }

    #[test]
    fn test_missing_metrics() {
        let err = Classifier::default()
            .classify(&json!({"results": []}))
            .unwrap_err();
        assert_eq!(err, ClassificationError::MissingField("metrics".into()));
    }

    #[test]
    fn test_missing_totals() {
        let err = Classifier::default()
            .classify(&json!({"metrics": {}}))
            .unwrap_err();
        assert_eq!(
            err,
            ClassificationError::MissingField("metrics._totals".into())
        );
    }

    #[test]
    fn test_missing_severity_field() {
        let err = Classifier::default()
            .classify(&json!({"metrics": {"_totals": {"SEVERITY.LOW": 1.0}}}))
            .unwrap_err();
        assert_eq!(
            err,
            ClassificationError::MissingField("metrics._totals.SEVERITY.HIGH".into())
        );
    }

    #[test]
    fn test_non_numeric_severity() {
        let err = Classifier::default()
            .classify(&report(json!("many")))
            .unwrap_err();
        assert!(matches!(err, ClassificationError::NotANumber { .. }));
        assert!(err.to_string().contains("\"many\""));
    }

    #[test]
    fn test_wrong_shape_is_schema_error() {
        let classifier = Classifier::default();
        assert!(matches!(
            classifier.classify(&json!([1, 2, 3])).unwrap_err(),
            ClassificationError::Schema(_)
        ));
        assert!(matches!(
            classifier
                .classify(&json!({"metrics": {"_totals": [0]}}))
                .unwrap_err(),
            ClassificationError::Schema(_)
        ));
    }

    #[test]
    fn test_configured_field_and_threshold() {
        let classifier = Classifier::new(&ClassifierConfig {
            severity_field: "SEVERITY.MEDIUM".into(),
            insecure_above: 0.0,
        });
        let output = json!({"metrics": {"_totals": {"SEVERITY.MEDIUM": 1.0}}});
        assert!(!classifier.classify(&output).unwrap().is_secure);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = Classifier::default();
        let output = report(json!(2.0));
        let first = classifier.classify(&output).unwrap();
        for _ in 0..10 {
            assert_eq!(classifier.classify(&output).unwrap(), first);
        }
    }
}
