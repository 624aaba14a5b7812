//! The fast validation tier: pure per-record checks against rules derived
//! from the mapping and (when available) the SHACL shape. No document is
//! built and no graph is parsed, which is what keeps this tier cheap enough
//! to run on every record of a bulk load.

use crate::report::{
    FieldIssue, IssueKind, Severity, ValidationError, ValidationMode, ValidationReport,
};
use lazy_static::lazy_static;
use mapping::{ConfigError, Datatype, MappingConfig, RawRecord, TransformFn, TransformRegistry};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::Value;
use shapes::ShapeDefinition;
use std::sync::Arc;

lazy_static! {
    static ref DATE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    static ref DATETIME: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref INTEGER: Regex = Regex::new(r"^[+-]?\d+$").unwrap();
}

struct FieldCheck {
    /// `slot.term` rendering for issue paths.
    field_path: String,
    source: String,
    required: bool,
    datatype: Datatype,
    /// Local names of `sh:in` members; empty means unconstrained.
    allowed: Vec<String>,
    /// Transform chain applied before enumeration membership is tested.
    transforms: Vec<Arc<TransformFn>>,
}

/// Rule-driven validator over raw records.
pub struct PreBuildValidator {
    checks: Vec<FieldCheck>,
    id_source: String,
}

impl PreBuildValidator {
    /// Rules derived from the mapping alone: required fields and declared
    /// datatypes.
    pub fn from_mapping(
        config: &MappingConfig,
        transforms: &TransformRegistry,
    ) -> Result<PreBuildValidator, ConfigError> {
        Self::build(config, None, transforms)
    }

    /// Rules enriched from the SHACL shape: `sh:minCount` tightens required,
    /// `sh:in` contributes enumerations.
    pub fn from_shape(
        definition: &ShapeDefinition,
        transforms: &TransformRegistry,
    ) -> Result<PreBuildValidator, ConfigError> {
        Self::build(&definition.mapping, Some(definition), transforms)
    }

    fn build(
        config: &MappingConfig,
        definition: Option<&ShapeDefinition>,
        transforms: &TransformRegistry,
    ) -> Result<PreBuildValidator, ConfigError> {
        let mut checks = Vec::new();
        for (slot, plan) in &config.properties {
            let shape_child = definition.and_then(|d| {
                let root = d.shapes.resolve(&config.shape)?;
                let property = root.properties.iter().find(|p| p.name == *slot)?;
                d.shapes.shapes.get(property.node_shape.as_deref()?)
            });
            for (term, rule) in &plan.fields {
                let Some(source) = rule.source.clone() else {
                    continue;
                };
                let target = rule.target.as_deref().unwrap_or(term);
                let shape_property =
                    shape_child.and_then(|child| child.properties.iter().find(|p| p.name == target));
                let required = !rule.is_optional()
                    || shape_property.map(|p| p.required()).unwrap_or(false);
                let allowed = shape_property
                    .map(|p| {
                        p.allowed_values
                            .iter()
                            .map(|v| local_name(v).to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                let chain = rule
                    .transform
                    .names()
                    .iter()
                    .map(|name| transforms.get(name))
                    .collect::<Result<Vec<_>, _>>()?;
                checks.push(FieldCheck {
                    field_path: format!("{slot}.{term}"),
                    source,
                    required,
                    datatype: rule.datatype,
                    allowed,
                    transforms: chain,
                });
            }
        }
        Ok(PreBuildValidator {
            checks,
            id_source: config.id_source.clone(),
        })
    }

    /// Validates one record into `report`. Returns the number of errors
    /// added.
    pub fn validate_record(&self, record: &RawRecord, report: &mut ValidationReport) -> usize {
        let before = report.errors;
        let record_id = record
            .get(&self.id_source)
            .and_then(value_text)
            .filter(|s| !s.is_empty());

        if let Some(id) = &record_id {
            if id.bytes().any(|b| b == 0 || b.is_ascii_control()) {
                report.push(FieldIssue {
                    record_id: record_id.clone(),
                    field_path: self.id_source.clone(),
                    severity: Severity::Error,
                    kind: IssueKind::UnsafeIri,
                    message: "identifier contains control characters".to_string(),
                });
            }
        } else {
            report.push(FieldIssue {
                record_id: None,
                field_path: self.id_source.clone(),
                severity: Severity::Error,
                kind: IssueKind::RequiredMissing,
                message: format!(
                    "identifier column '{}' is empty; columns present: {}",
                    self.id_source,
                    columns(record)
                ),
            });
        }

        for check in &self.checks {
            let text = record.get(&check.source).and_then(value_text);
            let text = text.as_deref().map(str::trim).filter(|s| !s.is_empty());

            let Some(text) = text else {
                if check.required {
                    report.push(FieldIssue {
                        record_id: record_id.clone(),
                        field_path: check.field_path.clone(),
                        severity: Severity::Error,
                        kind: IssueKind::RequiredMissing,
                        message: format!(
                            "required source column '{}' is empty; columns present: {}",
                            check.source,
                            columns(record)
                        ),
                    });
                }
                continue;
            };

            if let Some(detail) = implausible(check.datatype, text) {
                report.push(FieldIssue {
                    record_id: record_id.clone(),
                    field_path: check.field_path.clone(),
                    severity: Severity::Error,
                    kind: IssueKind::TypeImplausible,
                    message: format!("'{text}' {detail}"),
                });
                continue;
            }

            if !check.allowed.is_empty() {
                let candidate = check
                    .transforms
                    .iter()
                    .try_fold(text.to_string(), |value, transform| transform(&value));
                match candidate {
                    Ok(candidate) if check.allowed.iter().any(|a| *a == candidate) => {}
                    Ok(candidate) => report.push(FieldIssue {
                        record_id: record_id.clone(),
                        field_path: check.field_path.clone(),
                        severity: Severity::Error,
                        kind: IssueKind::NotInEnumeration,
                        message: format!(
                            "'{candidate}' is not one of: {}",
                            check.allowed.join(", ")
                        ),
                    }),
                    Err(e) => report.push(FieldIssue {
                        record_id: record_id.clone(),
                        field_path: check.field_path.clone(),
                        severity: Severity::Error,
                        kind: IssueKind::TypeImplausible,
                        message: e.to_string(),
                    }),
                }
            }
        }
        report.errors - before
    }

    /// Validates a stream of records under the given mode. `Strict` fails on
    /// the first offending record; `Report` accumulates; `Sample` checks a
    /// seeded fraction.
    pub fn validate<I>(
        &self,
        records: I,
        mode: ValidationMode,
    ) -> Result<ValidationReport, ValidationError>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut report = ValidationReport::new();
        let mut rng = match mode {
            ValidationMode::Sample { seed, .. } => Some(SmallRng::seed_from_u64(seed)),
            _ => None,
        };
        for record in records {
            if let ValidationMode::Sample { rate, .. } = mode {
                let rng = rng.as_mut().expect("sample mode has an rng");
                if !rng.gen_bool(rate.clamp(0.0, 1.0)) {
                    continue;
                }
            }
            let errors = self.validate_record(&record, &mut report);
            if errors > 0 && mode == ValidationMode::Strict {
                return Err(ValidationError { report });
            }
        }
        Ok(report)
    }
}

fn implausible(datatype: Datatype, text: &str) -> Option<&'static str> {
    match datatype {
        Datatype::Date if !DATE.is_match(text) => Some("does not look like YYYY-MM-DD"),
        Datatype::DateTime if !DATETIME.is_match(text) => {
            Some("does not look like YYYY-MM-DDTHH:MM:SS")
        }
        Datatype::Integer if !INTEGER.is_match(text) => Some("is not an integer"),
        Datatype::Decimal
            if text.parse::<f64>().map(|f| !f.is_finite()).unwrap_or(true) =>
        {
            Some("is not a finite decimal")
        }
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Nested structures are the mapper's problem; the fast tier only
        // looks at scalars.
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn columns(record: &RawRecord) -> String {
    record.keys().cloned().collect::<Vec<_>>().join(", ")
}

fn local_name(iri: &str) -> &str {
    iri.rsplit_once('#')
        .or_else(|| iri.rsplit_once('/'))
        .map(|(_, name)| name)
        .unwrap_or(iri)
}
