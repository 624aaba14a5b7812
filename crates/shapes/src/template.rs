//! Mapping templates and mapping↔shape cross-validation. Template
//! generation walks the shape tree and emits a skeleton mapping with empty
//! sources; validation reports where a hand-written mapping and the SHACL
//! constraints disagree.

use crate::context::Context;
use crate::shacl::{local_name, NodeShapeInfo, PropertyInfo, ShapeIndex};
use crate::{ShapeLoadError, STRUCTURAL_CLASSES};
use indexmap::IndexMap;
use mapping::{Cardinality, Datatype, FieldRule, MappingConfig, SubShapePlan};
use std::fmt;

#[derive(Debug, Default, Clone)]
pub struct TemplateOptions {
    pub context_url: Option<String>,
    pub context_file: Option<String>,
    pub base_uri: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MappingIssueSeverity {
    Error,
    Warning,
}

impl fmt::Display for MappingIssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingIssueSeverity::Error => f.write_str("error"),
            MappingIssueSeverity::Warning => f.write_str("warning"),
        }
    }
}

/// One finding from [`validate_mapping`].
#[derive(Debug, Clone)]
pub struct MappingIssue {
    pub severity: MappingIssueSeverity,
    /// `slot` or `slot.term` the finding points at.
    pub location: String,
    pub message: String,
}

impl MappingIssue {
    fn error(location: impl Into<String>, message: impl Into<String>) -> MappingIssue {
        MappingIssue {
            severity: MappingIssueSeverity::Error,
            location: location.into(),
            message: message.into(),
        }
    }

    fn warning(location: impl Into<String>, message: impl Into<String>) -> MappingIssue {
        MappingIssue {
            severity: MappingIssueSeverity::Warning,
            location: location.into(),
            message: message.into(),
        }
    }
}

fn term_for(property: &PropertyInfo, context: Option<&Context>) -> String {
    context
        .and_then(|c| c.compact(&property.path))
        .unwrap_or_else(|| property.name.clone())
}

fn is_structural(shape: &NodeShapeInfo) -> bool {
    STRUCTURAL_CLASSES.contains(&shape.class_name())
}

/// Maps a `sh:datatype` IRI to the mapping-level datatype used in generated
/// field rules. Plain JSON strings already serialize as `xsd:string`
/// literals, so string-typed properties stay plain.
fn datatype_for(shacl_datatype: Option<&str>) -> Datatype {
    match shacl_datatype.map(local_name) {
        Some("date") => Datatype::Date,
        Some("dateTime") => Datatype::DateTime,
        Some("integer") => Datatype::Integer,
        Some("boolean") => Datatype::Boolean,
        Some("decimal") => Datatype::Decimal,
        _ => Datatype::Plain,
    }
}

fn datatype_compatible(declared: Datatype, shacl_datatype: Option<&str>) -> bool {
    let Some(shacl) = shacl_datatype.map(local_name) else {
        // Unconstrained or IRI-valued property: anything goes.
        return true;
    };
    matches!(
        (shacl, declared),
        ("string", Datatype::Plain | Datatype::String | Datatype::Token)
            | ("token", Datatype::Plain | Datatype::String | Datatype::Token)
            | ("anyURI", Datatype::Plain | Datatype::AnyUri)
            | ("date", Datatype::Date)
            | ("dateTime", Datatype::DateTime)
            | ("integer", Datatype::Integer)
            | ("boolean", Datatype::Boolean)
            | ("decimal", Datatype::Decimal)
    )
}

/// Generates a skeleton mapping for `root`: one sub-shape slot per nested
/// property, one empty-sourced field rule per scalar property. Structural
/// sub-shapes (record status, data collection) are skipped; they are
/// injected through mapping defaults instead.
pub fn generate_mapping(
    index: &ShapeIndex,
    root: &str,
    context: Option<&Context>,
    options: &TemplateOptions,
) -> Result<MappingConfig, ShapeLoadError> {
    let root_shape = index.resolve(root).ok_or_else(|| ShapeLoadError::Invalid {
        name: root.to_string(),
        detail: format!(
            "no node shape named '{root}'; shapes present: {}",
            index.shapes.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
    })?;

    let mut properties = IndexMap::new();
    for property in &root_shape.properties {
        let Some(child) = property.node_shape.as_deref().and_then(|n| index.shapes.get(n))
        else {
            tracing::warn!(
                shape = %root_shape.name,
                path = %property.path,
                "skipping scalar property at document root; mappings only emit sub-shapes"
            );
            continue;
        };
        if is_structural(child) {
            continue;
        }

        let mut fields = IndexMap::new();
        for child_property in &child.properties {
            if child_property.node_shape.is_some() {
                tracing::warn!(
                    shape = %child.name,
                    path = %child_property.path,
                    "skipping doubly-nested sub-shape in template"
                );
                continue;
            }
            fields.insert(
                term_for(child_property, context),
                FieldRule {
                    source: Some(String::new()),
                    datatype: datatype_for(child_property.datatype.as_deref()),
                    optional: !child_property.required(),
                    ..Default::default()
                },
            );
        }

        properties.insert(
            term_for(property, context),
            SubShapePlan {
                type_: child.class_name().to_string(),
                cardinality: if property.single_valued() {
                    Cardinality::Single
                } else {
                    Cardinality::Multiple
                },
                fields,
                ..Default::default()
            },
        );
    }

    Ok(MappingConfig {
        shape: root_shape.class_name().to_string(),
        type_: root_shape.class_name().to_string(),
        context_url: options.context_url.clone(),
        context_file: options.context_file.clone(),
        base_uri: options.base_uri.clone().unwrap_or_default(),
        id_source: String::new(),
        properties,
        ..Default::default()
    })
}

fn find_property<'a>(
    shape: &'a NodeShapeInfo,
    term: &str,
    context: Option<&Context>,
) -> Option<&'a PropertyInfo> {
    shape.properties.iter().find(|p| {
        p.name == term
            || context
                .and_then(|c| c.expand(term))
                .map(|iri| iri == p.path)
                .unwrap_or(false)
    })
}

/// Cross-validates a mapping against a shape. Errors: required properties
/// with no rule, rule targets the shape doesn't define. Warnings: unused
/// optional properties, datatype disagreements, cardinality disagreements.
pub fn validate_mapping(
    config: &MappingConfig,
    index: &ShapeIndex,
    context: Option<&Context>,
) -> Vec<MappingIssue> {
    let mut issues = Vec::new();
    let Some(root) = index.resolve(&config.shape) else {
        issues.push(MappingIssue::error(
            config.shape.clone(),
            format!(
                "mapping targets shape '{}' but the SHACL graph defines: {}",
                config.shape,
                index.shapes.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        ));
        return issues;
    };

    for (slot, plan) in &config.properties {
        let Some(property) = find_property(root, slot, context) else {
            let known: Vec<&str> = root.properties.iter().map(|p| p.name.as_str()).collect();
            issues.push(MappingIssue::error(
                slot.clone(),
                format!(
                    "'{slot}' is not a property of shape '{}'; defined properties: {}",
                    root.name,
                    known.join(", ")
                ),
            ));
            continue;
        };

        if plan.cardinality == Cardinality::Multiple && property.single_valued() {
            issues.push(MappingIssue::warning(
                slot.clone(),
                format!("'{slot}' is declared multiple but the shape caps it at one value"),
            ));
        }

        let Some(child) = property.node_shape.as_deref().and_then(|n| index.shapes.get(n))
        else {
            continue;
        };

        for (term, rule) in &plan.fields {
            let target = rule.target.as_deref().unwrap_or(term);
            let Some(child_property) = find_property(child, target, context) else {
                let known: Vec<&str> =
                    child.properties.iter().map(|p| p.name.as_str()).collect();
                issues.push(MappingIssue::error(
                    format!("{slot}.{term}"),
                    format!(
                        "'{target}' is not a property of sub-shape '{}'; defined properties: {}",
                        child.name,
                        known.join(", ")
                    ),
                ));
                continue;
            };
            if !datatype_compatible(rule.datatype, child_property.datatype.as_deref()) {
                issues.push(MappingIssue::warning(
                    format!("{slot}.{term}"),
                    format!(
                        "mapping declares {} but the shape constrains '{}' to {}",
                        rule.datatype,
                        target,
                        child_property
                            .datatype
                            .as_deref()
                            .map(local_name)
                            .unwrap_or("unconstrained"),
                    ),
                ));
            }
        }

        for child_property in &child.properties {
            let covered = plan.fields.iter().any(|(term, rule)| {
                let target = rule.target.as_deref().unwrap_or(term);
                find_property(child, target, context)
                    .map(|p| p.path == child_property.path)
                    .unwrap_or(false)
            });
            if covered || child_property.node_shape.is_some() {
                continue;
            }
            if child_property.required() {
                issues.push(MappingIssue::error(
                    format!("{}.{}", slot, child_property.name),
                    format!(
                        "required property '{}' of sub-shape '{}' has no field rule",
                        child_property.name, child.name
                    ),
                ));
            } else {
                issues.push(MappingIssue::warning(
                    format!("{}.{}", slot, child_property.name),
                    format!(
                        "optional property '{}' of sub-shape '{}' is not mapped",
                        child_property.name, child.name
                    ),
                ));
            }
        }
    }

    for property in &root.properties {
        let covered = config
            .properties
            .keys()
            .any(|slot| find_property(root, slot, context).map(|p| p.path == property.path).unwrap_or(false));
        if covered {
            continue;
        }
        let child = property.node_shape.as_deref().and_then(|n| index.shapes.get(n));
        let structural = child.map(is_structural).unwrap_or(false);
        if structural {
            let satisfied = config.record_status_defaults.is_some()
                || config.data_collection_defaults.is_some();
            if property.required() && !satisfied {
                issues.push(MappingIssue::error(
                    property.name.clone(),
                    format!(
                        "structural property '{}' is required but no mapping defaults are configured",
                        property.name
                    ),
                ));
            }
            continue;
        }
        if property.required() {
            issues.push(MappingIssue::error(
                property.name.clone(),
                format!(
                    "required property '{}' of shape '{}' has no sub-shape slot",
                    property.name, root.name
                ),
            ));
        } else {
            issues.push(MappingIssue::warning(
                property.name.clone(),
                format!("optional property '{}' is not mapped", property.name),
            ));
        }
    }

    issues
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::shacl::parse_shacl;
    use crate::shacl::test::PERSON_TTL;

    fn index() -> ShapeIndex {
        parse_shacl("person", PERSON_TTL).expect("parse shacl")
    }

    #[test]
    fn template_walks_the_shape_tree() {
        let options = TemplateOptions {
            base_uri: Some("cepi:person/".to_string()),
            ..Default::default()
        };
        let template = generate_mapping(&index(), "Person", None, &options).expect("template");

        assert_eq!(template.shape, "Person");
        assert_eq!(template.type_, "Person");
        assert_eq!(template.base_uri, "cepi:person/");
        let slots: Vec<&String> = template.properties.keys().collect();
        assert_eq!(
            slots,
            vec![
                "hasPersonName",
                "hasPersonBirth",
                "hasPersonIdentification"
            ]
        );

        let name = &template.properties["hasPersonName"];
        assert_eq!(name.type_, "PersonName");
        assert_eq!(name.cardinality, Cardinality::Single);
        assert_eq!(name.fields["FirstName"].source.as_deref(), Some(""));
        assert!(!name.fields["FirstName"].optional);

        let idents = &template.properties["hasPersonIdentification"];
        assert_eq!(idents.cardinality, Cardinality::Multiple);

        let birth = &template.properties["hasPersonBirth"];
        assert_eq!(birth.fields["Birthdate"].datatype, Datatype::Date);
        assert!(birth.fields["Birthdate"].optional);
    }

    #[test]
    fn unknown_root_lists_available_shapes() {
        let err = generate_mapping(&index(), "Staff", None, &Default::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("PersonShape"), "message: {message}");
    }

    fn valid_mapping() -> MappingConfig {
        MappingConfig::from_yaml(
            r#"
shape: Person
type: Person
base_uri: "cepi:person/"
id_source: PersonIdentifiers
properties:
  hasPersonName:
    type: PersonName
    fields:
      FirstName:
        source: FirstName
      LastOrSurname:
        source: LastName
  hasPersonBirth:
    type: PersonBirth
    fields:
      Birthdate:
        source: Birthdate
        datatype: xsd:date
  hasPersonIdentification:
    type: PersonIdentification
    cardinality: multiple
    fields:
      PersonIdentifier:
        source: PersonIdentifiers
        datatype: xsd:token
      IdentificationSystem:
        source: IdentificationSystems
        optional: true
"#,
        )
        .expect("parse mapping")
    }

    #[test]
    fn valid_mapping_produces_no_errors() {
        let issues = validate_mapping(&valid_mapping(), &index(), None);
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == MappingIssueSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let mut config = valid_mapping();
        config
            .properties
            .get_mut("hasPersonName")
            .unwrap()
            .fields
            .shift_remove("LastOrSurname");
        let issues = validate_mapping(&config, &index(), None);
        assert!(issues.iter().any(|i| {
            i.severity == MappingIssueSeverity::Error && i.location == "hasPersonName.LastOrSurname"
        }));
    }

    #[test]
    fn unknown_target_is_an_error_naming_alternatives() {
        let mut config = valid_mapping();
        config.properties.get_mut("hasPersonName").unwrap().fields.insert(
            "Nickname".to_string(),
            FieldRule {
                source: Some("Nickname".to_string()),
                ..Default::default()
            },
        );
        let issues = validate_mapping(&config, &index(), None);
        let issue = issues
            .iter()
            .find(|i| i.location == "hasPersonName.Nickname")
            .expect("issue for unknown target");
        assert_eq!(issue.severity, MappingIssueSeverity::Error);
        assert!(issue.message.contains("FirstName"), "{}", issue.message);
    }

    #[test]
    fn datatype_disagreement_is_a_warning() {
        let mut config = valid_mapping();
        config
            .properties
            .get_mut("hasPersonBirth")
            .unwrap()
            .fields
            .get_mut("Birthdate")
            .unwrap()
            .datatype = Datatype::Integer;
        let issues = validate_mapping(&config, &index(), None);
        let issue = issues
            .iter()
            .find(|i| i.location == "hasPersonBirth.Birthdate")
            .expect("datatype issue");
        assert_eq!(issue.severity, MappingIssueSeverity::Warning);
    }
}
