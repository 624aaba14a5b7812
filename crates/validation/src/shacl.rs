//! The expensive validation tier: a document is serialized, reparsed, and
//! expanded into RDF triples through its JSON-LD context, then the triples
//! are checked against the SHACL shape tree. Violations come back as field
//! issues whose paths are compacted through the context (IRI → term) so
//! they read like the mapping, not like raw IRIs.

use crate::report::{
    FieldIssue, IssueKind, Severity, ValidationError, ValidationMode, ValidationReport,
};
use oxrdf::vocab::{rdf, xsd};
use oxrdf::{BlankNode, Graph, Literal, NamedNode, NamedOrBlankNode, Term, TermRef};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use shapes::{Context, NodeShapeInfo, ShapeDefinition, ShapeIndex};

/// Full-SHACL validator for built documents.
pub struct ShaclValidator {
    index: ShapeIndex,
    context: Context,
    root: String,
}

impl ShaclValidator {
    pub fn new(definition: &ShapeDefinition) -> ShaclValidator {
        ShaclValidator {
            index: definition.shapes.clone(),
            context: definition.context.clone(),
            root: definition.mapping.shape.clone(),
        }
    }

    pub fn from_parts(index: ShapeIndex, context: Context, root: impl Into<String>) -> ShaclValidator {
        ShaclValidator {
            index,
            context,
            root: root.into(),
        }
    }

    /// Validates documents under the given mode. `Sample` is the intended
    /// default for bulk workloads; per-document cost here is orders of
    /// magnitude above the pre-build tier.
    pub fn validate<I>(
        &self,
        documents: I,
        mode: ValidationMode,
    ) -> Result<ValidationReport, ValidationError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut report = ValidationReport::new();
        let mut rng = match mode {
            ValidationMode::Sample { seed, .. } => Some(SmallRng::seed_from_u64(seed)),
            _ => None,
        };
        for document in documents {
            if let ValidationMode::Sample { rate, .. } = mode {
                let rng = rng.as_mut().expect("sample mode has an rng");
                if !rng.gen_bool(rate.clamp(0.0, 1.0)) {
                    continue;
                }
            }
            let errors = self.validate_document(&document, &mut report);
            if errors > 0 && mode == ValidationMode::Strict {
                return Err(ValidationError { report });
            }
        }
        Ok(report)
    }

    /// Round-trips one document through bytes and RDF, then checks the shape
    /// constraints. Returns the number of errors added to `report`.
    pub fn validate_document(&self, document: &Value, report: &mut ValidationReport) -> usize {
        let before = report.errors;
        let record_id = document
            .get("@id")
            .and_then(Value::as_str)
            .map(String::from);

        // Serialize → reparse: validate what a consumer would read, not the
        // in-memory value we happen to hold.
        let reparsed = document::to_bytes(document)
            .map_err(|e| e.to_string())
            .and_then(|bytes| document::from_bytes(&bytes).map_err(|e| e.to_string()));
        let reparsed = match reparsed {
            Ok(value) => value,
            Err(detail) => {
                report.push(FieldIssue {
                    record_id,
                    field_path: "@id".to_string(),
                    severity: Severity::Error,
                    kind: IssueKind::ShaclViolation,
                    message: format!("document does not round-trip: {detail}"),
                });
                return report.errors - before;
            }
        };

        let mut graph = Graph::default();
        let root_node = match self.document_to_graph(&mut graph, &reparsed) {
            Ok(node) => node,
            Err(detail) => {
                report.push(FieldIssue {
                    record_id,
                    field_path: "@id".to_string(),
                    severity: Severity::Error,
                    kind: IssueKind::ShaclViolation,
                    message: detail,
                });
                return report.errors - before;
            }
        };

        let Some(shape) = self.index.resolve(&self.root) else {
            report.push(FieldIssue {
                record_id,
                field_path: self.root.clone(),
                severity: Severity::Error,
                kind: IssueKind::ShaclViolation,
                message: format!("no node shape named '{}'", self.root),
            });
            return report.errors - before;
        };

        self.check_node(&graph, &root_node, shape, &record_id, "", report);
        report.errors - before
    }

    fn expand(&self, name: &str) -> Result<NamedNode, String> {
        let iri = self
            .context
            .expand(name)
            .ok_or_else(|| format!("'{name}' cannot be expanded through the context"))?;
        NamedNode::new(iri.clone()).map_err(|_| format!("'{iri}' is not a valid IRI"))
    }

    fn field_path(&self, prefix: &str, path_iri: &str) -> String {
        let term = self
            .context
            .compact(path_iri)
            .unwrap_or_else(|| local_name(path_iri).to_string());
        if prefix.is_empty() {
            term
        } else {
            format!("{prefix}.{term}")
        }
    }

    fn document_to_graph(
        &self,
        graph: &mut Graph,
        document: &Value,
    ) -> Result<NamedOrBlankNode, String> {
        let object = document
            .as_object()
            .ok_or_else(|| "document is not a JSON object".to_string())?;
        let id = object
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| "document has no @id".to_string())?;
        let subject = NamedOrBlankNode::NamedNode(self.expand(id)?);
        self.object_to_graph(graph, subject.clone(), object)?;
        Ok(subject)
    }

    fn object_to_graph(
        &self,
        graph: &mut Graph,
        subject: NamedOrBlankNode,
        object: &serde_json::Map<String, Value>,
    ) -> Result<(), String> {
        for (key, value) in object {
            match key.as_str() {
                "@context" | "@id" => continue,
                "@type" => {
                    let class = value
                        .as_str()
                        .ok_or_else(|| "@type must be a string".to_string())?;
                    graph.insert(&oxrdf::Triple::new(
                        subject.clone(),
                        rdf::TYPE.into_owned(),
                        Term::NamedNode(self.expand(class)?),
                    ));
                }
                term => {
                    let predicate = self.expand(term)?;
                    self.value_to_graph(graph, &subject, &predicate, term, value)?;
                }
            }
        }
        Ok(())
    }

    fn value_to_graph(
        &self,
        graph: &mut Graph,
        subject: &NamedOrBlankNode,
        predicate: &NamedNode,
        term: &str,
        value: &Value,
    ) -> Result<(), String> {
        let object: Term = match value {
            Value::Null => return Ok(()),
            Value::Array(items) => {
                for item in items {
                    self.value_to_graph(graph, subject, predicate, term, item)?;
                }
                return Ok(());
            }
            Value::Object(map) => {
                if let Some(literal) = map.get("@value").and_then(Value::as_str) {
                    match map.get("@type").and_then(Value::as_str) {
                        Some(datatype) => Term::Literal(Literal::new_typed_literal(
                            literal,
                            self.expand(datatype)?,
                        )),
                        None => Term::Literal(Literal::new_simple_literal(literal)),
                    }
                } else {
                    let child = BlankNode::default();
                    graph.insert(&oxrdf::Triple::new(
                        subject.clone(),
                        predicate.clone(),
                        Term::BlankNode(child.clone()),
                    ));
                    self.object_to_graph(graph, NamedOrBlankNode::BlankNode(child), map)?;
                    return Ok(());
                }
            }
            Value::String(text) => {
                if self.context.is_id_term(term) {
                    Term::NamedNode(self.expand(text)?)
                } else {
                    Term::Literal(Literal::new_simple_literal(text))
                }
            }
            Value::Number(number) => {
                let datatype = if number.is_i64() || number.is_u64() {
                    xsd::INTEGER
                } else {
                    xsd::DOUBLE
                };
                Term::Literal(Literal::new_typed_literal(number.to_string(), datatype))
            }
            Value::Bool(flag) => {
                Term::Literal(Literal::new_typed_literal(flag.to_string(), xsd::BOOLEAN))
            }
        };
        graph.insert(&oxrdf::Triple::new(
            subject.clone(),
            predicate.clone(),
            object,
        ));
        Ok(())
    }

    fn check_node(
        &self,
        graph: &Graph,
        node: &NamedOrBlankNode,
        shape: &NodeShapeInfo,
        record_id: &Option<String>,
        prefix: &str,
        report: &mut ValidationReport,
    ) {
        for property in &shape.properties {
            let Ok(predicate) = NamedNode::new(property.path.clone()) else {
                continue;
            };
            let objects: Vec<Term> = graph
                .objects_for_subject_predicate(node.as_ref(), predicate.as_ref())
                .map(|t| t.into_owned())
                .collect();
            let path = self.field_path(prefix, &property.path);

            if let Some(min) = property.min_count {
                if (objects.len() as u32) < min {
                    violation(report, record_id, path.clone(), format!(
                        "expected at least {min} value(s), found {}",
                        objects.len()
                    ));
                }
            }
            if let Some(max) = property.max_count {
                if objects.len() as u32 > max {
                    violation(report, record_id, path.clone(), format!(
                        "expected at most {max} value(s), found {}",
                        objects.len()
                    ));
                }
            }

            if let Some(expected) = &property.datatype {
                for object in &objects {
                    if let Term::Literal(literal) = object {
                        let actual = literal.datatype();
                        if actual.as_str() != expected {
                            violation(report, record_id, path.clone(), format!(
                                "literal '{}' has datatype {} where {} is required",
                                literal.value(),
                                local_name(actual.as_str()),
                                local_name(expected),
                            ));
                        }
                    }
                }
            }

            if !property.allowed_values.is_empty() {
                for object in &objects {
                    let member = match object {
                        Term::NamedNode(n) => property
                            .allowed_values
                            .iter()
                            .any(|allowed| allowed == n.as_str()),
                        Term::Literal(l) => property
                            .allowed_values
                            .iter()
                            .any(|allowed| allowed == l.value()),
                        _ => false,
                    };
                    if !member {
                        let allowed: Vec<&str> = property
                            .allowed_values
                            .iter()
                            .map(|v| local_name(v))
                            .collect();
                        violation(report, record_id, path.clone(), format!(
                            "value {} is not in the allowed set: {}",
                            display_term(object),
                            allowed.join(", ")
                        ));
                    }
                }
            }

            if let Some(class) = &property.node_class {
                for object in &objects {
                    let subject: Option<NamedOrBlankNode> = match object {
                        Term::NamedNode(n) => Some(n.clone().into()),
                        Term::BlankNode(b) => Some(b.clone().into()),
                        _ => None,
                    };
                    let Some(subject) = subject else {
                        violation(report, record_id, path.clone(), format!(
                            "expected a node of class {}",
                            local_name(class)
                        ));
                        continue;
                    };
                    let typed = graph
                        .objects_for_subject_predicate(subject.as_ref(), rdf::TYPE)
                        .any(|t| matches!(t, TermRef::NamedNode(n) if n.as_str() == class));
                    if !typed {
                        violation(report, record_id, path.clone(), format!(
                            "node is not typed as {}",
                            local_name(class)
                        ));
                    }
                }
            }

            if let Some(child_shape) = property
                .node_shape
                .as_deref()
                .and_then(|name| self.index.shapes.get(name))
            {
                for object in &objects {
                    let child: Option<NamedOrBlankNode> = match object {
                        Term::NamedNode(n) => Some(n.clone().into()),
                        Term::BlankNode(b) => Some(b.clone().into()),
                        _ => None,
                    };
                    if let Some(child) = child {
                        self.check_node(graph, &child, child_shape, record_id, &path, report);
                    }
                }
            }
        }

        if shape.closed {
            for triple in graph.triples_for_subject(node.as_ref()) {
                let predicate = triple.predicate.as_str();
                let allowed = predicate == rdf::TYPE.as_str()
                    || shape.properties.iter().any(|p| p.path == predicate)
                    || shape.ignored_properties.iter().any(|p| p == predicate);
                if !allowed {
                    report.push(FieldIssue {
                        record_id: record_id.clone(),
                        field_path: self.field_path(prefix, predicate),
                        severity: Severity::Error,
                        kind: IssueKind::ShaclViolation,
                        message: format!(
                            "closed shape '{}' does not allow property {}",
                            shape.name,
                            local_name(predicate)
                        ),
                    });
                }
            }
        }
    }
}

fn violation(
    report: &mut ValidationReport,
    record_id: &Option<String>,
    field_path: String,
    message: String,
) {
    report.push(FieldIssue {
        record_id: record_id.clone(),
        field_path,
        severity: Severity::Error,
        kind: IssueKind::ShaclViolation,
        message,
    });
}

fn local_name(iri: &str) -> &str {
    iri.rsplit_once('#')
        .or_else(|| iri.rsplit_once('/'))
        .map(|(_, name)| name)
        .unwrap_or(iri)
}

fn display_term(term: &Term) -> String {
    match term {
        Term::NamedNode(n) => local_name(n.as_str()).to_string(),
        Term::Literal(l) => format!("'{}'", l.value()),
        other => format!("{other}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use document::DocumentBuilder;
    use mapping::{FieldMapper, MappingConfig, RawRecord, TransformRegistry};
    use serde_json::json;
    use std::sync::Arc;

    const TTL: &str = r#"
@prefix sh: <http://www.w3.org/ns/shacl#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix ceds: <http://ceds.ed.gov/terms#> .

ceds:PersonShape
  a sh:NodeShape ;
  sh:targetClass ceds:Person ;
  sh:closed true ;
  sh:property [ sh:path ceds:hasPersonName ; sh:node ceds:PersonNameShape ; sh:minCount 1 ; sh:maxCount 1 ] ;
  sh:property [ sh:path ceds:hasPersonBirth ; sh:node ceds:PersonBirthShape ; sh:maxCount 1 ] ;
  sh:property [ sh:path ceds:hasPersonSexGender ; sh:node ceds:PersonSexGenderShape ; sh:maxCount 1 ] ;
  sh:property [ sh:path ceds:hasRecordStatus ; sh:node ceds:RecordStatusShape ; sh:maxCount 1 ] .

ceds:PersonNameShape
  a sh:NodeShape ;
  sh:targetClass ceds:PersonName ;
  sh:property [ sh:path ceds:FirstName ; sh:datatype xsd:string ; sh:minCount 1 ; sh:maxCount 1 ] ;
  sh:property [ sh:path ceds:LastOrSurname ; sh:datatype xsd:string ; sh:minCount 1 ; sh:maxCount 1 ] .

ceds:PersonBirthShape
  a sh:NodeShape ;
  sh:targetClass ceds:PersonBirth ;
  sh:property [ sh:path ceds:Birthdate ; sh:datatype xsd:date ; sh:maxCount 1 ] .

ceds:PersonSexGenderShape
  a sh:NodeShape ;
  sh:targetClass ceds:PersonSexGender ;
  sh:property [ sh:path ceds:hasSex ; sh:in ( ceds:Sex_Female ceds:Sex_Male ) ] .

ceds:RecordStatusShape
  a sh:NodeShape ;
  sh:targetClass ceds:RecordStatus ;
  sh:property [ sh:path ceds:RecordStatusType ; sh:datatype xsd:string ] .
"#;

    const CONTEXT: &str = r#"{
  "@context": {
    "@vocab": "http://ceds.ed.gov/terms#",
    "cepi": "https://data.example.edu/cepi/",
    "xsd": "http://www.w3.org/2001/XMLSchema#",
    "hasSex": { "@id": "http://ceds.ed.gov/terms#hasSex", "@type": "@id" }
  }
}"#;

    const MAPPING: &str = r#"
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
  hasPersonSexGender:
    type: PersonSexGender
    fields:
      hasSex:
        source: Sex
        transform: sex_prefix
record_status_defaults:
  type: RecordStatus
  fields:
    RecordStatusType:
      value: Active
"#;

    fn validator() -> ShaclValidator {
        let index = shapes::parse_shacl("person", TTL).unwrap();
        let context = Context::from_str("person", CONTEXT).unwrap();
        ShaclValidator::from_parts(index, context, "Person")
    }

    fn golden_document() -> Value {
        let config = MappingConfig::from_yaml(MAPPING).unwrap();
        let context = Context::from_str("person", CONTEXT).unwrap();
        let transforms = Arc::new(TransformRegistry::with_builtins());
        let builder = DocumentBuilder::new(&config, Some(&context), &transforms).unwrap();
        let mapper = FieldMapper::new(config, transforms).unwrap();

        let mut row = RawRecord::new();
        row.insert("PersonIdentifiers".into(), json!("989897099"));
        row.insert("FirstName".into(), json!("EDITH"));
        row.insert("LastName".into(), json!("ADAMS"));
        row.insert("Birthdate".into(), json!("1965-05-15"));
        row.insert("Sex".into(), json!("Female"));
        builder.build(&mapper.map(&row).unwrap()).unwrap()
    }

    #[test]
    fn built_documents_conform_after_the_round_trip() {
        let report = validator()
            .validate(vec![golden_document()], ValidationMode::Report)
            .unwrap();
        assert!(report.conforms(), "issues: {:?}", report.issues);
    }

    #[test]
    fn missing_required_field_is_a_violation_with_a_readable_path() {
        let mut document = golden_document();
        document["hasPersonName"]
            .as_object_mut()
            .unwrap()
            .remove("LastOrSurname");
        let mut report = ValidationReport::new();
        validator().validate_document(&document, &mut report);
        let issue = report
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::ShaclViolation && i.field_path.contains("LastOrSurname"))
            .expect("violation for missing LastOrSurname");
        assert_eq!(issue.field_path, "hasPersonName.LastOrSurname");
        assert_eq!(issue.record_id.as_deref(), Some("cepi:person/989897099"));
    }

    #[test]
    fn wrong_literal_datatype_is_a_violation() {
        let mut document = golden_document();
        document["hasPersonBirth"]["Birthdate"] = json!("1965-05-15");
        let mut report = ValidationReport::new();
        validator().validate_document(&document, &mut report);
        assert!(report
            .issues
            .iter()
            .any(|i| i.field_path == "hasPersonBirth.Birthdate"
                && i.message.contains("date")),);
    }

    #[test]
    fn value_outside_the_enumeration_is_a_violation() {
        let mut document = golden_document();
        document["hasPersonSexGender"]["hasSex"] = json!("Sex_Unknown");
        let mut report = ValidationReport::new();
        validator().validate_document(&document, &mut report);
        let issue = report
            .issues
            .iter()
            .find(|i| i.field_path.contains("hasSex"))
            .expect("enumeration violation");
        assert!(issue.message.contains("Sex_Female"), "{}", issue.message);
    }

    #[test]
    fn unknown_property_on_a_closed_shape_is_a_violation() {
        let mut document = golden_document();
        document
            .as_object_mut()
            .unwrap()
            .insert("hasSomethingElse".to_string(), json!({
                "@type": "Mystery",
                "Field": "value"
            }));
        let mut report = ValidationReport::new();
        validator().validate_document(&document, &mut report);
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("closed") && i.field_path.contains("hasSomethingElse")));
    }

    #[test]
    fn strict_mode_fails_fast_on_the_first_bad_document() {
        let mut bad = golden_document();
        bad["hasPersonName"]
            .as_object_mut()
            .unwrap()
            .remove("FirstName");
        let err = validator()
            .validate(vec![bad, golden_document()], ValidationMode::Strict)
            .unwrap_err();
        assert!(err.report.errors >= 1);
    }
}
