//! SHACL Turtle introspection: parses a constraint graph into a tree of
//! node-shape and property records that the mapper, template generator, and
//! validators all execute against. Only the constraint vocabulary that shape
//! definitions use is interpreted (`sh:property`, `sh:path`, `sh:datatype`,
//! `sh:minCount`, `sh:maxCount`, `sh:in`, `sh:class`, `sh:node`,
//! `sh:closed`, `sh:ignoredProperties`).

use crate::ShapeLoadError;
use oxrdf::{NamedOrBlankNode, Term};
use oxttl::TurtleParser;
use std::collections::BTreeMap;
use std::collections::HashMap;

const SH: &str = "http://www.w3.org/ns/shacl#";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const RDF_FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";
const RDF_REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";
const RDF_NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";

fn sh(local: &str) -> String {
    format!("{SH}{local}")
}

/// One `sh:property` constraint of a node shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    /// Full IRI of `sh:path`.
    pub path: String,
    /// Local name of the path IRI, used as the default mapping term.
    pub name: String,
    /// `sh:datatype` IRI, when constrained.
    pub datatype: Option<String>,
    pub min_count: Option<u32>,
    pub max_count: Option<u32>,
    /// `sh:in` members: named-individual IRIs or literal notations.
    pub allowed_values: Vec<String>,
    /// Name of the referenced node shape (`sh:node`), when nested.
    pub node_shape: Option<String>,
    /// `sh:class` IRI for node-valued properties.
    pub node_class: Option<String>,
}

impl PropertyInfo {
    pub fn required(&self) -> bool {
        self.min_count.map(|n| n >= 1).unwrap_or(false)
    }

    pub fn single_valued(&self) -> bool {
        self.max_count == Some(1)
    }
}

/// A parsed `sh:NodeShape`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeShapeInfo {
    /// Local name of the shape subject.
    pub name: String,
    /// Full IRI of `sh:targetClass`, when present.
    pub target_class: Option<String>,
    pub closed: bool,
    pub ignored_properties: Vec<String>,
    /// Properties in the order they appear in the Turtle source.
    pub properties: Vec<PropertyInfo>,
}

impl NodeShapeInfo {
    /// Local name of the target class, falling back to the shape name with a
    /// trailing `Shape` suffix removed.
    pub fn class_name(&self) -> &str {
        match &self.target_class {
            Some(iri) => local_name(iri),
            None => self.name.strip_suffix("Shape").unwrap_or(&self.name),
        }
    }

    pub fn property(&self, path_iri: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.path == path_iri)
    }
}

/// All node shapes of one SHACL graph, indexed by name. Cross-shape
/// references (`sh:node`) are by name, keeping the tree acyclic and cheap to
/// share.
#[derive(Debug, Clone, Default)]
pub struct ShapeIndex {
    pub shapes: BTreeMap<String, NodeShapeInfo>,
}

impl ShapeIndex {
    /// Resolves a shape by name, accepting the bare class name as well as
    /// the `<Name>Shape` convention.
    pub fn resolve(&self, name: &str) -> Option<&NodeShapeInfo> {
        self.shapes
            .get(name)
            .or_else(|| self.shapes.get(&format!("{name}Shape")))
            .or_else(|| {
                self.shapes
                    .values()
                    .find(|shape| shape.class_name() == name)
            })
    }

    /// Shapes that no other shape references through `sh:node`; these are
    /// document roots.
    pub fn roots(&self) -> Vec<&NodeShapeInfo> {
        let referenced: Vec<&str> = self
            .shapes
            .values()
            .flat_map(|s| s.properties.iter())
            .filter_map(|p| p.node_shape.as_deref())
            .collect();
        self.shapes
            .values()
            .filter(|s| !referenced.contains(&s.name.as_str()))
            .collect()
    }

    /// Child shapes of `shape`, keyed by the local name of the linking
    /// property path.
    pub fn children<'a>(
        &'a self,
        shape: &'a NodeShapeInfo,
    ) -> Vec<(&'a str, &'a NodeShapeInfo)> {
        shape
            .properties
            .iter()
            .filter_map(|p| {
                let child = self.shapes.get(p.node_shape.as_deref()?)?;
                Some((p.name.as_str(), child))
            })
            .collect()
    }
}

/// In-memory triple index for walking a parsed Turtle graph. Per-subject
/// triple order follows source order, which keeps generated mappings stable.
struct TripleStore {
    by_subject: HashMap<String, Vec<(String, Term)>>,
    subjects: Vec<String>,
}

impl TripleStore {
    fn parse(shape: &str, ttl: &str) -> Result<TripleStore, ShapeLoadError> {
        let mut by_subject: HashMap<String, Vec<(String, Term)>> = HashMap::new();
        let mut subjects = Vec::new();
        for result in TurtleParser::new().for_reader(ttl.as_bytes()) {
            let triple = result.map_err(|e| ShapeLoadError::Parse {
                name: shape.to_string(),
                what: "SHACL turtle",
                detail: e.to_string(),
            })?;
            let key = subject_key(&triple.subject);
            let entry = by_subject.entry(key.clone()).or_default();
            if entry.is_empty() {
                subjects.push(key);
            }
            entry.push((triple.predicate.as_str().to_owned(), triple.object));
        }
        Ok(TripleStore {
            by_subject,
            subjects,
        })
    }

    fn objects(&self, subject: &str, predicate: &str) -> Vec<&Term> {
        self.by_subject
            .get(subject)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter(|(p, _)| p == predicate)
                    .map(|(_, o)| o)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn first_object(&self, subject: &str, predicate: &str) -> Option<&Term> {
        self.objects(subject, predicate).into_iter().next()
    }

    fn first_iri(&self, subject: &str, predicate: &str) -> Option<String> {
        self.first_object(subject, predicate).and_then(|t| match t {
            Term::NamedNode(n) => Some(n.as_str().to_owned()),
            _ => None,
        })
    }

    fn first_literal(&self, subject: &str, predicate: &str) -> Option<String> {
        self.first_object(subject, predicate).and_then(|t| match t {
            Term::Literal(l) => Some(l.value().to_owned()),
            _ => None,
        })
    }

    /// Collects an rdf:first/rdf:rest chain.
    fn collect_rdf_list<'a>(&'a self, head: &'a Term) -> Vec<&'a Term> {
        let mut result = Vec::new();
        let mut current = head;
        loop {
            let key = term_key(current);
            if key == RDF_NIL {
                break;
            }
            match self.first_object(&key, RDF_FIRST) {
                Some(first) => result.push(first),
                None => break,
            }
            match self.first_object(&key, RDF_REST) {
                Some(rest) => current = rest,
                None => break,
            }
        }
        result
    }
}

fn subject_key(s: &NamedOrBlankNode) -> String {
    match s {
        NamedOrBlankNode::NamedNode(n) => n.as_str().to_owned(),
        NamedOrBlankNode::BlankNode(b) => format!("_:{}", b.as_str()),
    }
}

#[allow(unreachable_patterns)]
fn term_key(t: &Term) -> String {
    match t {
        Term::NamedNode(n) => n.as_str().to_owned(),
        Term::BlankNode(b) => format!("_:{}", b.as_str()),
        Term::Literal(l) => l.value().to_owned(),
        _ => String::new(),
    }
}

pub(crate) fn local_name(iri: &str) -> &str {
    iri.rsplit_once('#')
        .or_else(|| iri.rsplit_once('/'))
        .map(|(_, name)| name)
        .unwrap_or(iri)
}

/// Parses a SHACL Turtle document into a [`ShapeIndex`].
pub fn parse_shacl(shape: &str, ttl: &str) -> Result<ShapeIndex, ShapeLoadError> {
    let store = TripleStore::parse(shape, ttl)?;
    let node_shape_type = sh("NodeShape");

    // Map subject IRI → shape local name first, so sh:node references can be
    // resolved by name in a single pass.
    let mut shape_names: HashMap<&str, String> = HashMap::new();
    for subject in &store.subjects {
        let is_node_shape = store
            .objects(subject, RDF_TYPE)
            .iter()
            .any(|t| term_key(t) == node_shape_type);
        if is_node_shape {
            shape_names.insert(subject.as_str(), local_name(subject).to_string());
        }
    }
    if shape_names.is_empty() {
        return Err(ShapeLoadError::Parse {
            name: shape.to_string(),
            what: "SHACL turtle",
            detail: "no sh:NodeShape subjects found".to_string(),
        });
    }

    let mut shapes = BTreeMap::new();
    for subject in &store.subjects {
        let Some(name) = shape_names.get(subject.as_str()) else {
            continue;
        };

        let target_class = store.first_iri(subject, &sh("targetClass"));
        let closed = store
            .first_literal(subject, &sh("closed"))
            .map(|v| v == "true")
            .unwrap_or(false);
        let ignored_properties = store
            .first_object(subject, &sh("ignoredProperties"))
            .map(|head| {
                store
                    .collect_rdf_list(head)
                    .into_iter()
                    .map(term_key)
                    .collect()
            })
            .unwrap_or_default();

        let mut properties = Vec::new();
        for prop_node in store.objects(subject, &sh("property")) {
            let key = term_key(prop_node);
            let path = store.first_iri(&key, &sh("path")).ok_or_else(|| {
                ShapeLoadError::Parse {
                    name: shape.to_string(),
                    what: "SHACL turtle",
                    detail: format!("property shape {key} has no sh:path IRI"),
                }
            })?;
            let allowed_values = store
                .first_object(&key, &sh("in"))
                .map(|head| {
                    store
                        .collect_rdf_list(head)
                        .into_iter()
                        .map(term_key)
                        .collect()
                })
                .unwrap_or_default();
            let node_shape = store
                .first_iri(&key, &sh("node"))
                .and_then(|iri| shape_names.get(iri.as_str()).cloned());
            properties.push(PropertyInfo {
                name: local_name(&path).to_string(),
                path,
                datatype: store.first_iri(&key, &sh("datatype")),
                min_count: store
                    .first_literal(&key, &sh("minCount"))
                    .and_then(|v| v.parse().ok()),
                max_count: store
                    .first_literal(&key, &sh("maxCount"))
                    .and_then(|v| v.parse().ok()),
                allowed_values,
                node_shape,
                node_class: store.first_iri(&key, &sh("class")),
            });
        }

        shapes.insert(
            name.clone(),
            NodeShapeInfo {
                name: name.clone(),
                target_class,
                closed,
                ignored_properties,
                properties,
            },
        );
    }

    Ok(ShapeIndex { shapes })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) const PERSON_TTL: &str = r#"
@prefix sh: <http://www.w3.org/ns/shacl#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix ceds: <http://ceds.ed.gov/terms#> .

ceds:PersonShape
  a sh:NodeShape ;
  sh:targetClass ceds:Person ;
  sh:closed true ;
  sh:ignoredProperties ( ceds:extension ) ;
  sh:property [
    sh:path ceds:hasPersonName ;
    sh:node ceds:PersonNameShape ;
    sh:minCount 1 ;
    sh:maxCount 1 ;
  ] ;
  sh:property [
    sh:path ceds:hasPersonBirth ;
    sh:node ceds:PersonBirthShape ;
    sh:maxCount 1 ;
  ] ;
  sh:property [
    sh:path ceds:hasPersonIdentification ;
    sh:node ceds:PersonIdentificationShape ;
  ] .

ceds:PersonNameShape
  a sh:NodeShape ;
  sh:targetClass ceds:PersonName ;
  sh:property [
    sh:path ceds:FirstName ;
    sh:datatype xsd:string ;
    sh:minCount 1 ;
    sh:maxCount 1 ;
  ] ;
  sh:property [
    sh:path ceds:LastOrSurname ;
    sh:datatype xsd:string ;
    sh:minCount 1 ;
    sh:maxCount 1 ;
  ] .

ceds:PersonBirthShape
  a sh:NodeShape ;
  sh:targetClass ceds:PersonBirth ;
  sh:property [
    sh:path ceds:Birthdate ;
    sh:datatype xsd:date ;
    sh:maxCount 1 ;
  ] .

ceds:PersonIdentificationShape
  a sh:NodeShape ;
  sh:targetClass ceds:PersonIdentification ;
  sh:property [
    sh:path ceds:PersonIdentifier ;
    sh:datatype xsd:token ;
    sh:minCount 1 ;
  ] ;
  sh:property [
    sh:path ceds:IdentificationSystem ;
    sh:in ( ceds:IdentificationSystem_SSN ceds:IdentificationSystem_District ) ;
  ] .
"#;

    #[test]
    fn person_shapes_parse_with_ordered_properties() {
        let index = parse_shacl("person", PERSON_TTL).expect("parse shacl");
        assert_eq!(index.shapes.len(), 4);

        let person = index.resolve("Person").expect("resolve Person");
        assert_eq!(person.name, "PersonShape");
        assert_eq!(
            person.target_class.as_deref(),
            Some("http://ceds.ed.gov/terms#Person")
        );
        assert!(person.closed);
        assert_eq!(
            person.ignored_properties,
            vec!["http://ceds.ed.gov/terms#extension".to_string()]
        );

        let paths: Vec<&str> = person.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "hasPersonName",
                "hasPersonBirth",
                "hasPersonIdentification"
            ]
        );

        let name_link = &person.properties[0];
        assert!(name_link.required());
        assert!(name_link.single_valued());
        assert_eq!(name_link.node_shape.as_deref(), Some("PersonNameShape"));

        let ident_link = &person.properties[2];
        assert!(!ident_link.required());
        assert!(!ident_link.single_valued());
    }

    #[test]
    fn enumerations_and_datatypes_are_extracted() {
        let index = parse_shacl("person", PERSON_TTL).expect("parse shacl");
        let ident = index.resolve("PersonIdentification").unwrap();
        let system = ident.property("http://ceds.ed.gov/terms#IdentificationSystem").unwrap();
        assert_eq!(
            system.allowed_values,
            vec![
                "http://ceds.ed.gov/terms#IdentificationSystem_SSN".to_string(),
                "http://ceds.ed.gov/terms#IdentificationSystem_District".to_string(),
            ]
        );
        let birth = index.resolve("PersonBirth").unwrap();
        assert_eq!(
            birth.properties[0].datatype.as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#date")
        );
    }

    #[test]
    fn roots_are_shapes_nothing_references() {
        let index = parse_shacl("person", PERSON_TTL).expect("parse shacl");
        let roots = index.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "PersonShape");

        let person = index.resolve("Person").unwrap();
        let children = index.children(person);
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].0, "hasPersonName");
        assert_eq!(children[0].1.name, "PersonNameShape");
    }

    #[test]
    fn malformed_turtle_is_a_parse_error() {
        let err = parse_shacl("person", "this is not turtle").unwrap_err();
        assert!(matches!(err, ShapeLoadError::Parse { .. }));
    }

    #[test]
    fn graph_without_node_shapes_is_rejected() {
        let ttl = "@prefix ex: <http://example.org/> . ex:a ex:b ex:c .";
        let err = parse_shacl("person", ttl).unwrap_err();
        assert!(matches!(err, ShapeLoadError::Parse { .. }));
    }
}
