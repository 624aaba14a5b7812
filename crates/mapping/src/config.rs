//! The declarative mapping plan: which source columns feed which target
//! terms, how values are transformed, and how sub-shapes are assembled.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read mapping config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse mapping config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(
        "field rule '{0}' must use exactly one of 'source', 'value', or 'value_id' as its value origin"
    )]
    AmbiguousValueOrigin(String),

    #[error("field rule '{0}' has no value origin: set 'source', 'value', or 'value_id'")]
    MissingValueOrigin(String),

    #[error("transform '{name}' is not registered; available transforms: {available}")]
    UnknownTransform { name: String, available: String },

    #[error("'{0}' is a built-in transform and cannot be redefined")]
    DuplicateTransform(String),

    #[error("transforms can no longer be registered: a pipeline has already started")]
    RegistrySealed,

    #[error("override references unknown slot or field '{0}'")]
    UnknownOverrideTarget(String),
}

/// How many sub-shape objects a slot may produce from one raw record.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    Multiple,
}

/// Target datatype of a mapped field. Anything other than `plain` is emitted
/// as a JSON-LD typed literal.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Datatype {
    #[default]
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "xsd:string")]
    String,
    #[serde(rename = "xsd:date")]
    Date,
    #[serde(rename = "xsd:dateTime")]
    DateTime,
    #[serde(rename = "xsd:integer")]
    Integer,
    #[serde(rename = "xsd:token")]
    Token,
    #[serde(rename = "xsd:boolean")]
    Boolean,
    #[serde(rename = "xsd:decimal")]
    Decimal,
    #[serde(rename = "xsd:anyURI")]
    AnyUri,
}

impl Datatype {
    /// The compact `xsd:` form used in `@type` keys of typed literals, or
    /// `None` for plain values.
    pub fn compact(&self) -> Option<&'static str> {
        match self {
            Datatype::Plain => None,
            Datatype::String => Some("xsd:string"),
            Datatype::Date => Some("xsd:date"),
            Datatype::DateTime => Some("xsd:dateTime"),
            Datatype::Integer => Some("xsd:integer"),
            Datatype::Token => Some("xsd:token"),
            Datatype::Boolean => Some("xsd:boolean"),
            Datatype::Decimal => Some("xsd:decimal"),
            Datatype::AnyUri => Some("xsd:anyURI"),
        }
    }

    /// The full XML Schema IRI for this datatype, or `None` for plain values.
    pub fn xsd_iri(&self) -> Option<String> {
        self.compact()
            .map(|c| format!("http://www.w3.org/2001/XMLSchema#{}", &c[4..]))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.compact().unwrap_or("plain"))
    }
}

/// One transform name, a chain of them, or none. YAML accepts either a bare
/// string or a list of strings.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformSpec {
    #[default]
    None,
    One(String),
    Chain(Vec<String>),
}

impl TransformSpec {
    pub fn names(&self) -> &[String] {
        match self {
            TransformSpec::None => &[],
            TransformSpec::One(name) => std::slice::from_ref(name),
            TransformSpec::Chain(names) => names,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TransformSpec::None)
    }
}

/// A single column-to-term rule. Exactly one of `source`, `value`, or
/// `value_id` originates the value.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Source column the value is read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Target term override. Defaults to the key this rule is stored under
    /// in the `fields` map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "is_plain")]
    pub datatype: Datatype,

    #[serde(default, skip_serializing_if = "TransformSpec::is_none")]
    pub transform: TransformSpec,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,

    /// Inner delimiter: a single source cell yields a list of scalars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_value_split: Option<String>,

    /// Literal default emitted when the rule has no `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Literal IRI default emitted when the rule has no `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

fn is_plain(d: &Datatype) -> bool {
    matches!(d, Datatype::Plain)
}

impl FieldRule {
    /// A rule carrying a literal default always emits; `optional` only
    /// matters for source-backed rules.
    pub fn is_optional(&self) -> bool {
        self.optional && self.value.is_none() && self.value_id.is_none()
    }

    fn check_origin(&self, name: &str) -> Result<(), ConfigError> {
        let origins = [
            self.source.is_some(),
            self.value.is_some(),
            self.value_id.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        match origins {
            0 => Err(ConfigError::MissingValueOrigin(name.to_string())),
            1 => Ok(()),
            _ => Err(ConfigError::AmbiguousValueOrigin(name.to_string())),
        }
    }
}

/// Plan for one nested sub-shape slot of the output document.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubShapePlan {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub cardinality: Cardinality,

    /// Outer delimiter: splits contributing source cells into equal-length
    /// groups, one sub-shape object per group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_on: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_record_status: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_data_collection: bool,

    /// Target term → rule, in declaration order. Order is preserved all the
    /// way into the emitted document.
    #[serde(default)]
    pub fields: IndexMap<String, FieldRule>,
}

/// The root mapping document, parsed from YAML.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Target node-shape name within the SHACL graph.
    pub shape: String,

    /// JSON-LD `@type` of the root document.
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_file: Option<String>,

    /// Prefix of every emitted `@id`. Must end with `/` or `#`.
    pub base_uri: String,

    /// Source column holding the record identifier.
    pub id_source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_transform: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, SubShapePlan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_status_defaults: Option<SubShapePlan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_collection_defaults: Option<SubShapePlan>,
}

impl MappingConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<MappingConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        MappingConfig::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<MappingConfig, ConfigError> {
        let config: MappingConfig = serde_yaml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Structural checks that don't require a shape or a transform registry:
    /// every rule has exactly one value origin.
    pub fn check(&self) -> Result<(), ConfigError> {
        for (slot, plan) in self
            .properties
            .iter()
            .map(|(name, plan)| (name.as_str(), plan))
            .chain(
                self.record_status_defaults
                    .iter()
                    .map(|plan| (crate::RECORD_STATUS_SLOT, plan)),
            )
            .chain(
                self.data_collection_defaults
                    .iter()
                    .map(|plan| (crate::DATA_COLLECTION_SLOT, plan)),
            )
        {
            for (term, rule) in plan.fields.iter() {
                rule.check_origin(&format!("{slot}.{term}"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PERSON_YAML: &str = r#"
shape: Person
type: Person
context_url: https://example.org/contexts/person.jsonld
base_uri: "cepi:person/"
id_source: PersonIdentifiers
id_transform: first_pipe_split
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
    split_on: "|"
    fields:
      PersonIdentifier:
        source: PersonIdentifiers
      IdentificationSystem:
        source: IdentificationSystems
        transform: [first_pipe_split]
record_status_defaults:
  type: RecordStatus
  fields:
    RecordStatusType:
      value: Active
"#;

    #[test]
    fn person_mapping_is_deserialized_in_order() {
        let config = MappingConfig::from_yaml(PERSON_YAML).expect("parse mapping");
        assert_eq!(config.shape, "Person");
        assert_eq!(config.type_, "Person");
        assert_eq!(config.base_uri, "cepi:person/");
        let slots: Vec<&String> = config.properties.keys().collect();
        assert_eq!(
            slots,
            vec!["hasPersonName", "hasPersonBirth", "hasPersonIdentification"]
        );

        let name = &config.properties["hasPersonName"];
        assert_eq!(name.cardinality, Cardinality::Single);
        let fields: Vec<&String> = name.fields.keys().collect();
        assert_eq!(fields, vec!["FirstName", "LastOrSurname"]);

        let ident = &config.properties["hasPersonIdentification"];
        assert_eq!(ident.cardinality, Cardinality::Multiple);
        assert_eq!(ident.split_on.as_deref(), Some("|"));
        assert_eq!(
            ident.fields["IdentificationSystem"].transform.names(),
            &["first_pipe_split".to_string()]
        );

        let birth = &config.properties["hasPersonBirth"];
        assert_eq!(birth.fields["Birthdate"].datatype, Datatype::Date);
    }

    #[test]
    fn ambiguous_value_origin_is_rejected() {
        let yaml = r#"
shape: Person
type: Person
base_uri: "cepi:person/"
id_source: Id
properties:
  hasThing:
    type: Thing
    fields:
      Both:
        source: Column
        value: literal
"#;
        let err = MappingConfig::from_yaml(yaml).unwrap_err();
        assert!(
            matches!(err, ConfigError::AmbiguousValueOrigin(ref name) if name == "hasThing.Both"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn missing_value_origin_is_rejected() {
        let yaml = r#"
shape: Person
type: Person
base_uri: "cepi:person/"
id_source: Id
properties:
  hasThing:
    type: Thing
    fields:
      Neither:
        optional: true
"#;
        let err = MappingConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValueOrigin(_)));
    }

    #[test]
    fn datatype_round_trips_through_serde() {
        for (text, datatype) in [
            ("xsd:date", Datatype::Date),
            ("xsd:dateTime", Datatype::DateTime),
            ("xsd:integer", Datatype::Integer),
            ("xsd:anyURI", Datatype::AnyUri),
            ("plain", Datatype::Plain),
        ] {
            let parsed: Datatype =
                serde_yaml::from_str(text).unwrap_or_else(|_| panic!("parse {text}"));
            assert_eq!(parsed, datatype);
        }
        assert_eq!(
            Datatype::Date.xsd_iri().as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#date")
        );
    }

    #[test]
    fn value_rules_are_never_optional() {
        let rule = FieldRule {
            value: Some("Active".to_string()),
            optional: true,
            ..Default::default()
        };
        assert!(!rule.is_optional());
    }
}
