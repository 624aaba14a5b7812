//! Renders mapped records into JSON-LD documents by walking the mapping
//! plan. No intermediate RDF graph is built; the document is assembled
//! directly, which is what keeps per-record cost in the microsecond range.

use crate::sanitize::{sanitize_iri_component, validate_base_uri, SanitizeError};
use mapping::{
    ConfigError, FieldValue, MappedRecord, MappingConfig, SlotValue, SubShapePayload,
    TransformError, TransformFn, TransformRegistry,
};
use serde_json::{Map, Value};
use shapes::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot build a usable @id: {0}")]
    InvalidIri(#[from] SanitizeError),

    #[error("id transform failed: {0}")]
    IdTransform(#[from] TransformError),

    #[error("field '{0}' holds a structure that cannot be emitted as a JSON-LD value")]
    UnwrappableStructure(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Builds documents for one shape definition. Pure with respect to its
/// configuration snapshot: the same mapped record always yields the same
/// document.
pub struct DocumentBuilder {
    type_: String,
    base_uri: String,
    context_entry: Option<Value>,
    id_transforms: Vec<Arc<TransformFn>>,
    context: Option<Context>,
}

impl DocumentBuilder {
    pub fn new(
        mapping: &MappingConfig,
        context: Option<&Context>,
        transforms: &TransformRegistry,
    ) -> Result<DocumentBuilder, BuildError> {
        validate_base_uri(&mapping.base_uri)?;

        let id_transforms = match &mapping.id_transform {
            Some(name) => vec![transforms.get(name)?],
            None => Vec::new(),
        };

        // A URL context wins over an embedded one; the local file still
        // backs term resolution and validation.
        let context_entry = match (&mapping.context_url, context) {
            (Some(url), _) => Some(Value::String(url.clone())),
            (None, Some(context)) => context.raw().get("@context").cloned(),
            (None, None) => {
                tracing::warn!(
                    shape = %mapping.shape,
                    "no context_url and no context file; documents will omit @context"
                );
                None
            }
        };

        Ok(DocumentBuilder {
            type_: mapping.type_.clone(),
            base_uri: mapping.base_uri.clone(),
            context_entry,
            id_transforms,
            context: context.cloned(),
        })
    }

    /// Renders one document. Sub-shape and field order comes entirely from
    /// the mapped record, which follows mapping declaration order.
    pub fn build(&self, mapped: &MappedRecord) -> Result<Value, BuildError> {
        let mut doc = Map::new();
        if let Some(context) = &self.context_entry {
            doc.insert("@context".to_string(), context.clone());
        }
        doc.insert("@type".to_string(), Value::String(self.type_.clone()));
        doc.insert("@id".to_string(), Value::String(self.build_id(mapped)?));

        for (slot, value) in &mapped.slots {
            match value {
                SlotValue::Single(payload) => {
                    if let Some(object) = self.render_payload(slot, payload)? {
                        doc.insert(slot.clone(), object);
                    }
                }
                SlotValue::Multiple(payloads) => {
                    let mut rendered = Vec::with_capacity(payloads.len());
                    for payload in payloads {
                        if let Some(object) = self.render_payload(slot, payload)? {
                            rendered.push(object);
                        }
                    }
                    match rendered.len() {
                        0 => {}
                        1 if !self.is_set_container(slot) => {
                            doc.insert(slot.clone(), rendered.pop().unwrap());
                        }
                        _ => {
                            doc.insert(slot.clone(), Value::Array(rendered));
                        }
                    }
                }
            }
        }

        Ok(Value::Object(doc))
    }

    fn build_id(&self, mapped: &MappedRecord) -> Result<String, BuildError> {
        let mut id = mapped.id_value.clone();
        for transform in &self.id_transforms {
            id = transform(&id)?;
        }
        let token = sanitize_iri_component(id.trim())?;
        Ok(format!("{}{}", self.base_uri, token))
    }

    fn is_set_container(&self, term: &str) -> bool {
        self.context
            .as_ref()
            .map(|c| c.is_set_container(term))
            .unwrap_or(false)
    }

    /// Renders one sub-shape object, or `None` when no field survives.
    fn render_payload(
        &self,
        slot: &str,
        payload: &SubShapePayload,
    ) -> Result<Option<Value>, BuildError> {
        let mut object = Map::new();
        object.insert("@type".to_string(), Value::String(payload.type_.clone()));
        for (term, field) in &payload.fields {
            if let Some(value) = self.render_field(term, field)? {
                object.insert(term.clone(), value);
            }
        }
        if object.len() == 1 {
            tracing::debug!(slot, "omitting sub-shape with no non-empty fields");
            return Ok(None);
        }
        Ok(Some(Value::Object(object)))
    }

    fn render_field(&self, term: &str, field: &FieldValue) -> Result<Option<Value>, BuildError> {
        match field {
            FieldValue::Scalar(Value::Null) => Ok(None),
            FieldValue::Scalar(Value::Array(_)) | FieldValue::Scalar(Value::Object(_)) => {
                Err(BuildError::UnwrappableStructure(term.to_string()))
            }
            FieldValue::Scalar(value) => Ok(Some(value.clone())),
            FieldValue::Typed { value, datatype } => {
                let mut literal = Map::new();
                literal.insert("@value".to_string(), Value::String(value.clone()));
                literal.insert("@type".to_string(), Value::String((*datatype).to_string()));
                Ok(Some(Value::Object(literal)))
            }
            FieldValue::Iri(iri) => Ok(Some(Value::String(iri.clone()))),
            FieldValue::List(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(value) = self.render_field(term, item)? {
                        rendered.push(value);
                    }
                }
                match rendered.len() {
                    0 => Ok(None),
                    1 if !self.is_set_container(term) => Ok(Some(rendered.pop().unwrap())),
                    _ => Ok(Some(Value::Array(rendered))),
                }
            }
            FieldValue::Nested(payload) => self.render_payload(term, payload),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mapping::{FieldMapper, RawRecord};
    use serde_json::json;

    const PERSON_MAPPING: &str = r#"
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
      MiddleName:
        source: MiddleName
        optional: true
      LastOrSurname:
        source: LastName
      GenerationCodeOrSuffix:
        source: GenerationCodeOrSuffix
        optional: true
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
  hasPersonDemographicRace:
    type: PersonDemographicRace
    fields:
      hasRaceAndEthnicity:
        source: RaceEthnicity
        transform: race_prefix
        multi_value_split: ","
  hasPersonIdentification:
    type: PersonIdentification
    cardinality: multiple
    split_on: "|"
    fields:
      PersonIdentifier:
        source: PersonIdentifiers
      IdentificationSystem:
        source: IdentificationSystems
      PersonIdentifierType:
        source: PersonIdentifierTypes
record_status_defaults:
  type: RecordStatus
  fields:
    RecordStatusType:
      value: Active
data_collection_defaults:
  type: DataCollection
  fields:
    DataCollectionName:
      value: StudentDataSet
"#;

    const PERSON_CONTEXT: &str = r#"{
  "@context": {
    "@vocab": "http://ceds.ed.gov/terms#",
    "cepi": "https://data.example.edu/cepi/",
    "xsd": "http://www.w3.org/2001/XMLSchema#",
    "hasSex": { "@id": "http://ceds.ed.gov/terms#hasSex", "@type": "@id" },
    "hasRaceAndEthnicity": {
      "@id": "http://ceds.ed.gov/terms#hasRaceAndEthnicity",
      "@type": "@id",
      "@container": "@set"
    }
  }
}"#;

    fn context() -> Context {
        Context::from_str("person", PERSON_CONTEXT).expect("parse context")
    }

    fn builder_and_mapper() -> (DocumentBuilder, FieldMapper) {
        let config = mapping::MappingConfig::from_yaml(PERSON_MAPPING).expect("parse mapping");
        let transforms = Arc::new(TransformRegistry::with_builtins());
        let builder = DocumentBuilder::new(&config, Some(&context()), &transforms)
            .expect("construct builder");
        let mapper = FieldMapper::new(config, transforms).expect("construct mapper");
        (builder, mapper)
    }

    fn golden_row() -> RawRecord {
        let mut row = RawRecord::new();
        row.insert("FirstName".into(), json!("EDITH"));
        row.insert("MiddleName".into(), json!("M"));
        row.insert("LastName".into(), json!("ADAMS"));
        row.insert("GenerationCodeOrSuffix".into(), json!("III"));
        row.insert("Birthdate".into(), json!("1965-05-15"));
        row.insert("Sex".into(), json!("Female"));
        row.insert("RaceEthnicity".into(), json!("White,Black"));
        row.insert("PersonIdentifiers".into(), json!("989897099"));
        row.insert("IdentificationSystems".into(), json!("SSN"));
        row.insert("PersonIdentifierTypes".into(), json!("PersonIdentifier"));
        row
    }

    #[test]
    fn golden_person_document() {
        let (builder, mapper) = builder_and_mapper();
        let document = builder.build(&mapper.map(&golden_row()).unwrap()).unwrap();
        assert_eq!(
            document,
            json!({
                "@context": "https://example.org/contexts/person.jsonld",
                "@type": "Person",
                "@id": "cepi:person/989897099",
                "hasPersonName": {
                    "@type": "PersonName",
                    "FirstName": "EDITH",
                    "MiddleName": "M",
                    "LastOrSurname": "ADAMS",
                    "GenerationCodeOrSuffix": "III"
                },
                "hasPersonBirth": {
                    "@type": "PersonBirth",
                    "Birthdate": {"@value": "1965-05-15", "@type": "xsd:date"}
                },
                "hasPersonSexGender": {
                    "@type": "PersonSexGender",
                    "hasSex": "Sex_Female"
                },
                "hasPersonDemographicRace": {
                    "@type": "PersonDemographicRace",
                    "hasRaceAndEthnicity": [
                        "RaceAndEthnicity_White",
                        "RaceAndEthnicity_Black"
                    ]
                },
                "hasPersonIdentification": {
                    "@type": "PersonIdentification",
                    "PersonIdentifier": "989897099",
                    "IdentificationSystem": "SSN",
                    "PersonIdentifierType": "PersonIdentifier"
                },
                "hasRecordStatus": {
                    "@type": "RecordStatus",
                    "RecordStatusType": "Active"
                },
                "hasDataCollection": {
                    "@type": "DataCollection",
                    "DataCollectionName": "StudentDataSet"
                }
            })
        );
    }

    #[test]
    fn output_key_order_follows_the_mapping() {
        let (builder, mapper) = builder_and_mapper();
        let document = builder.build(&mapper.map(&golden_row()).unwrap()).unwrap();
        let text = serde_json::to_string(&document).unwrap();
        let positions: Vec<usize> = [
            "\"@context\"",
            "\"@type\"",
            "\"@id\"",
            "\"hasPersonName\"",
            "\"FirstName\"",
            "\"MiddleName\"",
            "\"LastOrSurname\"",
            "\"hasPersonBirth\"",
            "\"hasPersonSexGender\"",
            "\"hasPersonDemographicRace\"",
            "\"hasPersonIdentification\"",
            "\"hasRecordStatus\"",
            "\"hasDataCollection\"",
        ]
        .iter()
        .map(|needle| text.find(needle).unwrap_or_else(|| panic!("{needle} missing")))
        .collect();
        for window in positions.windows(2) {
            assert!(window[0] < window[1], "key order broken in: {text}");
        }
    }

    #[test]
    fn set_container_keeps_single_element_lists_wrapped() {
        let (builder, mapper) = builder_and_mapper();
        let mut row = golden_row();
        row.insert("RaceEthnicity".into(), json!("White"));
        let document = builder.build(&mapper.map(&row).unwrap()).unwrap();
        assert_eq!(
            document["hasPersonDemographicRace"]["hasRaceAndEthnicity"],
            json!(["RaceAndEthnicity_White"])
        );
    }

    #[test]
    fn hostile_identifier_is_sanitized_into_the_id() {
        let (builder, mapper) = builder_and_mapper();
        let mut row = golden_row();
        row.insert("PersonIdentifiers".into(), json!("../etc/passwd"));
        let document = builder.build(&mapper.map(&row).unwrap()).unwrap();
        let id = document["@id"].as_str().unwrap();
        assert_eq!(id, "cepi:person/..%2Fetc%2Fpasswd");
        assert!(!id.contains("../"));
    }

    #[test]
    fn sixteen_digit_identifier_lands_verbatim_in_the_id() {
        let (builder, mapper) = builder_and_mapper();
        let mut row = golden_row();
        row.insert("PersonIdentifiers".into(), json!("9898970991234567"));
        let document = builder.build(&mapper.map(&row).unwrap()).unwrap();
        assert_eq!(
            document["@id"].as_str().unwrap(),
            "cepi:person/9898970991234567"
        );
    }

    #[test]
    fn slash_only_identifier_is_rejected() {
        let (builder, mapper) = builder_and_mapper();
        let mut row = golden_row();
        row.insert("PersonIdentifiers".into(), json!("///"));
        let mapped = mapper.map(&row).unwrap();
        let err = builder.build(&mapped).unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidIri(SanitizeError::EmptyIriComponent)
        ));
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let (builder, mapper) = builder_and_mapper();
        let mut row = golden_row();
        row.insert("MiddleName".into(), json!(""));
        row.insert("GenerationCodeOrSuffix".into(), Value::Null);
        let document = builder.build(&mapper.map(&row).unwrap()).unwrap();
        let name = document["hasPersonName"].as_object().unwrap();
        assert!(!name.contains_key("MiddleName"));
        assert!(!name.contains_key("GenerationCodeOrSuffix"));
        assert_eq!(name["FirstName"], json!("EDITH"));
    }

    #[test]
    fn bad_base_uri_fails_at_construction() {
        let mut config = mapping::MappingConfig::from_yaml(PERSON_MAPPING).unwrap();
        config.base_uri = "cepi:person".to_string();
        let transforms = Arc::new(TransformRegistry::with_builtins());
        let err = DocumentBuilder::new(&config, None, &transforms).err().unwrap();
        assert!(matches!(
            err,
            BuildError::InvalidIri(SanitizeError::MalformedBaseUri { .. })
        ));
    }
}
