//! Applies a mapping plan to raw tabular records. The plan is compiled once
//! at construction (transform chains pre-bound, origins resolved); mapping a
//! record is a plain traversal with no name lookups in the hot path.

use crate::config::{Cardinality, ConfigError, Datatype, MappingConfig, SubShapePlan};
use crate::transform::{TransformError, TransformFn, TransformRegistry};
use crate::{DATA_COLLECTION_SLOT, RECORD_STATUS_SLOT};
use caseless::Caseless;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// One row of source data: column name → scalar value.
pub type RawRecord = IndexMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error(
        "required field '{target}' is empty; expected source column '{source_column}'; columns present: {available}"
    )]
    RequiredMissing {
        target: String,
        source_column: String,
        available: String,
    },

    #[error(
        "multi-value columns for '{slot}' are ragged: column '{column}' yields {actual} segment(s) where {expected} were expected"
    )]
    RaggedMultiValue {
        slot: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("value '{value}' for field '{target}' cannot be coerced to {datatype}")]
    TypeMismatch {
        target: String,
        datatype: Datatype,
        value: String,
    },

    #[error("column '{column}' holds a nested {kind}; only scalar values are supported")]
    InvalidScalar { column: String, kind: &'static str },

    #[error("record identifier column '{column}' is empty or missing; columns present: {available}")]
    IdEmpty { column: String, available: String },

    #[error("transform failed for field '{target}': {source}")]
    Transform {
        target: String,
        #[source]
        source: TransformError,
    },
}

/// A mapped field value, ready for the JSON-LD builder.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Plain scalar, emitted as-is.
    Scalar(Value),
    /// Typed literal, emitted as `{"@value": ..., "@type": ...}`.
    Typed {
        value: String,
        datatype: &'static str,
    },
    /// IRI reference, emitted as a bare string for `@id`-typed terms.
    Iri(String),
    /// Inner list produced by `multi_value_split`.
    List(Vec<FieldValue>),
    /// Embedded sub-shape (record status / data collection defaults).
    Nested(SubShapePayload),
}

/// One rendered sub-shape: its `@type` and ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SubShapePayload {
    pub type_: String,
    pub fields: IndexMap<String, FieldValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Single(SubShapePayload),
    Multiple(Vec<SubShapePayload>),
}

/// The mapper's output: the raw identifier value plus ordered sub-shape
/// slots. The builder turns this into the final document.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub id_value: String,
    pub slots: IndexMap<String, SlotValue>,
}

/// Construction-time overlay for [`FieldMapper::with_overrides`]. Leaves
/// that are `None`/empty keep the base plan's values.
#[derive(Default)]
pub struct MapperOverrides {
    pub id_source: Option<String>,
    pub id_transform: Option<String>,
    /// slot name → target term → replacement source column.
    pub source_overrides: BTreeMap<String, BTreeMap<String, String>>,
    /// Extra transforms registered onto a copy of the base registry.
    pub transforms: Vec<(String, Arc<TransformFn>)>,
}

enum Origin {
    Source(String),
    Literal(String),
    LiteralId(String),
}

struct FieldExec {
    term: String,
    origin: Origin,
    datatype: Datatype,
    transforms: Vec<Arc<TransformFn>>,
    optional: bool,
    multi_value_split: Option<String>,
}

struct SlotExec {
    name: String,
    type_: String,
    cardinality: Cardinality,
    split_on: Option<String>,
    include_record_status: bool,
    include_data_collection: bool,
    fields: Vec<FieldExec>,
}

/// Maps raw records to [`MappedRecord`]s using a compiled plan snapshot.
pub struct FieldMapper {
    config: Arc<MappingConfig>,
    transforms: Arc<TransformRegistry>,
    slots: Vec<SlotExec>,
    record_status: Option<SlotExec>,
    data_collection: Option<SlotExec>,
    id_source: String,
}

impl FieldMapper {
    pub fn new(
        config: MappingConfig,
        transforms: Arc<TransformRegistry>,
    ) -> Result<FieldMapper, ConfigError> {
        config.check()?;
        // Resolving the id transform here surfaces a bad name at
        // construction instead of on the millionth record.
        if let Some(name) = &config.id_transform {
            transforms.get(name)?;
        }
        let slots = config
            .properties
            .iter()
            .map(|(name, plan)| compile_slot(name, plan, &transforms))
            .collect::<Result<Vec<_>, _>>()?;
        let record_status = config
            .record_status_defaults
            .as_ref()
            .map(|plan| compile_slot(RECORD_STATUS_SLOT, plan, &transforms))
            .transpose()?;
        let data_collection = config
            .data_collection_defaults
            .as_ref()
            .map(|plan| compile_slot(DATA_COLLECTION_SLOT, plan, &transforms))
            .transpose()?;
        let id_source = config.id_source.clone();
        Ok(FieldMapper {
            config: Arc::new(config),
            transforms,
            slots,
            record_status,
            data_collection,
            id_source,
        })
    }

    /// The mapping config snapshot this mapper executes.
    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn transforms(&self) -> &Arc<TransformRegistry> {
        &self.transforms
    }

    /// Returns a new mapper whose plan is this mapper's config with the
    /// overlay applied per leaf. The receiver is untouched.
    pub fn with_overrides(&self, overrides: MapperOverrides) -> Result<FieldMapper, ConfigError> {
        let mut config = (*self.config).clone();
        if let Some(id_source) = overrides.id_source {
            config.id_source = id_source;
        }
        if let Some(id_transform) = overrides.id_transform {
            config.id_transform = Some(id_transform);
        }
        for (slot, terms) in &overrides.source_overrides {
            let plan = config
                .properties
                .get_mut(slot)
                .ok_or_else(|| ConfigError::UnknownOverrideTarget(slot.clone()))?;
            for (term, source) in terms {
                let rule = plan.fields.get_mut(term).ok_or_else(|| {
                    ConfigError::UnknownOverrideTarget(format!("{slot}.{term}"))
                })?;
                rule.source = Some(source.clone());
                rule.value = None;
                rule.value_id = None;
            }
        }
        let mut registry = (*self.transforms).clone();
        for (name, transform) in overrides.transforms {
            let transform = transform.clone();
            registry.register(name, move |v| transform(v))?;
        }
        FieldMapper::new(config, Arc::new(registry))
    }

    /// Maps one raw record. Per-record failures come back as
    /// [`MappingError`]; the caller decides between aborting and
    /// dead-lettering.
    pub fn map(&self, record: &RawRecord) -> Result<MappedRecord, MappingError> {
        let row = RowView::new(record);
        let available = columns_present(record);

        let id_value = match row.get(&self.id_source) {
            Some(value) => scalar_text(&self.id_source, value)?,
            None => None,
        };
        let id_value = id_value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MappingError::IdEmpty {
                column: self.id_source.clone(),
                available: available.clone(),
            })?;

        let mut slots = IndexMap::new();
        for slot in &self.slots {
            match slot.cardinality {
                Cardinality::Single => {
                    if let Some(payload) = self.build_payload(slot, &row, None, &available)? {
                        slots.insert(slot.name.clone(), SlotValue::Single(payload));
                    }
                }
                Cardinality::Multiple => {
                    let payloads = self.build_groups(slot, &row, &available)?;
                    if !payloads.is_empty() {
                        slots.insert(slot.name.clone(), SlotValue::Multiple(payloads));
                    }
                }
            }
        }

        if let Some(slot) = &self.record_status {
            if let Some(payload) = self.build_payload(slot, &row, None, &available)? {
                slots.insert(RECORD_STATUS_SLOT.to_string(), SlotValue::Single(payload));
            }
        }
        if let Some(slot) = &self.data_collection {
            if let Some(payload) = self.build_payload(slot, &row, None, &available)? {
                slots.insert(DATA_COLLECTION_SLOT.to_string(), SlotValue::Single(payload));
            }
        }

        Ok(MappedRecord { id_value, slots })
    }

    /// Splits contributing source cells into equal-length groups and builds
    /// one payload per group. Cells without the delimiter are broadcast to
    /// every group; any other length mismatch is ragged.
    fn build_groups(
        &self,
        slot: &SlotExec,
        row: &RowView,
        available: &str,
    ) -> Result<Vec<SubShapePayload>, MappingError> {
        let delimiter = match &slot.split_on {
            Some(d) if !d.is_empty() => d.as_str(),
            _ => {
                return Ok(self
                    .build_payload(slot, row, None, available)?
                    .into_iter()
                    .collect());
            }
        };

        let mut per_column: Vec<(String, Vec<String>)> = Vec::new();
        for field in &slot.fields {
            let Origin::Source(column) = &field.origin else {
                continue;
            };
            if per_column.iter().any(|(c, _)| c == column) {
                continue;
            }
            let Some(value) = row.get(column) else {
                continue;
            };
            let Some(text) = scalar_text(column, value)? else {
                continue;
            };
            let segments: Vec<String> = text
                .split(delimiter)
                .map(|s| s.trim().to_string())
                .collect();
            per_column.push((column.clone(), segments));
        }

        let group_count = per_column
            .iter()
            .map(|(_, segments)| segments.len())
            .max()
            .unwrap_or(1);
        for (column, segments) in &per_column {
            if segments.len() != group_count && segments.len() != 1 {
                return Err(MappingError::RaggedMultiValue {
                    slot: slot.name.clone(),
                    column: column.clone(),
                    expected: group_count,
                    actual: segments.len(),
                });
            }
        }

        let mut payloads = Vec::new();
        for index in 0..group_count {
            let segments: BTreeMap<String, String> = per_column
                .iter()
                .map(|(column, segments)| {
                    let value = if segments.len() == 1 {
                        segments[0].clone()
                    } else {
                        segments[index].clone()
                    };
                    (column.clone(), value)
                })
                .collect();
            if let Some(payload) = self.build_payload(slot, row, Some(&segments), available)? {
                payloads.push(payload);
            }
        }
        Ok(payloads)
    }

    fn build_payload(
        &self,
        slot: &SlotExec,
        row: &RowView,
        segments: Option<&BTreeMap<String, String>>,
        available: &str,
    ) -> Result<Option<SubShapePayload>, MappingError> {
        let mut fields = IndexMap::new();
        let mut source_backed = 0usize;
        let mut has_source_rules = false;
        let mut present_required = 0usize;
        let mut missing_required: Option<(String, String)> = None;

        for field in &slot.fields {
            let required = !field.optional && matches!(field.origin, Origin::Source(_));
            if matches!(field.origin, Origin::Source(_)) {
                has_source_rules = true;
            }
            match self.eval_field(field, row, segments)? {
                Some(value) => {
                    if matches!(field.origin, Origin::Source(_)) {
                        source_backed += 1;
                    }
                    if required {
                        present_required += 1;
                    }
                    fields.insert(field.term.clone(), value);
                }
                None => {
                    if required && missing_required.is_none() {
                        if let Origin::Source(column) = &field.origin {
                            missing_required = Some((field.term.clone(), column.clone()));
                        }
                    }
                }
            }
        }

        if let Some((target, source)) = missing_required {
            if present_required == 0 && source_backed == 0 {
                // The whole group is empty: not an error, just nothing to
                // emit for this sub-shape.
                tracing::warn!(
                    slot = %slot.name,
                    "dropping sub-shape group with no populated source fields"
                );
                return Ok(None);
            }
            return Err(MappingError::RequiredMissing {
                target,
                source_column: source,
                available: available.to_string(),
            });
        }

        if has_source_rules && source_backed == 0 {
            return Ok(None);
        }
        if fields.is_empty() {
            return Ok(None);
        }

        if slot.include_record_status {
            if let Some(defaults) = &self.record_status {
                if let Some(payload) = self.build_payload(defaults, row, None, available)? {
                    fields.insert(
                        RECORD_STATUS_SLOT.to_string(),
                        FieldValue::Nested(payload),
                    );
                }
            }
        }
        if slot.include_data_collection {
            if let Some(defaults) = &self.data_collection {
                if let Some(payload) = self.build_payload(defaults, row, None, available)? {
                    fields.insert(
                        DATA_COLLECTION_SLOT.to_string(),
                        FieldValue::Nested(payload),
                    );
                }
            }
        }

        Ok(Some(SubShapePayload {
            type_: slot.type_.clone(),
            fields,
        }))
    }

    fn eval_field(
        &self,
        field: &FieldExec,
        row: &RowView,
        segments: Option<&BTreeMap<String, String>>,
    ) -> Result<Option<FieldValue>, MappingError> {
        let (text, raw): (Option<String>, Option<&Value>) = match &field.origin {
            Origin::Source(column) => {
                if let Some(segment) = segments.and_then(|s| s.get(column)) {
                    (Some(segment.clone()), None)
                } else {
                    match row.get(column) {
                        Some(value) => (scalar_text(column, value)?, Some(value)),
                        None => (None, None),
                    }
                }
            }
            Origin::Literal(literal) => (Some(literal.clone()), None),
            Origin::LiteralId(literal) => (Some(literal.clone()), None),
        };

        let Some(text) = text else {
            return Ok(None);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        if let Some(delimiter) = &field.multi_value_split {
            let mut items = Vec::new();
            for segment in text.split(delimiter.as_str()) {
                let segment = segment.trim();
                if segment.is_empty() {
                    continue;
                }
                let transformed = self.apply_transforms(field, segment)?;
                if transformed.is_empty() {
                    continue;
                }
                items.push(self.coerce(field, transformed, None)?);
            }
            if items.is_empty() {
                return Ok(None);
            }
            return Ok(Some(FieldValue::List(items)));
        }

        let had_transforms = !field.transforms.is_empty();
        let transformed = self.apply_transforms(field, text.trim())?;
        if transformed.is_empty() {
            return Ok(None);
        }
        let preserved = if had_transforms { None } else { raw };
        Ok(Some(self.coerce(field, transformed, preserved)?))
    }

    fn apply_transforms(&self, field: &FieldExec, text: &str) -> Result<String, MappingError> {
        let mut value = text.to_string();
        for transform in &field.transforms {
            value = transform(&value).map_err(|source| MappingError::Transform {
                target: field.term.clone(),
                source,
            })?;
        }
        Ok(value)
    }

    /// Coerces a transformed string to the declared datatype. `raw` is the
    /// untouched source scalar, available only when no transform or split
    /// intervened, so plain fields can keep their native JSON type.
    fn coerce(
        &self,
        field: &FieldExec,
        text: String,
        raw: Option<&Value>,
    ) -> Result<FieldValue, MappingError> {
        if matches!(field.origin, Origin::LiteralId(_)) {
            return Ok(FieldValue::Iri(text));
        }

        let mismatch = |value: &str| MappingError::TypeMismatch {
            target: field.term.clone(),
            datatype: field.datatype,
            value: value.to_string(),
        };

        let raw_is_bool = matches!(raw, Some(Value::Bool(_)));
        if raw_is_bool && !matches!(field.datatype, Datatype::Plain | Datatype::Boolean) {
            return Err(mismatch(&text));
        }

        let datatype = match field.datatype.compact() {
            None => {
                return Ok(match raw {
                    Some(value) => FieldValue::Scalar(value.clone()),
                    None => FieldValue::Scalar(Value::String(text)),
                });
            }
            Some(datatype) => datatype,
        };

        let value = match field.datatype {
            Datatype::Plain => unreachable!("plain handled above"),
            Datatype::String | Datatype::Token | Datatype::AnyUri => text,
            Datatype::Date => crate::transform::date_format(&text).map_err(|_| mismatch(&text))?,
            Datatype::DateTime => {
                if DATETIME.is_match(&text) {
                    text
                } else {
                    return Err(mismatch(&text));
                }
            }
            Datatype::Integer => {
                if INTEGER.is_match(&text) {
                    text
                } else {
                    return Err(mismatch(&text));
                }
            }
            Datatype::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => "true".to_string(),
                "false" | "0" => "false".to_string(),
                _ => return Err(mismatch(&text)),
            },
            Datatype::Decimal => match text.parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => text,
                _ => return Err(mismatch(&text)),
            },
        };
        Ok(FieldValue::Typed { value, datatype })
    }
}

fn compile_slot(
    name: &str,
    plan: &SubShapePlan,
    transforms: &TransformRegistry,
) -> Result<SlotExec, ConfigError> {
    let fields = plan
        .fields
        .iter()
        .map(|(term, rule)| {
            let chain = rule
                .transform
                .names()
                .iter()
                .map(|name| transforms.get(name))
                .collect::<Result<Vec<_>, _>>()?;
            let origin = if let Some(source) = &rule.source {
                Origin::Source(source.clone())
            } else if let Some(value) = &rule.value {
                Origin::Literal(value.clone())
            } else if let Some(value_id) = &rule.value_id {
                Origin::LiteralId(value_id.clone())
            } else {
                return Err(ConfigError::MissingValueOrigin(format!("{name}.{term}")));
            };
            Ok(FieldExec {
                term: rule.target.clone().unwrap_or_else(|| term.clone()),
                origin,
                datatype: rule.datatype,
                transforms: chain,
                optional: rule.is_optional(),
                multi_value_split: rule.multi_value_split.clone(),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    Ok(SlotExec {
        name: name.to_string(),
        type_: plan.type_.clone(),
        cardinality: plan.cardinality,
        split_on: plan.split_on.clone(),
        include_record_status: plan.include_record_status,
        include_data_collection: plan.include_data_collection,
        fields,
    })
}

/// Maps codepoints to their caseless collated form (unicode-normalized),
/// following the Unicode default caseless matching guidelines. Used for
/// forgiving source-column lookup.
fn fold(s: &str) -> String {
    s.chars().nfd().default_case_fold().nfkc().collect()
}

struct RowView<'a> {
    record: &'a RawRecord,
    folded: BTreeMap<String, &'a Value>,
}

impl<'a> RowView<'a> {
    fn new(record: &'a RawRecord) -> RowView<'a> {
        let folded = record
            .iter()
            .map(|(column, value)| (fold(column), value))
            .collect();
        RowView { record, folded }
    }

    /// Exact column match first, then a caseless match.
    fn get(&self, column: &str) -> Option<&'a Value> {
        self.record
            .get(column)
            .or_else(|| self.folded.get(&fold(column)).copied())
    }
}

fn scalar_text(column: &str, value: &Value) -> Result<Option<String>, MappingError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(_) => Err(MappingError::InvalidScalar {
            column: column.to_string(),
            kind: "array",
        }),
        Value::Object(_) => Err(MappingError::InvalidScalar {
            column: column.to_string(),
            kind: "object",
        }),
    }
}

fn columns_present(record: &RawRecord) -> String {
    record.keys().cloned().collect::<Vec<_>>().join(", ")
}

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"^[+-]?\d+$").unwrap();
    static ref DATETIME: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap();
}
