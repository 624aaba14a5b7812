mod compose;
mod config;
mod mapper;
mod transform;

pub use self::compose::{compose, merge};
pub use self::config::{
    Cardinality, ConfigError, Datatype, FieldRule, MappingConfig, SubShapePlan, TransformSpec,
};
pub use self::mapper::{
    FieldMapper, FieldValue, MappedRecord, MapperOverrides, MappingError, RawRecord, SlotValue,
    SubShapePayload,
};
pub use self::transform::{code_list_lookup, TransformError, TransformFn, TransformRegistry};

/// Slot name under which `record_status_defaults` payloads are emitted.
pub const RECORD_STATUS_SLOT: &str = "hasRecordStatus";
/// Slot name under which `data_collection_defaults` payloads are emitted.
pub const DATA_COLLECTION_SLOT: &str = "hasDataCollection";
