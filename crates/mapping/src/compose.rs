//! Deep-merge composition of mapping configs. An overlay wins per leaf;
//! mappings merge key-by-key, everything else (including sequences) is
//! replaced wholesale.

use crate::{ConfigError, MappingConfig};
use serde_yaml::Value;

/// Deep merge of two YAML values. `overlay` wins at every leaf; neither
/// input is mutated.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut out = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged = match out.get(key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Mapping(out)
        }
        // A null overlay leaf means "keep the base"; explicit removal is not
        // part of the overlay language.
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}

/// Applies a partial overlay document to a full mapping config, returning a
/// new config. The base is untouched.
pub fn compose(base: &MappingConfig, overlay: &Value) -> Result<MappingConfig, ConfigError> {
    let base_value = serde_yaml::to_value(base)?;
    let merged = merge(&base_value, overlay);
    let config: MappingConfig = serde_yaml::from_value(merged)?;
    config.check()?;
    Ok(config)
}
