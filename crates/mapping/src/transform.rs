//! Named value transforms. A registry maps transform names to pure
//! string-to-string functions; the built-ins cover the education-record
//! conventions (concept-scheme prefixes, pipe-delimited identifier columns,
//! date normalization, identifier cleanup).

use crate::ConfigError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::macros::format_description;
use time::Date;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("cannot parse '{0}' as a calendar date; expected ISO order (YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("month-first date '{0}' is ambiguous and not accepted; use YYYY-MM-DD")]
    MonthFirstDate(String),

    #[error("'{0}' contains no digits")]
    NoDigits(String),

    #[error("non-finite numeric value '{0}' is not representable")]
    NonFinite(String),

    #[error("'{value}' is not a member of the {table} code list")]
    UnknownCode { value: String, table: String },
}

/// A pure value transform. Transforms pass empty input through unchanged so
/// that optional-field handling stays in the mapper.
pub type TransformFn = dyn Fn(&str) -> Result<String, TransformError> + Send + Sync;

const BUILTINS: &[&str] = &[
    "sex_prefix",
    "race_prefix",
    "first_pipe_split",
    "date_format",
    "int_clean",
];

/// Name → transform table. Built-ins are installed by [`with_builtins`] and
/// cannot be shadowed; user transforms may be registered until the registry
/// is sealed, which happens when the first pipeline is constructed from it.
///
/// [`with_builtins`]: TransformRegistry::with_builtins
pub struct TransformRegistry {
    table: BTreeMap<String, Arc<TransformFn>>,
    sealed: AtomicBool,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .field("sealed", &self.sealed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Clone for TransformRegistry {
    // A clone is a new value that no pipeline owns yet, so it starts unsealed.
    fn clone(&self) -> Self {
        TransformRegistry {
            table: self.table.clone(),
            sealed: AtomicBool::new(false),
        }
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    pub fn with_builtins() -> TransformRegistry {
        let mut table: BTreeMap<String, Arc<TransformFn>> = BTreeMap::new();
        table.insert("sex_prefix".to_string(), Arc::new(sex_prefix));
        table.insert("race_prefix".to_string(), Arc::new(race_prefix));
        table.insert("first_pipe_split".to_string(), Arc::new(first_pipe_split));
        table.insert("date_format".to_string(), Arc::new(date_format));
        table.insert("int_clean".to_string(), Arc::new(int_clean));
        TransformRegistry {
            table,
            sealed: AtomicBool::new(false),
        }
    }

    /// Registers a user transform. Fails once a pipeline has been built from
    /// this registry, or if the name shadows a built-in.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        transform: impl Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if BUILTINS.contains(&name.as_str()) {
            return Err(ConfigError::DuplicateTransform(name));
        }
        if self.sealed.load(Ordering::Relaxed) {
            return Err(ConfigError::RegistrySealed);
        }
        self.table.insert(name, Arc::new(transform));
        Ok(())
    }

    /// Marks the registry as in use; later [`register`] calls fail.
    ///
    /// [`register`]: TransformRegistry::register
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> Result<Arc<TransformFn>, ConfigError> {
        self.table
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTransform {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }
}

fn prefixed(prefix: &str, v: &str) -> Result<String, TransformError> {
    if v.is_empty() || v.starts_with(prefix) {
        Ok(v.to_string())
    } else {
        Ok(format!("{prefix}{v}"))
    }
}

/// `Female` → `Sex_Female`, matching the Sex concept scheme's named
/// individuals. Empty and already-prefixed input passes through.
pub fn sex_prefix(v: &str) -> Result<String, TransformError> {
    prefixed("Sex_", v)
}

/// `White` → `RaceAndEthnicity_White`.
pub fn race_prefix(v: &str) -> Result<String, TransformError> {
    prefixed("RaceAndEthnicity_", v)
}

/// Returns the first `|`-separated segment. Pure-digit input is returned
/// verbatim so that long numeric identifiers never take a lossy detour
/// through floating point.
pub fn first_pipe_split(v: &str) -> Result<String, TransformError> {
    if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(v.to_string());
    }
    Ok(v.split('|').next().unwrap_or("").to_string())
}

lazy_static! {
    // Month-first forms like 05-15-2024 or 5/15/2024.
    static ref MONTH_FIRST: Regex = Regex::new(r"^\d{1,2}[-/]\d{1,2}[-/]\d{4}$").unwrap();
}

/// Normalizes a date to `YYYY-MM-DD`. ISO-ordered variants are accepted
/// (dashes, slashes, or a full timestamp whose date part is taken);
/// impossible calendar dates and month-first American forms are rejected.
pub fn date_format(v: &str) -> Result<String, TransformError> {
    let v = v.trim();
    if v.is_empty() {
        return Ok(String::new());
    }
    if MONTH_FIRST.is_match(v) {
        return Err(TransformError::MonthFirstDate(v.to_string()));
    }
    // A timestamp's date portion is enough; the time part is dropped.
    let candidate = match v.as_bytes().get(10) {
        Some(b'T') | Some(b' ') => &v[..10],
        _ => v,
    };
    let dashed = format_description!("[year]-[month]-[day]");
    let slashed = format_description!("[year]/[month]/[day]");
    for format in [dashed, slashed] {
        if let Ok(date) = Date::parse(candidate, format) {
            return Ok(date.format(dashed).unwrap());
        }
    }
    Err(TransformError::InvalidDate(v.to_string()))
}

/// Strips every non-digit character, keeping full precision. Values that
/// name a non-finite float are rejected outright rather than silently
/// collapsing to an empty identifier.
pub fn int_clean(v: &str) -> Result<String, TransformError> {
    let trimmed = v.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let lowered = trimmed.trim_start_matches(['+', '-']).to_ascii_lowercase();
    if matches!(lowered.as_str(), "nan" | "inf" | "infinity") {
        return Err(TransformError::NonFinite(v.to_string()));
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(TransformError::NoDigits(v.to_string()));
    }
    Ok(digits)
}

/// Builds a transform that maps human-readable values to named-individual
/// IRIs (or notations) through a caller-supplied code list.
pub fn code_list_lookup(
    table_name: impl Into<String>,
    table: BTreeMap<String, String>,
) -> impl Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static {
    let table_name = table_name.into();
    move |v: &str| {
        if v.is_empty() {
            return Ok(String::new());
        }
        table
            .get(v)
            .cloned()
            .ok_or_else(|| TransformError::UnknownCode {
                value: v.to_string(),
                table: table_name.clone(),
            })
    }
}
