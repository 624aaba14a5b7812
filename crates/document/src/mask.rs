//! PII masking for anything that reaches logs or dead-letter output.
//! Masking is two-layered: well-known field names are blanked wholesale, and
//! string values anywhere are scanned for SSN and email shapes.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Field names (compared caseless, punctuation ignored) whose values are
/// replaced entirely.
const MASKED_FIELDS: &[&str] = &[
    "ssn",
    "socialsecuritynumber",
    "birthdate",
    "dob",
    "dateofbirth",
    "email",
    "emailaddress",
    "phone",
    "phonenumber",
    "telephone",
    "firstname",
    "givenname",
    "middlename",
    "lastname",
    "lastorsurname",
    "surname",
];

lazy_static! {
    static ref SSN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref EMAIL: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
}

fn is_masked_field(name: &str) -> bool {
    let folded: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    MASKED_FIELDS.contains(&folded.as_str())
}

fn mask_text(text: &str) -> Option<String> {
    if !SSN.is_match(text) && !EMAIL.is_match(text) {
        return None;
    }
    let masked = SSN.replace_all(text, "<redacted:ssn>");
    let masked = EMAIL.replace_all(&masked, "<redacted:email>");
    Some(masked.into_owned())
}

/// Returns a copy of `value` with PII masked. Key structure and ordering are
/// preserved so masked rows stay diffable against their sources.
pub fn mask_pii(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, field) in map {
                if is_masked_field(key) && !field.is_null() {
                    out.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    out.insert(key.clone(), mask_pii(field));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_pii).collect()),
        Value::String(text) => match mask_text(text) {
            Some(masked) => Value::String(masked),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}
