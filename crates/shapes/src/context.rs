//! JSON-LD context handling: term → IRI expansion, IRI → term compaction,
//! and container hints. Only the subset of JSON-LD 1.1 context processing
//! that shape definitions actually use is implemented; framing and scoped
//! contexts are out of scope.

use crate::ShapeLoadError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Expanded definition of a single term.
#[derive(Debug, Clone, PartialEq)]
pub struct TermDefinition {
    pub iri: String,
    /// `@type` coercion hint: `"@id"` or a datatype IRI.
    pub type_: Option<String>,
    /// `@container` hint, e.g. `"@set"`.
    pub container: Option<String>,
}

/// A parsed JSON-LD context document.
#[derive(Debug, Clone)]
pub struct Context {
    raw: Value,
    base: Option<String>,
    vocab: Option<String>,
    terms: BTreeMap<String, TermDefinition>,
    reverse: BTreeMap<String, String>,
}

impl Context {
    pub fn load(shape: &str, path: impl AsRef<Path>) -> Result<Context, ShapeLoadError> {
        let text = fs::read_to_string(path)?;
        Context::from_str(shape, &text)
    }

    pub fn from_str(shape: &str, text: &str) -> Result<Context, ShapeLoadError> {
        let raw: Value = serde_json::from_str(text).map_err(|e| ShapeLoadError::Parse {
            name: shape.to_string(),
            what: "JSON-LD context",
            detail: e.to_string(),
        })?;
        Context::from_value(shape, raw)
    }

    pub fn from_value(shape: &str, raw: Value) -> Result<Context, ShapeLoadError> {
        let parse_err = |detail: String| ShapeLoadError::Parse {
            name: shape.to_string(),
            what: "JSON-LD context",
            detail,
        };
        let body = raw
            .get("@context")
            .and_then(Value::as_object)
            .ok_or_else(|| parse_err("missing or non-object '@context' key".to_string()))?;

        let base = body.get("@base").and_then(Value::as_str).map(String::from);
        let vocab = body.get("@vocab").and_then(Value::as_str).map(String::from);
        if base.is_none() && vocab.is_none() {
            return Err(parse_err(
                "context must declare at least one of '@vocab' or '@base'".to_string(),
            ));
        }

        // First pass: string-valued terms, which double as prefixes.
        let mut direct: BTreeMap<String, String> = BTreeMap::new();
        for (term, value) in body.iter().filter(|(k, _)| !k.starts_with('@')) {
            if let Some(iri) = value.as_str() {
                direct.insert(term.clone(), iri.to_string());
            }
        }

        let resolve = |name: &str| -> Option<String> {
            if is_absolute_iri(name) {
                return Some(name.to_string());
            }
            if let Some((prefix, suffix)) = name.split_once(':') {
                if let Some(ns) = direct.get(prefix) {
                    return Some(format!("{ns}{suffix}"));
                }
            }
            if let Some(iri) = direct.get(name) {
                if iri.as_str() != name {
                    return resolve_step(iri, &direct, vocab.as_deref());
                }
            }
            vocab.as_ref().map(|v| format!("{v}{name}"))
        };

        let mut terms = BTreeMap::new();
        for (term, value) in body.iter().filter(|(k, _)| !k.starts_with('@')) {
            let definition = match value {
                Value::String(iri) => TermDefinition {
                    iri: resolve(iri).unwrap_or_else(|| iri.clone()),
                    type_: None,
                    container: None,
                },
                Value::Object(map) => {
                    let id = map
                        .get("@id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| parse_err(format!("term '{term}' is missing '@id'")))?;
                    TermDefinition {
                        iri: resolve(id).unwrap_or_else(|| id.to_string()),
                        type_: map.get("@type").and_then(Value::as_str).map(String::from),
                        container: map
                            .get("@container")
                            .and_then(Value::as_str)
                            .map(String::from),
                    }
                }
                other => {
                    return Err(parse_err(format!(
                        "term '{term}' has unsupported definition: {other}"
                    )))
                }
            };
            terms.insert(term.clone(), definition);
        }

        let mut reverse = BTreeMap::new();
        for (term, definition) in &terms {
            reverse
                .entry(definition.iri.clone())
                .or_insert_with(|| term.clone());
        }

        Ok(Context {
            raw,
            base,
            vocab,
            terms,
            reverse,
        })
    }

    /// The full context document, for embedding as `@context` when no URL is
    /// configured.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn vocab(&self) -> Option<&str> {
        self.vocab.as_deref()
    }

    pub fn term(&self, name: &str) -> Option<&TermDefinition> {
        self.terms.get(name)
    }

    /// Expands a term, CURIE, or relative name to a full IRI.
    pub fn expand(&self, name: &str) -> Option<String> {
        if is_absolute_iri(name) {
            return Some(name.to_string());
        }
        if let Some(definition) = self.terms.get(name) {
            return Some(definition.iri.clone());
        }
        if let Some((prefix, suffix)) = name.split_once(':') {
            if let Some(ns) = self.terms.get(prefix) {
                return Some(format!("{}{}", ns.iri, suffix));
            }
        }
        self.vocab.as_ref().map(|v| format!("{v}{name}"))
    }

    /// Reverses an IRI to its context term, falling back to vocab-relative
    /// and prefix-compact forms. Used to render readable field paths from
    /// SHACL violations.
    pub fn compact(&self, iri: &str) -> Option<String> {
        if let Some(term) = self.reverse.get(iri) {
            return Some(term.clone());
        }
        if let Some(vocab) = &self.vocab {
            if let Some(rest) = iri.strip_prefix(vocab.as_str()) {
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
        }
        for (term, definition) in &self.terms {
            if definition.iri.ends_with(['/', '#', ':']) {
                if let Some(rest) = iri.strip_prefix(definition.iri.as_str()) {
                    if !rest.is_empty() {
                        return Some(format!("{term}:{rest}"));
                    }
                }
            }
        }
        None
    }

    /// True when the term is declared with a `@set` or `@list` container,
    /// which suppresses single-element list unwrapping.
    pub fn is_set_container(&self, term: &str) -> bool {
        self.terms
            .get(term)
            .and_then(|d| d.container.as_deref())
            .map(|c| c == "@set" || c == "@list")
            .unwrap_or(false)
    }

    /// True when the term is coerced to `@id` (named-individual reference).
    pub fn is_id_term(&self, term: &str) -> bool {
        self.terms
            .get(term)
            .and_then(|d| d.type_.as_deref())
            .map(|t| t == "@id")
            .unwrap_or(false)
    }
}

fn resolve_step(iri: &str, direct: &BTreeMap<String, String>, vocab: Option<&str>) -> Option<String> {
    if is_absolute_iri(iri) {
        return Some(iri.to_string());
    }
    if let Some((prefix, suffix)) = iri.split_once(':') {
        if let Some(ns) = direct.get(prefix) {
            return Some(format!("{ns}{suffix}"));
        }
    }
    vocab.map(|v| format!("{v}{iri}"))
}

/// Heuristic for "already absolute": a scheme followed by `://`, or the
/// well-known schemes that appear without authority in contexts.
fn is_absolute_iri(s: &str) -> bool {
    s.contains("://") || s.starts_with("urn:") || s.starts_with("mailto:")
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn ceds_context() -> Context {
        Context::from_value(
            "person",
            json!({
                "@context": {
                    "@vocab": "http://ceds.ed.gov/terms#",
                    "@base": "https://data.example.edu/",
                    "cepi": "https://data.example.edu/cepi/",
                    "xsd": "http://www.w3.org/2001/XMLSchema#",
                    "hasSex": { "@id": "http://ceds.ed.gov/terms#hasSex", "@type": "@id" },
                    "hasRaceAndEthnicity": {
                        "@id": "http://ceds.ed.gov/terms#hasRaceAndEthnicity",
                        "@type": "@id",
                        "@container": "@set"
                    },
                    "FirstName": "firstName"
                }
            }),
        )
        .expect("parse context")
    }

    #[test]
    fn terms_curies_and_vocab_names_expand() {
        let context = ceds_context();
        assert_eq!(
            context.expand("hasSex").as_deref(),
            Some("http://ceds.ed.gov/terms#hasSex")
        );
        assert_eq!(
            context.expand("cepi:person/1").as_deref(),
            Some("https://data.example.edu/cepi/person/1")
        );
        assert_eq!(
            context.expand("Birthdate").as_deref(),
            Some("http://ceds.ed.gov/terms#Birthdate")
        );
        assert_eq!(
            context.expand("xsd:date").as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#date")
        );
        // String-valued terms resolve through the vocab.
        assert_eq!(
            context.expand("FirstName").as_deref(),
            Some("http://ceds.ed.gov/terms#firstName")
        );
    }

    #[test]
    fn compaction_reverses_expansion() {
        let context = ceds_context();
        assert_eq!(
            context.compact("http://ceds.ed.gov/terms#hasSex").as_deref(),
            Some("hasSex")
        );
        assert_eq!(
            context.compact("http://ceds.ed.gov/terms#Birthdate").as_deref(),
            Some("Birthdate")
        );
        assert_eq!(
            context
                .compact("http://www.w3.org/2001/XMLSchema#date")
                .as_deref(),
            Some("xsd:date")
        );
    }

    #[test]
    fn container_and_id_hints_are_exposed() {
        let context = ceds_context();
        assert!(context.is_set_container("hasRaceAndEthnicity"));
        assert!(!context.is_set_container("hasSex"));
        assert!(context.is_id_term("hasSex"));
        assert!(!context.is_id_term("FirstName"));
    }

    #[test]
    fn context_without_vocab_or_base_is_rejected() {
        let err = Context::from_value("person", json!({"@context": {"a": "b:c"}})).unwrap_err();
        assert!(matches!(err, ShapeLoadError::Parse { .. }));
    }
}
