//! The shape registry: loads, validates, and caches immutable shape
//! definitions from on-disk shape folders or fetched URLs. A shape folder is
//! named after the shape and holds `<Shape>_SHACL.ttl`,
//! `<shape>_context.json`, and `<shape>_mapping.yaml`.

use crate::context::Context;
use crate::fetch::FetchCache;
use crate::shacl::{parse_shacl, ShapeIndex};
use crate::template::{validate_mapping, MappingIssueSeverity};
use crate::{FetchedShape, ShapeLoadError};
use mapping::MappingConfig;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable aggregate of everything needed to map and validate one record
/// type. Created only here; shared by reference everywhere else.
#[derive(Debug)]
pub struct ShapeDefinition {
    pub name: String,
    pub version: Option<String>,
    pub shapes: ShapeIndex,
    pub context: Context,
    pub mapping: MappingConfig,
}

#[derive(Default)]
pub struct ShapeRegistry {
    search_paths: Vec<PathBuf>,
    loaded: BTreeMap<String, Arc<ShapeDefinition>>,
    cache: Option<FetchCache>,
}

impl ShapeRegistry {
    pub fn new() -> ShapeRegistry {
        ShapeRegistry::default()
    }

    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) {
        self.search_paths.push(dir.into());
    }

    /// Points `fetch` at a persistent cache directory.
    pub fn set_cache_dir(&mut self, dir: impl Into<PathBuf>) -> Result<(), ShapeLoadError> {
        self.cache = Some(FetchCache::open(dir)?);
        Ok(())
    }

    /// Loads a shape by name, searching the registered paths. Idempotent:
    /// later calls return the cached definition.
    pub fn load(&mut self, name: &str) -> Result<Arc<ShapeDefinition>, ShapeLoadError> {
        if let Some(definition) = self.loaded.get(name) {
            return Ok(definition.clone());
        }
        let dir = self.find_shape_dir(name)?;
        let definition = Arc::new(load_definition(name, &dir)?);
        self.loaded.insert(name.to_string(), definition.clone());
        Ok(definition)
    }

    /// Loads a shape from an explicit folder, bypassing the search paths.
    pub fn load_from_dir(
        &mut self,
        name: &str,
        dir: impl AsRef<Path>,
    ) -> Result<Arc<ShapeDefinition>, ShapeLoadError> {
        if let Some(definition) = self.loaded.get(name) {
            return Ok(definition.clone());
        }
        let definition = Arc::new(load_definition(name, dir.as_ref())?);
        self.loaded.insert(name.to_string(), definition.clone());
        Ok(definition)
    }

    /// Returns a previously loaded definition.
    pub fn get(&self, name: &str) -> Result<Arc<ShapeDefinition>, ShapeLoadError> {
        self.loaded
            .get(name)
            .cloned()
            .ok_or_else(|| ShapeLoadError::UnknownShape {
                name: name.to_string(),
                loaded: self
                    .loaded
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Shape names discoverable under the search paths: directories holding
    /// a `*_SHACL.ttl` file.
    pub fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        for path in &self.search_paths {
            let Ok(entries) = fs::read_dir(path) else {
                continue;
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if dir.is_dir() && find_file(&dir, "_SHACL.ttl").is_some() {
                    if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// Downloads SHACL and context artifacts into the fetch cache,
    /// revalidating with `ETag`/`Last-Modified`. The mapping still comes
    /// from a search path or template generation.
    pub fn fetch(
        &mut self,
        name: &str,
        shacl_url: &str,
        context_url: &str,
    ) -> Result<FetchedShape, ShapeLoadError> {
        let cache = self.cache.as_mut().ok_or_else(|| ShapeLoadError::Invalid {
            name: name.to_string(),
            detail: "no cache directory configured; call set_cache_dir first".to_string(),
        })?;
        let shacl_path = cache.fetch(shacl_url)?;
        let context_path = cache.fetch(context_url)?;
        Ok(FetchedShape {
            shacl_path,
            context_path,
        })
    }

    fn find_shape_dir(&self, name: &str) -> Result<PathBuf, ShapeLoadError> {
        let lower = name.to_lowercase();
        for path in &self.search_paths {
            for candidate in [path.join(name), path.join(&lower)] {
                if candidate.is_dir() {
                    return Ok(candidate);
                }
            }
        }
        Err(ShapeLoadError::NotFound {
            name: name.to_string(),
            file: format!("{name}/"),
            searched: self
                .search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

fn find_file(dir: &Path, suffix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(suffix))
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn required_file(name: &str, dir: &Path, suffix: &str) -> Result<PathBuf, ShapeLoadError> {
    find_file(dir, suffix).ok_or_else(|| ShapeLoadError::NotFound {
        name: name.to_string(),
        file: format!("*{suffix}"),
        searched: dir.display().to_string(),
    })
}

fn load_definition(name: &str, dir: &Path) -> Result<ShapeDefinition, ShapeLoadError> {
    let shacl_path = required_file(name, dir, "_SHACL.ttl")?;
    let mapping_path = required_file(name, dir, "_mapping.yaml")?;

    let shacl_text = fs::read_to_string(&shacl_path)?;
    let shapes = parse_shacl(name, &shacl_text)?;

    let mapping = MappingConfig::load(&mapping_path).map_err(|e| ShapeLoadError::Parse {
        name: name.to_string(),
        what: "mapping config",
        detail: e.to_string(),
    })?;

    // The folder context wins; a mapping-level context_file is the fallback
    // for mappings shipped separately from their context.
    let context_path = match find_file(dir, "_context.json") {
        Some(path) => path,
        None => match &mapping.context_file {
            Some(relative) => dir.join(relative),
            None => {
                return Err(ShapeLoadError::NotFound {
                    name: name.to_string(),
                    file: "*_context.json".to_string(),
                    searched: dir.display().to_string(),
                })
            }
        },
    };
    let context = Context::load(name, &context_path)?;
    let version = context
        .raw()
        .get("version")
        .and_then(|v| v.as_str())
        .map(String::from);

    let issues = validate_mapping(&mapping, &shapes, Some(&context));
    let mut errors = Vec::new();
    for issue in &issues {
        match issue.severity {
            MappingIssueSeverity::Error => {
                errors.push(format!("{}: {}", issue.location, issue.message))
            }
            MappingIssueSeverity::Warning => {
                tracing::warn!(shape = name, location = %issue.location, "{}", issue.message)
            }
        }
    }
    if !errors.is_empty() {
        return Err(ShapeLoadError::Invalid {
            name: name.to_string(),
            detail: errors.join("; "),
        });
    }

    tracing::info!(
        shape = name,
        shapes = shapes.shapes.len(),
        slots = mapping.properties.len(),
        "loaded shape definition"
    );
    Ok(ShapeDefinition {
        name: name.to_string(),
        version,
        shapes,
        context,
        mapping,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::shacl::test::PERSON_TTL;
    use std::fs;

    const CONTEXT_JSON: &str = r#"{
  "version": "0.3.0",
  "@context": {
    "@vocab": "http://ceds.ed.gov/terms#",
    "cepi": "https://data.example.edu/cepi/",
    "xsd": "http://www.w3.org/2001/XMLSchema#"
  }
}"#;

    const MAPPING_YAML: &str = r#"
shape: Person
type: Person
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
    fields:
      PersonIdentifier:
        source: PersonIdentifiers
      IdentificationSystem:
        source: IdentificationSystems
        optional: true
"#;

    fn write_person_shape(root: &Path) -> PathBuf {
        let dir = root.join("person");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Person_SHACL.ttl"), PERSON_TTL).unwrap();
        fs::write(dir.join("person_context.json"), CONTEXT_JSON).unwrap();
        fs::write(dir.join("person_mapping.yaml"), MAPPING_YAML).unwrap();
        dir
    }

    #[test]
    fn load_is_idempotent_and_get_returns_the_same_definition() {
        let tmp = tempfile::tempdir().unwrap();
        write_person_shape(tmp.path());

        let mut registry = ShapeRegistry::new();
        registry.add_search_path(tmp.path());

        let first = registry.load("person").expect("load person");
        assert_eq!(first.name, "person");
        assert_eq!(first.version.as_deref(), Some("0.3.0"));
        assert_eq!(first.mapping.shape, "Person");
        assert!(first.shapes.resolve("Person").is_some());

        let second = registry.load("person").expect("reload person");
        assert!(Arc::ptr_eq(&first, &second));
        let got = registry.get("person").expect("get person");
        assert!(Arc::ptr_eq(&first, &got));
    }

    #[test]
    fn get_before_load_is_unknown_shape() {
        let registry = ShapeRegistry::new();
        let err = registry.get("person").unwrap_err();
        assert!(matches!(err, ShapeLoadError::UnknownShape { .. }));
    }

    #[test]
    fn missing_folder_reports_searched_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = ShapeRegistry::new();
        registry.add_search_path(tmp.path());
        let err = registry.load("staff").unwrap_err();
        match &err {
            ShapeLoadError::NotFound { searched, .. } => {
                assert!(searched.contains(&tmp.path().display().to_string()));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_mapping_fails_with_a_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_person_shape(tmp.path());
        let broken = MAPPING_YAML.replace("source: LastName", "value: unused")
            .replace("LastOrSurname:", "Nickname:");
        fs::write(dir.join("person_mapping.yaml"), broken).unwrap();

        let mut registry = ShapeRegistry::new();
        registry.add_search_path(tmp.path());
        let err = registry.load("person").unwrap_err();
        match &err {
            ShapeLoadError::Invalid { detail, .. } => {
                assert!(detail.contains("Nickname"), "detail: {detail}");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn list_discovers_shape_folders() {
        let tmp = tempfile::tempdir().unwrap();
        write_person_shape(tmp.path());
        fs::create_dir_all(tmp.path().join("not-a-shape")).unwrap();

        let mut registry = ShapeRegistry::new();
        registry.add_search_path(tmp.path());
        assert_eq!(registry.list(), vec!["person".to_string()]);
    }
}
