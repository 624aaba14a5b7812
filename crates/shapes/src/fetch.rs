//! Download cache for remotely-hosted shape artifacts. Cached content is
//! keyed by URL; `ETag` / `Last-Modified` validators are persisted in a JSON
//! index next to the files so unchanged artifacts are never re-downloaded.

use crate::ShapeLoadError;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    etag: Option<String>,
    last_modified: Option<String>,
    path: PathBuf,
}

/// URL-keyed cache of fetched files under one directory.
#[derive(Debug)]
pub struct FetchCache {
    dir: PathBuf,
    index: BTreeMap<String, CacheEntry>,
}

impl FetchCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<FetchCache, ShapeLoadError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let text = fs::read_to_string(&index_path)?;
            serde_json::from_str(&text).map_err(|e| ShapeLoadError::Parse {
                name: dir.display().to_string(),
                what: "fetch cache index",
                detail: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };
        Ok(FetchCache { dir, index })
    }

    /// Fetches a URL, revalidating any cached copy. Returns the local path.
    pub fn fetch(&mut self, url: &str) -> Result<PathBuf, ShapeLoadError> {
        let http_err = |detail: String| ShapeLoadError::Http {
            url: url.to_string(),
            detail,
        };

        let client = reqwest::blocking::Client::new();
        let mut request = client.get(url);
        if let Some(entry) = self.index.get(url) {
            if let Some(etag) = &entry.etag {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.last_modified {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request.send().map_err(|e| http_err(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            if let Some(entry) = self.index.get(url) {
                if entry.path.exists() {
                    tracing::debug!(url, "cache hit (not modified)");
                    return Ok(entry.path.clone());
                }
            }
            return Err(http_err(
                "server replied 304 but the cached file is gone; clear the cache".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(http_err(format!("unexpected status {}", response.status())));
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let etag = header(reqwest::header::ETAG);
        let last_modified = header(reqwest::header::LAST_MODIFIED);

        let path = self.dir.join(file_name_for(url));
        let body = response.bytes().map_err(|e| http_err(e.to_string()))?;
        fs::write(&path, &body)?;
        tracing::info!(url, path = %path.display(), bytes = body.len(), "fetched shape artifact");

        self.index.insert(
            url.to_string(),
            CacheEntry {
                etag,
                last_modified,
                path: path.clone(),
            },
        );
        self.persist()?;
        Ok(path)
    }

    fn persist(&self) -> Result<(), ShapeLoadError> {
        let text = serde_json::to_string_pretty(&self.index).map_err(|e| {
            ShapeLoadError::Parse {
                name: self.dir.display().to_string(),
                what: "fetch cache index",
                detail: e.to_string(),
            }
        })?;
        fs::write(self.dir.join(INDEX_FILE), text)?;
        Ok(())
    }

    #[cfg(test)]
    fn record(&mut self, url: &str, path: &std::path::Path) -> Result<(), ShapeLoadError> {
        self.index.insert(
            url.to_string(),
            CacheEntry {
                etag: Some("\"abc\"".to_string()),
                last_modified: None,
                path: path.to_path_buf(),
            },
        );
        self.persist()
    }
}

/// Collision-safe local file name for a URL: hash prefix plus the last path
/// segment for readability.
fn file_name_for(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    let segment = url
        .rsplit('/')
        .next()
        .unwrap_or("artifact")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>();
    let segment = if segment.is_empty() {
        "artifact".to_string()
    } else {
        segment
    };
    format!("{:016x}_{segment}", hasher.finish())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_names_are_stable_and_collision_safe() {
        let a = file_name_for("https://example.org/shapes/Person_SHACL.ttl");
        let b = file_name_for("https://example.org/other/Person_SHACL.ttl");
        assert_ne!(a, b);
        assert!(a.ends_with("Person_SHACL.ttl"));
        assert_eq!(a, file_name_for("https://example.org/shapes/Person_SHACL.ttl"));
    }

    #[test]
    fn index_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("cached.ttl");
        fs::write(&artifact, "@prefix sh: <http://www.w3.org/ns/shacl#> .").unwrap();

        let mut cache = FetchCache::open(dir.path()).unwrap();
        cache.record("https://example.org/x.ttl", &artifact).unwrap();
        drop(cache);

        let reopened = FetchCache::open(dir.path()).unwrap();
        let entry = reopened.index.get("https://example.org/x.ttl").unwrap();
        assert_eq!(entry.etag.as_deref(), Some("\"abc\""));
        assert_eq!(entry.path, artifact);
    }
}
