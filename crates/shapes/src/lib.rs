mod context;
mod fetch;
mod registry;
mod shacl;
mod template;

pub use self::context::Context;
pub use self::fetch::FetchCache;
pub use self::registry::{ShapeDefinition, ShapeRegistry};
pub use self::shacl::{parse_shacl, NodeShapeInfo, PropertyInfo, ShapeIndex};
pub use self::template::{
    generate_mapping, validate_mapping, MappingIssue, MappingIssueSeverity, TemplateOptions,
};

use std::path::PathBuf;

/// Target classes injected through mapping defaults rather than mapped from
/// source columns. Template generation skips them.
pub const STRUCTURAL_CLASSES: &[&str] = &["RecordStatus", "DataCollection"];

#[derive(Debug, thiserror::Error)]
pub enum ShapeLoadError {
    #[error("unknown shape '{name}'; loaded shapes: {loaded}")]
    UnknownShape { name: String, loaded: String },

    #[error("shape '{name}' not found: missing {file} (searched {searched})")]
    NotFound {
        name: String,
        file: String,
        searched: String,
    },

    #[error("failed to parse {what} for shape '{name}': {detail}")]
    Parse {
        name: String,
        what: &'static str,
        detail: String,
    },

    #[error("shape '{name}' is inconsistent: {detail}")]
    Invalid { name: String, detail: String },

    #[error("i/o error while loading shapes: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch '{url}': {detail}")]
    Http { url: String, detail: String },

    #[error(transparent)]
    Config(#[from] mapping::ConfigError),
}

/// Local files backing a fetched shape, keyed by their source URLs in the
/// persistent cache index.
#[derive(Debug, Clone)]
pub struct FetchedShape {
    pub shacl_path: PathBuf,
    pub context_path: PathBuf,
}
