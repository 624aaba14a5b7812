mod builder;
mod mask;
mod sanitize;
mod serializer;

pub use self::builder::{BuildError, DocumentBuilder};
pub use self::mask::mask_pii;
pub use self::sanitize::{sanitize_iri_component, validate_base_uri, SanitizeError};
pub use self::serializer::{from_bytes, to_bytes, to_bytes_pretty, SerializationError};
