mod prebuild;
mod report;
mod shacl;

pub use self::prebuild::PreBuildValidator;
pub use self::report::{
    FieldIssue, IssueKind, Severity, ValidationError, ValidationMode, ValidationReport,
};
pub use self::shacl::ShaclValidator;
