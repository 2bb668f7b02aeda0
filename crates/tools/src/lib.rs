//! Tool assembly for planact.
//!
//! Each turn merges three tool sources (caller-declared, builtin, and
//! provisioned) into one [`MergedToolset`] under a [`ToolChoice`] policy.
//! Declared tools carry a JSON-Schema subset that is checked once at merge
//! time and then used to validate every call made against them.

pub mod merger;
pub mod schema;

pub use merger::{
    CatalogEntry, DeclaredTool, MergedToolset, SourceNames, ToolCatalog, ToolChoice, ToolEntry,
    ToolMerger, ToolSource, ToolSources,
};
pub use schema::{ParameterSchema, SchemaError, SchemaViolation};
