//! Tool merging: one name-addressable toolset per turn.
//!
//! Three ordered sources feed the merge, highest precedence first:
//!
//! 1. **Declared** tools sent by the caller. They have no in-process
//!    executor; calling one is reported back for external fulfillment.
//! 2. **Builtin** tools the server ships, filtered by the enable-list.
//! 3. **Provisioned** tools (tool-protocol proxies and similar).
//!
//! A later source never overwrites an earlier one. The [`ToolChoice`]
//! policy is applied to every candidate before inclusion.

use std::collections::BTreeMap;
use std::sync::Arc;

use planact_core::error::{Error, Result, ToolError};
use planact_core::provider::ToolDefinition;
use planact_core::tool::{ExecutionMode, Tool, ToolCall, ToolMetadata, ToolOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::schema::ParameterSchema;

/// A tool declared by the caller, fulfilled outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredTool {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON-Schema subset describing the input
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl DeclaredTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Tool-selection policy for a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Specific { name: String },
}

impl ToolChoice {
    pub fn specific(name: impl Into<String>) -> Self {
        Self::Specific { name: name.into() }
    }

    fn admits(&self, name: &str) -> bool {
        match self {
            Self::None => false,
            Self::Auto | Self::Required => true,
            Self::Specific { name: wanted } => wanted == name,
        }
    }
}

/// Which source a merged tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Declared,
    Builtin,
    Provisioned,
}

/// One entry of the merged toolset.
#[derive(Clone)]
pub enum ToolEntry {
    /// Runs in-process.
    Executable {
        tool: Arc<dyn Tool>,
        source: ToolSource,
    },
    /// Validated here, fulfilled by the caller.
    External {
        tool: DeclaredTool,
        validator: ParameterSchema,
    },
}

impl ToolEntry {
    pub fn source(&self) -> ToolSource {
        match self {
            Self::Executable { source, .. } => *source,
            Self::External { .. } => ToolSource::Declared,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Self::Executable { tool, .. } => tool.to_definition(),
            Self::External { tool, .. } => ToolDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Executable { tool, .. } => tool.description().to_string(),
            Self::External { tool, .. } => tool.description.clone(),
        }
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executable { tool, source } => f
                .debug_struct("Executable")
                .field("name", &tool.name())
                .field("source", source)
                .finish(),
            Self::External { tool, .. } => f
                .debug_struct("External")
                .field("name", &tool.name)
                .finish(),
        }
    }
}

/// Names each source contributed to the merged set, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceNames {
    pub declared: Vec<String>,
    pub builtin: Vec<String>,
    pub provisioned: Vec<String>,
}

/// Metadata-only view of a toolset: what the planner is allowed to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolCatalog {
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub execution_mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ToolCatalog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The single toolset assembled for a turn. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct MergedToolset {
    entries: BTreeMap<String, ToolEntry>,
    metadata: BTreeMap<String, ToolMetadata>,
    source_names: SourceNames,
}

impl MergedToolset {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn metadata(&self, name: &str) -> Option<&ToolMetadata> {
        self.metadata.get(name)
    }

    pub fn source_names(&self) -> &SourceNames {
        &self.source_names
    }

    /// Names and descriptions only; no execution access.
    pub fn catalog(&self) -> ToolCatalog {
        let entries = self
            .entries
            .iter()
            .map(|(name, entry)| {
                let meta = &self.metadata[name];
                CatalogEntry {
                    name: name.clone(),
                    description: entry.description(),
                    execution_mode: meta.execution_mode,
                    origin: meta.origin_description.clone(),
                }
            })
            .collect();
        ToolCatalog { entries }
    }

    /// Tool definitions for attaching to a model call.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.values().map(ToolEntry::definition).collect()
    }

    /// Dispatch a tool call.
    ///
    /// In-process tools run and yield [`ToolOutcome::Completed`]. Declared
    /// tools are validated against their schema and yield
    /// [`ToolOutcome::RequiresExternalExecution`]; invalid input is a
    /// [`ToolError::InvalidArguments`] the model can correct.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolOutcome, ToolError> {
        let entry = self
            .entries
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        match entry {
            ToolEntry::External { validator, .. } => {
                validator
                    .validate(&call.arguments)
                    .map_err(|violation| ToolError::InvalidArguments {
                        tool_name: call.name.clone(),
                        reason: violation.to_string(),
                    })?;
                Ok(ToolOutcome::RequiresExternalExecution {
                    tool_name: call.name.clone(),
                    call_id: call.id.clone(),
                    arguments: call.arguments.clone(),
                })
            }
            ToolEntry::Executable { tool, .. } => {
                let mut result = tool.execute(call.arguments.clone()).await?;
                result.call_id = call.id.clone();
                Ok(ToolOutcome::Completed(result))
            }
        }
    }

    fn insert(&mut self, name: String, entry: ToolEntry, metadata: ToolMetadata) {
        let names = match entry.source() {
            ToolSource::Declared => &mut self.source_names.declared,
            ToolSource::Builtin => &mut self.source_names.builtin,
            ToolSource::Provisioned => &mut self.source_names.provisioned,
        };
        names.push(name.clone());
        self.metadata.insert(name.clone(), metadata);
        self.entries.insert(name, entry);
    }
}

/// The tool sources for one turn, each in caller order.
#[derive(Default, Clone)]
pub struct ToolSources {
    pub declared: Vec<DeclaredTool>,
    pub builtin: Vec<Arc<dyn Tool>>,
    pub provisioned: Vec<Arc<dyn Tool>>,
}

impl ToolSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_declared(mut self, tools: Vec<DeclaredTool>) -> Self {
        self.declared = tools;
        self
    }

    pub fn with_builtin(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.builtin = tools;
        self
    }

    pub fn with_provisioned(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.provisioned = tools;
        self
    }
}

/// Merges tool sources under a selection policy.
#[derive(Debug, Clone, Default)]
pub struct ToolMerger {
    choice: ToolChoice,
    /// `None` leaves every builtin eligible.
    enabled_builtins: Option<Vec<String>>,
}

impl ToolMerger {
    pub fn new(choice: ToolChoice) -> Self {
        Self {
            choice,
            enabled_builtins: None,
        }
    }

    /// Restrict which builtin tools are eligible.
    pub fn with_enabled_builtins(mut self, names: Vec<String>) -> Self {
        self.enabled_builtins = Some(names);
        self
    }

    /// Build the merged toolset.
    ///
    /// The only failure is a `Specific` choice naming a tool that did not
    /// survive the merge; every other problem is logged and skipped.
    pub fn merge(&self, sources: ToolSources) -> Result<MergedToolset> {
        let mut merged = MergedToolset::empty();

        for declared in sources.declared {
            if merged.contains(&declared.name) {
                warn!(tool = %declared.name, "Duplicate declared tool, keeping the first");
                continue;
            }
            let validator = match ParameterSchema::parse_parameters(&declared.parameters) {
                Ok(validator) => validator,
                Err(e) => {
                    warn!(tool = %declared.name, error = %e, "Dropping declared tool with unsupported schema");
                    continue;
                }
            };
            if !self.choice.admits(&declared.name) {
                continue;
            }
            let name = declared.name.clone();
            let metadata = ToolMetadata {
                name: name.clone(),
                execution_mode: ExecutionMode::External,
                origin_description: None,
            };
            merged.insert(
                name,
                ToolEntry::External {
                    tool: declared,
                    validator,
                },
                metadata,
            );
        }

        for tool in sources.builtin {
            let name = tool.name().to_string();
            if let Some(enabled) = &self.enabled_builtins
                && !enabled.contains(&name)
            {
                debug!(tool = %name, "Builtin tool not enabled for this turn");
                continue;
            }
            self.insert_executable(&mut merged, tool, ToolSource::Builtin);
        }

        for tool in sources.provisioned {
            self.insert_executable(&mut merged, tool, ToolSource::Provisioned);
        }

        if let ToolChoice::Specific { name } = &self.choice
            && !merged.contains(name)
        {
            return Err(Error::config(format!(
                "tool choice requires tool '{name}', but no tool with that name is available"
            )));
        }

        debug!(
            tools = merged.len(),
            declared = merged.source_names.declared.len(),
            builtin = merged.source_names.builtin.len(),
            provisioned = merged.source_names.provisioned.len(),
            "Merged toolset"
        );
        Ok(merged)
    }

    fn insert_executable(&self, merged: &mut MergedToolset, tool: Arc<dyn Tool>, source: ToolSource) {
        let name = tool.name().to_string();
        if let Some(existing) = merged.get(&name) {
            warn!(
                tool = %name,
                kept = ?existing.source(),
                skipped = ?source,
                "Tool name collision, keeping the higher-precedence tool"
            );
            return;
        }
        if !self.choice.admits(&name) {
            return;
        }
        let metadata = ToolMetadata {
            name: name.clone(),
            execution_mode: ExecutionMode::Server,
            origin_description: tool.origin().map(str::to_string),
        };
        merged.insert(name, ToolEntry::Executable { tool, source }, metadata);
    }
}
