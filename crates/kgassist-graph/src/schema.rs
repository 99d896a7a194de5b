//! Schema provider: the static node/relationship description used to ground
//! query generation.
//!
//! The schema is loaded once and shared read-only. Its content is not
//! validated: a file that does not match the structured layout is passed
//! through verbatim as grounding text.

use crate::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Grounding text used when no schema could be loaded.
pub const SCHEMA_PLACEHOLDER: &str =
    "[schema unavailable: infer node labels, relationship types and properties from the question]";

/// `(source)-[:name]->(target)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub name: String,
    pub target: String,
}

impl Relationship {
    pub fn new(source: &str, name: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            name: name.to_string(),
            target: target.to_string(),
        }
    }
}

/// Node kinds with their property names, plus relationship triples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub node_kinds: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Schema {
    /// The enterprise-process schema the bulk loader populates.
    pub fn enterprise_processes() -> Self {
        let props = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        let mut node_kinds = BTreeMap::new();
        node_kinds.insert("Department".to_string(), props(&["Name", "Description"]));
        node_kinds.insert("Process".to_string(), props(&["Name", "Description"]));
        node_kinds.insert("Role".to_string(), props(&["Name", "Description"]));
        node_kinds.insert(
            "Step".to_string(),
            props(&["Id", "Process", "Step", "Description"]),
        );
        node_kinds.insert(
            "System".to_string(),
            props(&["Category", "Name", "Description"]),
        );

        Self {
            node_kinds,
            relationships: vec![
                Relationship::new("Department", "IS_OWNER_OF", "Process"),
                Relationship::new("Process", "HAS_STEP", "Step"),
                Relationship::new("Role", "PERFORMS", "Step"),
                Relationship::new("System", "SUPPORTS", "Step"),
            ],
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Node kinds:\n");
        for (kind, props) in &self.node_kinds {
            out.push_str(&format!("- {kind} {{{}}}\n", props.join(", ")));
        }
        out.push_str("Relationships:\n");
        for rel in &self.relationships {
            out.push_str(&format!(
                "- ({})-[:{}]->({})\n",
                rel.source, rel.name, rel.target
            ));
        }
        out
    }
}

/// What a provider hands back: either the structured schema or, when the
/// source does not match the structured layout, its raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDocument {
    Structured(Schema),
    Unstructured(String),
}

impl SchemaDocument {
    pub fn grounding_text(&self) -> String {
        match self {
            SchemaDocument::Structured(schema) => schema.render(),
            SchemaDocument::Unstructured(raw) => raw.clone(),
        }
    }

    /// Parse text as a structured schema, falling back to passing it through.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Schema>(text) {
            Ok(schema) => SchemaDocument::Structured(schema),
            Err(err) => {
                tracing::warn!(error = %err, "schema is not in the structured layout; using it verbatim");
                SchemaDocument::Unstructured(text.to_string())
            }
        }
    }
}

/// Grounding text for prompts; the placeholder stands in for a missing schema.
pub fn grounding_text(doc: Option<&SchemaDocument>) -> String {
    doc.map(SchemaDocument::grounding_text)
        .unwrap_or_else(|| SCHEMA_PLACEHOLDER.to_string())
}

/// Source of the schema description.
///
/// `Ok(None)` means "no schema here"; it is not an error and callers degrade
/// to [`SCHEMA_PLACEHOLDER`].
pub trait SchemaProvider {
    fn load(&self) -> Result<Option<SchemaDocument>, GraphError>;
}

pub const KGASSIST_SCHEMA_PATH_ENV: &str = "KGASSIST_SCHEMA_PATH";
pub const DEFAULT_SCHEMA_PATH: &str = "schema.json";

/// Reads the schema from a JSON file.
#[derive(Debug, Clone)]
pub struct FileSchemaProvider {
    path: PathBuf,
}

impl FileSchemaProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `KGASSIST_SCHEMA_PATH` when set and non-empty, else `schema.json`.
    pub fn from_env() -> Self {
        let path = std::env::var(KGASSIST_SCHEMA_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEMA_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SchemaProvider for FileSchemaProvider {
    fn load(&self) -> Result<Option<SchemaDocument>, GraphError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(SchemaDocument::from_text(&text))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "schema file not found; grounding with placeholder");
                Ok(None)
            }
            Err(err) => Err(GraphError::Schema(format!(
                "{}: {err}",
                self.path.display()
            ))),
        }
    }
}

/// Always yields [`Schema::enterprise_processes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinSchemaProvider;

impl SchemaProvider for BuiltinSchemaProvider {
    fn load(&self) -> Result<Option<SchemaDocument>, GraphError> {
        Ok(Some(SchemaDocument::Structured(Schema::enterprise_processes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let provider = FileSchemaProvider::new(dir.path().join("schema.json"));
        assert_eq!(provider.load().unwrap(), None);
        assert_eq!(grounding_text(None), SCHEMA_PLACEHOLDER);
    }

    #[test]
    fn structured_file_renders_kinds_and_triples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let json = serde_json::to_string(&Schema::enterprise_processes()).unwrap();
        std::fs::write(&path, json).unwrap();

        let doc = FileSchemaProvider::new(&path).load().unwrap().unwrap();
        assert_eq!(doc, SchemaDocument::Structured(Schema::enterprise_processes()));

        let text = doc.grounding_text();
        assert!(text.contains("- Department {Name, Description}"));
        assert!(text.contains("- (Department)-[:IS_OWNER_OF]->(Process)"));
        assert!(text.contains("- (System)-[:SUPPORTS]->(Step)"));
    }

    #[test]
    fn malformed_file_passes_through_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, "Department -> owns -> Process").unwrap();

        let doc = FileSchemaProvider::new(&path).load().unwrap().unwrap();
        assert_eq!(doc.grounding_text(), "Department -> owns -> Process");
    }

    #[test]
    fn unreadable_path_is_reported() {
        let dir = tempdir().unwrap();
        // A directory cannot be read as a file.
        let err = FileSchemaProvider::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, GraphError::Schema(_)));
    }

    #[test]
    fn builtin_schema_has_five_kinds_and_four_relationships() {
        let schema = Schema::enterprise_processes();
        assert_eq!(schema.node_kinds.len(), 5);
        assert_eq!(schema.relationships.len(), 4);
        assert!(BuiltinSchemaProvider.load().unwrap().is_some());
    }
}
