use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};

/// A ComfyUI workflow in API format: node id → `{class_type, inputs}`.
///
/// Iteration follows document order, so "first node of a type" is the
/// first one written in the file.
///
/// # Example
/// ```
/// use comfyui_ws_runner::WorkflowDocument;
///
/// let mut doc = WorkflowDocument::from_json_str(r#"{
///     "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 20}},
///     "9": {"class_type": "SaveImageWebsocket", "inputs": {"images": ["8", 0]}}
/// }"#).unwrap();
///
/// assert_eq!(doc.find_first("KSampler"), Some("3"));
/// doc.set_input("3", "steps", 30.into()).unwrap();
/// assert_eq!(doc.input("3", "steps"), Some(&30.into()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    nodes: Map<String, Value>,
}

/// Borrowed view of one node.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub id: &'a str,
    pub class_type: &'a str,
    pub inputs: Option<&'a Map<String, Value>>,
}

impl WorkflowDocument {
    /// Parse a workflow from its JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Build a workflow from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let nodes = match value {
            Value::Object(map) => map,
            other => {
                return Err(RunnerError::Config(format!(
                    "Workflow must be a JSON object keyed by node id, got {}",
                    json_type(&other)
                )))
            }
        };

        if let Some((id, _)) = nodes.iter().find(|(_, node)| !node.is_object()) {
            return Err(RunnerError::Config(format!(
                "Workflow node '{}' is not a JSON object",
                id
            )));
        }

        Ok(Self { nodes })
    }

    /// Load a workflow file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RunnerError::Io {
            context: format!("Failed to read workflow file {}", path.display()),
            source: e,
        })?;
        Self::from_json_str(&text).map_err(|e| {
            RunnerError::Config(format!(
                "Failed to parse workflow file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Id of the first node whose `class_type` matches.
    pub fn find_first(&self, class_type: &str) -> Option<&str> {
        self.iter()
            .find(|node| node.class_type == class_type)
            .map(|node| node.id)
    }

    /// Overwrite an existing input of an existing node.
    ///
    /// Never creates inputs: a missing node or key is [`RunnerError::NotFound`].
    pub fn set_input(&mut self, node_id: &str, key: &str, value: Value) -> Result<()> {
        let slot = self
            .nodes
            .get_mut(node_id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(|inputs| inputs.as_object_mut())
            .and_then(|inputs| inputs.get_mut(key))
            .ok_or_else(|| RunnerError::NotFound {
                node: node_id.to_string(),
                key: key.to_string(),
            })?;
        *slot = value;
        Ok(())
    }

    /// Whether the node declares the given input.
    pub fn has_input(&self, node_id: &str, key: &str) -> bool {
        self.input(node_id, key).is_some()
    }

    pub fn input(&self, node_id: &str, key: &str) -> Option<&Value> {
        self.get(node_id)?.inputs?.get(key)
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRef<'_>> {
        self.nodes
            .get_key_value(node_id)
            .map(|(id, node)| node_ref(id, node))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.nodes.iter().map(|(id, node)| node_ref(id, node))
    }

    /// The JSON object submitted as `prompt`.
    pub fn as_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }
}

fn node_ref<'a>(id: &'a str, node: &'a Value) -> NodeRef<'a> {
    NodeRef {
        id,
        class_type: node
            .get("class_type")
            .and_then(|v| v.as_str())
            .unwrap_or(""),
        inputs: node.get("inputs").and_then(|v| v.as_object()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// List the `.json` workflow files directly inside `dir`, sorted by name.
pub fn discover_workflows(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| RunnerError::Io {
        context: format!("Failed to scan {} for workflows", dir.display()),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    tracing::debug!(dir = %dir.display(), count = files.len(), "Discovered workflow files");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WORKFLOW: &str = r#"{
        "12": {"class_type": "SaveImageWebsocket", "inputs": {"images": ["8", 0]}},
        "3": {"class_type": "KSampler", "inputs": {"seed": 5, "steps": 20}},
        "7": {"class_type": "SaveImageWebsocket", "inputs": {"images": ["8", 0]}},
        "8": {"class_type": "VAEDecode", "_meta": {"title": "VAE Decode"}}
    }"#;

    fn doc() -> WorkflowDocument {
        WorkflowDocument::from_json_str(WORKFLOW).unwrap()
    }

    #[test]
    fn test_find_first_follows_document_order() {
        assert_eq!(doc().find_first("SaveImageWebsocket"), Some("12"));
        assert_eq!(doc().find_first("KSampler"), Some("3"));
        assert_eq!(doc().find_first("GeminiFlash"), None);
    }

    #[test]
    fn test_set_input_overwrites() {
        let mut doc = doc();
        doc.set_input("3", "seed", json!(42)).unwrap();
        assert_eq!(doc.input("3", "seed"), Some(&json!(42)));
    }

    #[test]
    fn test_set_input_missing_key() {
        let mut doc = doc();
        let err = doc.set_input("3", "cfg", json!(7.0)).unwrap_err();
        assert!(matches!(err, RunnerError::NotFound { .. }));
        assert!(!doc.has_input("3", "cfg"));
    }

    #[test]
    fn test_set_input_missing_node_or_inputs() {
        let mut doc = doc();
        assert!(doc.set_input("99", "seed", json!(1)).is_err());
        assert!(doc.set_input("8", "samples", json!(1)).is_err());
    }

    #[test]
    fn test_extra_fields_survive() {
        let value = doc().as_value();
        assert_eq!(value["8"]["_meta"]["title"], "VAE Decode");
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["12", "3", "7", "8"]);
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(WorkflowDocument::from_json_str("[1, 2]").is_err());
        assert!(WorkflowDocument::from_json_str(r#"{"1": 5}"#).is_err());
        assert!(WorkflowDocument::from_json_str("not json").is_err());
    }

    #[test]
    fn test_node_without_class_type() {
        let doc = WorkflowDocument::from_json_str(r#"{"1": {"inputs": {}}}"#).unwrap();
        assert_eq!(doc.get("1").unwrap().class_type, "");
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = WorkflowDocument::from_path("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn test_discover_workflows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.JSON"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("dir.json")).unwrap();

        let files = discover_workflows(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.JSON", "b.json"]);
    }
}
