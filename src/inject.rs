//! Parameter injection into well-known node types.
//!
//! Workflows are generic; the runner only knows a handful of class types
//! by name (see [`NodeProfile`]). Each one has a fixed role: receive the
//! caller's free text, receive a fresh seed, or push the final image
//! over the WebSocket.

use rand::Rng;
use serde_json::Value;

use crate::error::{Result, RunnerError};
use crate::workflow::WorkflowDocument;

/// A class type plus the input key the runner writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSlot {
    pub class_type: String,
    pub input: String,
}

impl NodeSlot {
    pub fn new(class_type: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            input: input.into(),
        }
    }
}

/// Which class types play which role in a workflow.
///
/// Defaults match the custom nodes the stock workflows are built with:
/// `GeminiFlash.Additional_Context`, `Hua_gradio_Seed.seed` and
/// `SaveImageWebsocket`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProfile {
    pub context: NodeSlot,
    pub seed: NodeSlot,
    pub image_sink: String,
}

impl Default for NodeProfile {
    fn default() -> Self {
        Self {
            context: NodeSlot::new("GeminiFlash", "Additional_Context"),
            seed: NodeSlot::new("Hua_gradio_Seed", "seed"),
            image_sink: "SaveImageWebsocket".to_string(),
        }
    }
}

/// What happened to the context text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextOutcome {
    Applied { node: String },
    MissingInput { node: String },
    NoNode,
}

/// What happened to the seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The seed node got a freshly drawn value; the caller's hint was dropped.
    Randomized { node: String, seed: u64 },
    MissingInput { node: String },
    NoNode,
}

/// Summary of one injection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub context: ContextOutcome,
    pub seed: SeedOutcome,
    pub output_node: String,
}

impl NodeProfile {
    /// Write `text` into the first context node, if it declares the input.
    pub fn apply_context(&self, doc: &mut WorkflowDocument, text: &str) -> ContextOutcome {
        let slot = &self.context;
        let Some(node) = doc.find_first(&slot.class_type).map(str::to_string) else {
            tracing::warn!(
                class_type = %slot.class_type,
                "No context node in workflow, context text not applied"
            );
            return ContextOutcome::NoNode;
        };

        match doc.set_input(&node, &slot.input, Value::String(text.to_string())) {
            Ok(()) => {
                tracing::info!(node = %node, input = %slot.input, "Applied context text");
                ContextOutcome::Applied { node }
            }
            Err(_) => {
                tracing::warn!(
                    node = %node,
                    input = %slot.input,
                    "Context node found but it has no such input"
                );
                ContextOutcome::MissingInput { node }
            }
        }
    }

    /// Give the first seed node a new random seed.
    ///
    /// `seed_hint` is accepted for interface parity with the front end but
    /// is never written: the seed node always gets a fresh `u64`.
    pub fn apply_random_seed(&self, doc: &mut WorkflowDocument, seed_hint: i64) -> SeedOutcome {
        let slot = &self.seed;
        let Some(node) = doc.find_first(&slot.class_type).map(str::to_string) else {
            tracing::warn!(
                class_type = %slot.class_type,
                seed_hint,
                "No seed node in workflow, seed not applied"
            );
            return SeedOutcome::NoNode;
        };

        if !doc.has_input(&node, &slot.input) {
            tracing::warn!(node = %node, input = %slot.input, "Seed node has no seed input");
            return SeedOutcome::MissingInput { node };
        }

        let seed: u64 = rand::rng().random();
        match doc.set_input(&node, &slot.input, Value::from(seed)) {
            Ok(()) => {
                tracing::info!(node = %node, seed, seed_hint, "Applied random seed, hint ignored");
                SeedOutcome::Randomized { node, seed }
            }
            Err(_) => SeedOutcome::MissingInput { node },
        }
    }

    /// Pick the node whose bytes will be collected from the stream.
    ///
    /// A non-blank hint naming an image-sink node wins. Anything else falls
    /// back to the first image-sink node in the document.
    pub fn resolve_output_node(&self, doc: &WorkflowDocument, hint: &str) -> Result<String> {
        let hint = hint.trim();
        if !hint.is_empty() {
            match doc.get(hint) {
                Some(node) if node.class_type == self.image_sink => {
                    tracing::info!(node = hint, "Using requested output node");
                    return Ok(hint.to_string());
                }
                _ => tracing::warn!(
                    node = hint,
                    class_type = %self.image_sink,
                    "Requested output node is missing or has the wrong type, auto-detecting"
                ),
            }
        }

        match doc.find_first(&self.image_sink) {
            Some(node) => {
                tracing::info!(node, "Auto-detected output node");
                Ok(node.to_string())
            }
            None => Err(RunnerError::NoOutputSink(format!(
                "Workflow has no '{}' node and no valid output node id was given",
                self.image_sink
            ))),
        }
    }

    /// Apply context and seed, then resolve the output node.
    pub fn inject(
        &self,
        doc: &mut WorkflowDocument,
        context_text: &str,
        seed_hint: i64,
        output_node_hint: &str,
    ) -> Result<Injection> {
        let context = self.apply_context(doc, context_text);
        let seed = self.apply_random_seed(doc, seed_hint);
        let output_node = self.resolve_output_node(doc, output_node_hint)?;
        Ok(Injection {
            context,
            seed,
            output_node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> WorkflowDocument {
        WorkflowDocument::from_value(value).unwrap()
    }

    fn full_workflow() -> WorkflowDocument {
        doc(json!({
            "5": {"class_type": "GeminiFlash", "inputs": {"Additional_Context": "", "prompt": "x"}},
            "6": {"class_type": "Hua_gradio_Seed", "inputs": {"seed": 12345}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}},
            "16": {"class_type": "SaveImageWebsocket", "inputs": {"images": ["8", 0]}},
            "17": {"class_type": "SaveImageWebsocket", "inputs": {"images": ["8", 0]}}
        }))
    }

    #[test]
    fn test_context_applied() {
        let mut wf = full_workflow();
        let outcome = NodeProfile::default().apply_context(&mut wf, "boy");
        assert_eq!(outcome, ContextOutcome::Applied { node: "5".into() });
        assert_eq!(wf.input("5", "Additional_Context"), Some(&json!("boy")));
    }

    #[test]
    fn test_context_node_without_input_is_not_fatal() {
        let mut wf = doc(json!({"1": {"class_type": "GeminiFlash", "inputs": {"prompt": "x"}}}));
        let outcome = NodeProfile::default().apply_context(&mut wf, "boy");
        assert_eq!(outcome, ContextOutcome::MissingInput { node: "1".into() });
        assert!(!wf.has_input("1", "Additional_Context"));
    }

    #[test]
    fn test_context_without_node() {
        let mut wf = doc(json!({"1": {"class_type": "KSampler", "inputs": {}}}));
        assert_eq!(
            NodeProfile::default().apply_context(&mut wf, "boy"),
            ContextOutcome::NoNode
        );
    }

    #[test]
    fn test_seed_is_randomized_not_hint() {
        let mut wf = full_workflow();
        let outcome = NodeProfile::default().apply_random_seed(&mut wf, 12345);
        let SeedOutcome::Randomized { node, seed } = outcome else {
            panic!("expected randomized seed, got {:?}", outcome);
        };
        assert_eq!(node, "6");
        assert_eq!(wf.input("6", "seed"), Some(&json!(seed)));
        assert_ne!(wf.input("6", "seed"), Some(&json!(12345)));
    }

    #[test]
    fn test_seed_values_vary() {
        let profile = NodeProfile::default();
        let seeds: Vec<u64> = (0..4)
            .map(|_| {
                let mut wf = full_workflow();
                match profile.apply_random_seed(&mut wf, 1) {
                    SeedOutcome::Randomized { seed, .. } => seed,
                    other => panic!("unexpected {:?}", other),
                }
            })
            .collect();
        assert!(seeds.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_seed_node_without_seed_input() {
        let mut wf = doc(json!({"6": {"class_type": "Hua_gradio_Seed", "inputs": {}}}));
        assert_eq!(
            NodeProfile::default().apply_random_seed(&mut wf, 7),
            SeedOutcome::MissingInput { node: "6".into() }
        );
        assert!(!wf.has_input("6", "seed"));
    }

    #[test]
    fn test_output_hint_used_when_valid() {
        let wf = full_workflow();
        let node = NodeProfile::default().resolve_output_node(&wf, " 17 ").unwrap();
        assert_eq!(node, "17");
    }

    #[test]
    fn test_output_hint_wrong_type_falls_back() {
        let wf = full_workflow();
        let profile = NodeProfile::default();
        assert_eq!(profile.resolve_output_node(&wf, "9").unwrap(), "16");
        assert_eq!(profile.resolve_output_node(&wf, "404").unwrap(), "16");
        assert_eq!(profile.resolve_output_node(&wf, "   ").unwrap(), "16");
    }

    #[test]
    fn test_no_output_sink() {
        let wf = doc(json!({"9": {"class_type": "SaveImage", "inputs": {}}}));
        let err = NodeProfile::default()
            .resolve_output_node(&wf, "")
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NoOutputSink);
    }

    #[test]
    fn test_custom_profile() {
        let profile = NodeProfile {
            context: NodeSlot::new("CLIPTextEncode", "text"),
            seed: NodeSlot::new("KSampler", "seed"),
            image_sink: "ETN_SendImageWebSocket".into(),
        };
        let mut wf = doc(json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
            "20": {"class_type": "ETN_SendImageWebSocket", "inputs": {}}
        }));
        let injection = profile.inject(&mut wf, "a castle", 0, "").unwrap();
        assert_eq!(injection.output_node, "20");
        assert_eq!(wf.input("4", "text"), Some(&json!("a castle")));
        assert!(matches!(injection.seed, SeedOutcome::Randomized { .. }));
    }

    #[test]
    fn test_inject_fails_without_sink() {
        let mut wf = doc(json!({"5": {"class_type": "GeminiFlash", "inputs": {"Additional_Context": ""}}}));
        assert!(NodeProfile::default().inject(&mut wf, "x", 0, "").is_err());
    }
}
