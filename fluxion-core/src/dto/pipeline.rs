//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::pipeline::PipelineAtom;

fn enabled_by_default() -> bool {
    true
}

/// Request to create a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Partial update of a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePipeline {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    /// Pipeline atom to use as the entry node
    pub root_atom_id: Option<i64>,
}

/// Request to add a single node to a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipelineAtom {
    pub atom_id: i64,
    #[serde(default)]
    pub parent_atom_id: Option<i64>,
    #[serde(default)]
    pub input_mapping_code: Option<String>,
    #[serde(default)]
    pub output_mapping_code: Option<String>,
}

/// Nested description of a pipeline atom subtree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineAtomTree {
    pub atom_id: i64,
    #[serde(default)]
    pub input_mapping_code: Option<String>,
    #[serde(default)]
    pub output_mapping_code: Option<String>,
    #[serde(default)]
    pub next_atoms: Vec<PipelineAtomTree>,
}

/// One node of a flattened [`PipelineAtomTree`]
///
/// `parent` indexes into the flattened list; parents always precede their
/// children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPipelineAtom {
    pub atom_id: i64,
    pub parent: Option<usize>,
    pub input_mapping_code: Option<String>,
    pub output_mapping_code: Option<String>,
}

impl PipelineAtomTree {
    /// Flattens the tree depth-first, pre-order
    pub fn flatten(&self) -> Vec<PlannedPipelineAtom> {
        let mut planned = Vec::new();
        let mut stack: Vec<(&PipelineAtomTree, Option<usize>)> = vec![(self, None)];

        while let Some((node, parent)) = stack.pop() {
            let idx = planned.len();
            planned.push(PlannedPipelineAtom {
                atom_id: node.atom_id,
                parent,
                input_mapping_code: node.input_mapping_code.clone(),
                output_mapping_code: node.output_mapping_code.clone(),
            });
            for child in node.next_atoms.iter().rev() {
                stack.push((child, Some(idx)));
            }
        }

        planned
    }
}

/// Result of a batch tree creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineAtomBatch {
    pub root: PipelineAtom,
    /// Every created node, root first, in traversal order
    pub atoms: Vec<PipelineAtom>,
}

/// Request to run a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutePipeline {
    #[serde(default)]
    pub input: Value,
}
