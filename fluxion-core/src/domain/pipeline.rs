//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A graph of atoms with a designated root node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    /// Unique per owner
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// References a [`PipelineAtom`], not an atom directly
    pub root_atom_id: Option<i64>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One node of a pipeline's atom graph
///
/// Nodes form a tree through `parent_atom_id`, which points at another
/// `PipelineAtom` of the same pipeline. Several nodes may reference the same
/// atom. Mapping codes are connection URLs dispatched like atoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineAtom {
    pub id: i64,
    pub parent_atom_id: Option<i64>,
    pub pipeline_id: i64,
    pub atom_id: i64,
    pub input_mapping_code: Option<String>,
    pub output_mapping_code: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}
