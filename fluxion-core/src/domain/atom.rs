//! Atom domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, independently executable unit of work
///
/// `connect_url` encodes both how to run the atom (its scheme picks the
/// worker) and what to run (an endpoint, or embedded script source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub id: i64,
    /// Unique per owner
    pub name: String,
    pub description: Option<String>,
    pub connect_url: String,
    pub enabled: bool,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Atom {
    /// Returns a copy of this atom that runs `connect_url` instead of its own.
    ///
    /// Mapping code is dispatched like an atom, but under the identity of the
    /// atom it belongs to.
    pub fn with_connect_url(&self, connect_url: impl Into<String>) -> Self {
        Self {
            connect_url: connect_url.into(),
            ..self.clone()
        }
    }
}
