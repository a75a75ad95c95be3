//! Atom DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn enabled_by_default() -> bool {
    true
}

/// Request to register an atom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAtom {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub connect_url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Partial update of an atom; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAtom {
    pub name: Option<String>,
    pub description: Option<String>,
    pub connect_url: Option<String>,
    pub enabled: Option<bool>,
}

/// Request to execute an atom directly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteAtom {
    #[serde(default)]
    pub input: Value,
}
