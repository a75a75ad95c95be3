//! Worker wire contract
//!
//! Every executor, whatever its transport, answers with a [`WorkerResult`].
//! The same envelope is what a webhook endpoint must return as its JSON body
//! and what a sandboxed script's entry point must produce.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Response envelope of an atom execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub success: bool,
    /// Output payload, or an error description when `success` is false
    #[serde(default)]
    pub output: Value,
    /// Routing hints for what should run next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_atoms: Option<Vec<NextAtomOption>>,
}

impl WorkerResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            next_atoms: None,
        }
    }

    /// Failed result carrying `{"error": message}` as its output
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: json!({ "error": message.into() }),
            next_atoms: None,
        }
    }

    pub fn with_next_atoms(mut self, next_atoms: Vec<NextAtomOption>) -> Self {
        self.next_atoms = Some(next_atoms);
        self
    }

    /// Structural validation beyond what deserialization enforces
    pub fn validate(&self) -> Result<(), String> {
        if let Some(next_atoms) = &self.next_atoms {
            for (i, option) in next_atoms.iter().enumerate() {
                option
                    .validate()
                    .map_err(|e| format!("nextAtoms[{}]: {}", i, e))?;
            }
        }
        Ok(())
    }

    /// Non-empty routing hints, if any
    pub fn routing_hints(&self) -> Option<&[NextAtomOption]> {
        match &self.next_atoms {
            Some(hints) if !hints.is_empty() => Some(hints),
            _ => None,
        }
    }
}

/// One routing hint returned by a worker
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAtomOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_name: Option<String>,
    /// Input for the target; the producing atom's output when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default)]
    pub only: bool,
}

/// How a routing hint names its target atom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomRef<'a> {
    Id(i64),
    Name(&'a str),
}

impl NextAtomOption {
    pub fn by_id(atom_id: i64) -> Self {
        Self {
            atom_id: Some(atom_id),
            ..Default::default()
        }
    }

    pub fn by_name(atom_name: impl Into<String>) -> Self {
        Self {
            atom_name: Some(atom_name.into()),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    /// Target of this hint; `atom_id` takes priority over `atom_name`
    pub fn target(&self) -> Option<AtomRef<'_>> {
        match (self.atom_id, self.atom_name.as_deref()) {
            (Some(id), _) if id > 0 => Some(AtomRef::Id(id)),
            (_, Some(name)) if !name.is_empty() => Some(AtomRef::Name(name)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = self.atom_id
            && id <= 0
        {
            return Err(format!("atomId must be a positive integer, got {}", id));
        }
        if self.target().is_none() {
            return Err("one of atomId or atomName is required".to_string());
        }
        Ok(())
    }
}

/// Execution context handed to workers and carried by queue jobs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_task_id: Option<i64>,
    /// Pipeline node the task was scheduled for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_atom_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_atom_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<i64>,
}

impl ExecOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn is_executed_by_pipeline(&self) -> bool {
        self.pipeline_task_id.is_some_and(|id| id > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_result_from_webhook_body() {
        let body = json!({
            "success": true,
            "output": {"n": 2},
            "nextAtoms": [
                {"atomId": 3, "input": 5},
                {"atomName": "notify", "only": true}
            ]
        });

        let result: WorkerResult = serde_json::from_value(body).unwrap();
        assert!(result.success);
        assert_eq!(result.output, json!({"n": 2}));

        let hints = result.routing_hints().unwrap();
        assert_eq!(hints[0].target(), Some(AtomRef::Id(3)));
        assert_eq!(hints[0].input, Some(json!(5)));
        assert!(!hints[0].only);
        assert_eq!(hints[1].target(), Some(AtomRef::Name("notify")));
        assert!(hints[1].only);
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_missing_success_flag_is_rejected() {
        let body = json!({ "output": 1 });
        assert!(serde_json::from_value::<WorkerResult>(body).is_err());
    }

    #[test]
    fn test_atom_id_takes_priority_over_name() {
        let option = NextAtomOption {
            atom_id: Some(7),
            atom_name: Some("other".to_string()),
            ..Default::default()
        };
        assert_eq!(option.target(), Some(AtomRef::Id(7)));
    }

    #[test]
    fn test_hint_without_target_fails_validation() {
        let result = WorkerResult::success(json!(null)).with_next_atoms(vec![
            NextAtomOption::by_id(1),
            NextAtomOption::default(),
        ]);
        let err = result.validate().unwrap_err();
        assert!(err.starts_with("nextAtoms[1]"));

        assert!(NextAtomOption::by_id(0).validate().is_err());
        assert!(NextAtomOption::by_name("").validate().is_err());
    }

    #[test]
    fn test_empty_hint_list_means_no_hints() {
        let result = WorkerResult::success(json!(1)).with_next_atoms(vec![]);
        assert!(result.routing_hints().is_none());
    }

    #[test]
    fn test_failure_envelope() {
        let result = WorkerResult::failure("boom");
        assert!(!result.success);
        assert_eq!(result.output, json!({"error": "boom"}));
    }

    #[test]
    fn test_pipeline_scope() {
        assert!(!ExecOptions::default().is_executed_by_pipeline());
        let options = ExecOptions {
            pipeline_task_id: Some(4),
            ..Default::default()
        };
        assert!(options.is_executed_by_pipeline());

        let wire = serde_json::to_value(&options).unwrap();
        assert_eq!(wire, json!({"pipelineTaskId": 4}));
    }
}
