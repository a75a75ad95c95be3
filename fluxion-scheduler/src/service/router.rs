//! Pipeline Router
//!
//! Decides what runs next after a pipeline-scoped atom succeeds. The
//! declared children of the atom's pipeline node are combined with the
//! routing hints the worker returned:
//!
//! - no hints: every declared child runs with the atom's output
//! - hints: hints naming a declared child run with their own input (or the
//!   output); hints naming anything else are dropped
//! - if a surviving hint is marked `only`, only the `only` hints run
//! - otherwise children no hint mentions still run with the output

use async_trait::async_trait;
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::pipeline::PipelineAtom;
use fluxion_core::domain::worker::{AtomRef, ExecOptions, NextAtomOption};
use serde_json::Value;

use super::launcher::AtomLauncher;
use crate::error::Result;
use crate::events::{AtomEvent, EventHandler, EventKind};
use crate::repository::Repositories;

/// A declared child node together with the atom it runs
#[derive(Debug, Clone)]
pub struct DeclaredChild {
    pub node: PipelineAtom,
    pub atom: Atom,
}

impl DeclaredChild {
    fn matches(&self, hint: &NextAtomOption) -> bool {
        match hint.target() {
            Some(AtomRef::Id(id)) => self.atom.id == id,
            Some(AtomRef::Name(name)) => self.atom.name == name,
            None => false,
        }
    }
}

/// One child scheduled by the router
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub node_id: i64,
    pub atom_id: i64,
    pub input: Value,
}

impl Candidate {
    fn of(child: &DeclaredChild, input: Value) -> Self {
        Self {
            node_id: child.node.id,
            atom_id: child.atom.id,
            input,
        }
    }
}

/// Children to schedule for a finished node
///
/// Hint candidates come first in hint order, then pass-through children in
/// node order.
pub fn resolve_candidates(
    children: &[DeclaredChild],
    output: &Value,
    hints: Option<&[NextAtomOption]>,
) -> Vec<Candidate> {
    let hints = match hints {
        Some(hints) if !hints.is_empty() => hints,
        _ => {
            return children
                .iter()
                .map(|child| Candidate::of(child, output.clone()))
                .collect();
        }
    };

    let surviving: Vec<(&NextAtomOption, &DeclaredChild)> = hints
        .iter()
        .filter_map(|hint| {
            children
                .iter()
                .find(|child| child.matches(hint))
                .map(|child| (hint, child))
        })
        .collect();

    let to_candidate = |(hint, child): &(&NextAtomOption, &DeclaredChild)| {
        Candidate::of(child, hint.input.clone().unwrap_or_else(|| output.clone()))
    };

    if surviving.iter().any(|(hint, _)| hint.only) {
        return surviving
            .iter()
            .filter(|(hint, _)| hint.only)
            .map(to_candidate)
            .collect();
    }

    let mut candidates: Vec<Candidate> = surviving.iter().map(to_candidate).collect();
    candidates.extend(
        children
            .iter()
            .filter(|child| !hints.iter().any(|hint| child.matches(hint)))
            .map(|child| Candidate::of(child, output.clone())),
    );
    candidates
}

/// Continues pipeline runs on `atom.execute.success`
#[derive(Clone)]
pub struct PipelineRouter {
    repos: Repositories,
    launcher: AtomLauncher,
}

impl PipelineRouter {
    pub fn new(repos: Repositories, launcher: AtomLauncher) -> Self {
        Self { repos, launcher }
    }

    async fn node_of(&self, event: &AtomEvent) -> Result<Option<PipelineAtom>> {
        if let Some(id) = event.pipeline_atom_id
            && let Some(node) = self.repos.pipeline_atoms.get_by_id(id, &event.owner_id).await?
        {
            return Ok(Some(node));
        }

        match event.pipeline_id {
            Some(pipeline_id) => {
                self.repos
                    .pipeline_atoms
                    .get_by_atom(event.atom_id, pipeline_id, &event.owner_id)
                    .await
            }
            None => Ok(None),
        }
    }

    async fn declared_children(
        &self,
        node: &PipelineAtom,
        owner_id: &str,
    ) -> Result<Vec<DeclaredChild>> {
        let nodes = self
            .repos
            .pipeline_atoms
            .find_children(node.id, node.pipeline_id, owner_id)
            .await?;

        let mut children = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.repos.atoms.get_by_id(node.atom_id, owner_id).await? {
                Some(atom) => children.push(DeclaredChild { node, atom }),
                None => {
                    tracing::warn!(
                        pipeline_atom_id = node.id,
                        atom_id = node.atom_id,
                        "declared child atom not found, skipping"
                    );
                }
            }
        }
        Ok(children)
    }

    /// Schedules the next atoms of a finished pipeline task
    pub async fn route(&self, event: &AtomEvent) -> Result<()> {
        let Some(node) = self.node_of(event).await? else {
            tracing::warn!(
                atom_id = event.atom_id,
                pipeline_id = ?event.pipeline_id,
                "no pipeline node for finished atom, branch ends"
            );
            return Ok(());
        };

        let children = self.declared_children(&node, &event.owner_id).await?;
        let hints = event.next_atoms.as_deref();
        let candidates = resolve_candidates(&children, &event.output, hints);

        tracing::debug!(
            task_id = event.task_id,
            pipeline_atom_id = node.id,
            declared = children.len(),
            scheduled = candidates.len(),
            "routing pipeline task"
        );

        for candidate in candidates {
            let Some(child) = children.iter().find(|c| c.node.id == candidate.node_id) else {
                continue;
            };

            let options = ExecOptions {
                user_id: Some(event.owner_id.clone()),
                pipeline_id: Some(node.pipeline_id),
                pipeline_task_id: event.pipeline_task_id,
                pipeline_atom_id: Some(candidate.node_id),
                parent_atom_id: Some(event.atom_id),
                parent_task_id: Some(event.task_id),
            };

            if let Err(e) = self
                .launcher
                .execute(&child.atom, candidate.input, options)
                .await
            {
                tracing::warn!(
                    atom_id = candidate.atom_id,
                    parent_task_id = event.task_id,
                    "failed to schedule next atom: {}",
                    e
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for PipelineRouter {
    fn name(&self) -> &str {
        "pipeline-router"
    }

    async fn handle(&self, event: &AtomEvent) -> Result<()> {
        if event.kind != EventKind::Success || !event.is_executed_by_pipeline {
            return Ok(());
        }
        self.route(event).await
    }
}
