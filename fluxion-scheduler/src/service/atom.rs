//! Atom Service
//!
//! Registration, updates and direct execution of atoms.

use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::task::Task;
use fluxion_core::domain::worker::ExecOptions;
use fluxion_core::dto::atom::{CreateAtom, UpdateAtom};
use fluxion_core::dto::{Page, Pagination};
use serde_json::Value;

use super::launcher::AtomLauncher;
use super::{validate_connect_url, validate_id, validate_name, validate_page};
use crate::error::{Error, Result};
use crate::repository::{AtomPatch, NewAtom, Repositories};

#[derive(Clone)]
pub struct AtomService {
    repos: Repositories,
    launcher: AtomLauncher,
}

impl AtomService {
    pub fn new(repos: Repositories, launcher: AtomLauncher) -> Self {
        Self { repos, launcher }
    }

    pub async fn create(&self, owner_id: &str, req: CreateAtom) -> Result<Atom> {
        validate_name("atom", &req.name)?;
        validate_connect_url(&req.connect_url)?;
        self.ensure_name_free(&req.name, owner_id, None).await?;

        let atom = self
            .repos
            .atoms
            .create(NewAtom {
                name: req.name,
                description: req.description,
                connect_url: req.connect_url,
                enabled: req.enabled,
                owner_id: owner_id.to_string(),
            })
            .await?;

        tracing::info!(atom_id = atom.id, name = %atom.name, "atom created");
        Ok(atom)
    }

    pub async fn get(&self, id: i64, owner_id: &str) -> Result<Atom> {
        self.repos
            .atoms
            .get_by_id(id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("atom", id))
    }

    pub async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Atom>> {
        self.repos.atoms.list(owner_id, validate_page(page)?).await
    }

    pub async fn update(&self, id: i64, owner_id: &str, req: UpdateAtom) -> Result<Atom> {
        if let Some(name) = &req.name {
            validate_name("atom", name)?;
            self.ensure_name_free(name, owner_id, Some(id)).await?;
        }
        if let Some(url) = &req.connect_url {
            validate_connect_url(url)?;
        }

        self.repos
            .atoms
            .update(
                id,
                owner_id,
                AtomPatch {
                    name: req.name,
                    description: req.description,
                    connect_url: req.connect_url,
                    enabled: req.enabled,
                },
            )
            .await?
            .ok_or_else(|| Error::not_found("atom", id))
    }

    /// Schedules a direct execution; returns the pending task
    pub async fn execute(&self, id: i64, owner_id: &str, input: Value) -> Result<Task> {
        let atom = self.get(id, owner_id).await?;
        if !atom.enabled {
            return Err(Error::Validation(format!("atom {} is disabled", id)));
        }

        self.launcher
            .execute(&atom, input, ExecOptions::for_user(owner_id))
            .await
    }

    /// Tasks of an atom, newest first
    pub async fn tasks(&self, id: i64, owner_id: &str, page: Pagination) -> Result<Page<Task>> {
        validate_id("atom id", id)?;
        let page = validate_page(page)?;
        self.get(id, owner_id).await?;
        self.repos.tasks.find_by_atom(id, owner_id, page).await
    }

    async fn ensure_name_free(
        &self,
        name: &str,
        owner_id: &str,
        except: Option<i64>,
    ) -> Result<()> {
        match self.repos.atoms.get_by_name(name, owner_id).await? {
            Some(existing) if Some(existing.id) != except => Err(Error::Validation(format!(
                "atom name '{}' is already taken",
                name
            ))),
            _ => Ok(()),
        }
    }
}
