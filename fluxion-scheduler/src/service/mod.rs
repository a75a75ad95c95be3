//! Service Module
//!
//! Layered bottom-up: the launcher schedules tasks, the execution service
//! and the pipeline router build on it, and the CRUD services sit on top.

pub mod atom;
pub mod execution;
pub mod launcher;
pub mod pipeline;
pub mod router;
pub mod task;

pub use atom::AtomService;
pub use execution::ExecutionService;
pub use launcher::AtomLauncher;
pub use pipeline::PipelineService;
pub use router::PipelineRouter;
pub use task::TaskService;

use fluxion_core::ConnectUrl;
use fluxion_core::dto::Pagination;

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 255;

pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation(format!("{} name cannot be empty", kind)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "{} name cannot be longer than {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    Ok(())
}

pub(crate) fn validate_connect_url(url: &str) -> Result<()> {
    ConnectUrl::parse(url)?;
    Ok(())
}

pub(crate) fn validate_page(page: Pagination) -> Result<Pagination> {
    page.validate().map_err(Error::Validation)?;
    Ok(page)
}

pub(crate) fn validate_id(field: &str, id: i64) -> Result<()> {
    if id <= 0 {
        return Err(Error::Validation(format!(
            "{} must be a positive integer, got {}",
            field, id
        )));
    }
    Ok(())
}
