//! Shared test fixtures

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::Utc;
use fluxion_core::domain::atom::Atom;
use std::time::Duration;

use crate::config::Config;
use crate::engine::Engine;
use crate::repository::{NewAtom, Repositories};

/// `lua-code` connection URL running `source`
pub(crate) fn lua_url(source: &str) -> String {
    format!("lua-code://{}", URL_SAFE_NO_PAD.encode(source))
}

/// `js-code` connection URL running `source`, standard base64 with padding
pub(crate) fn js_url(source: &str) -> String {
    format!("js-code://{}", STANDARD.encode(source))
}

pub(crate) fn test_config() -> Config {
    Config {
        poll_interval: Duration::from_millis(10),
        sandbox_timeout: Duration::from_millis(500),
        sandbox_memory_limit: 16 * 1024 * 1024,
        webhook_timeout: Some(Duration::from_secs(5)),
        ..Config::default()
    }
}

/// In-memory engine with short timeouts
pub(crate) fn engine() -> Engine {
    Engine::in_memory(&test_config()).unwrap()
}

/// Unsaved atom
pub(crate) fn atom(id: i64, name: &str) -> Atom {
    Atom {
        id,
        name: name.to_string(),
        description: None,
        connect_url: "http://localhost/run".to_string(),
        enabled: true,
        owner_id: "u1".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub(crate) fn atom_with_url(url: String) -> Atom {
    Atom {
        connect_url: url,
        ..atom(1, "script")
    }
}

pub(crate) async fn create_atom(repos: &Repositories, owner: &str, name: &str, url: &str) -> Atom {
    repos
        .atoms
        .create(NewAtom {
            name: name.to_string(),
            description: None,
            connect_url: url.to_string(),
            enabled: true,
            owner_id: owner.to_string(),
        })
        .await
        .unwrap()
}
