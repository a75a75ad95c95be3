//! API Module
//!
//! HTTP API of the scheduler. Each submodule handles the endpoints of one
//! entity; all of them act on behalf of the `x-user-id` owner.

pub mod atom;
pub mod error;
pub mod health;
pub mod owner;
pub mod pipeline;
pub mod task;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

/// Create the main API router with all endpoints
pub fn create_router(engine: Engine) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Atom endpoints
        .route("/atom", post(atom::create_atom))
        .route("/atom/list", get(atom::list_atoms))
        .route("/atom/{id}", get(atom::get_atom).put(atom::update_atom))
        .route("/atom/{id}/execute", post(atom::execute_atom))
        .route("/atom/{id}/tasks", get(atom::list_atom_tasks))
        // Pipeline endpoints
        .route("/pipeline", post(pipeline::create_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route(
            "/pipeline/{id}",
            get(pipeline::get_pipeline).put(pipeline::update_pipeline),
        )
        .route("/pipeline/{id}/execute", post(pipeline::execute_pipeline))
        .route(
            "/pipeline/{id}/atoms",
            get(pipeline::list_pipeline_atoms).post(pipeline::add_pipeline_atom),
        )
        .route(
            "/pipeline/{id}/atoms/batch",
            post(pipeline::batch_create_pipeline_atoms),
        )
        .route("/pipeline/{id}/tasks", get(pipeline::list_pipeline_tasks))
        // Task endpoints
        .route("/task/{id}", get(task::get_task))
        .route("/pipeline-task/{id}", get(task::get_pipeline_task))
        // Add state and middleware
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine, lua_url};
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    async fn serve(engine: Engine) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(engine);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health() {
        let base = serve(engine()).await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_owner_header_is_required() {
        let base = serve(engine()).await;

        let response = reqwest::get(format!("{}/atom/list", base)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "missing x-user-id header");
    }

    #[tokio::test]
    async fn test_atom_lifecycle_over_http() {
        let engine = engine();
        let base = serve(engine.clone()).await;
        let client = reqwest::Client::new();

        let atom: Value = client
            .post(format!("{}/atom", base))
            .header("x-user-id", "u1")
            .json(&json!({
                "name": "inc",
                "connect_url": lua_url(
                    "return function(i) return { success = true, output = i + 1 } end"
                ),
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let atom_id = atom["id"].as_i64().unwrap();

        let task: Value = client
            .post(format!("{}/atom/{}/execute", base, atom_id))
            .header("x-user-id", "u1")
            .json(&json!({ "input": 41 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task["status"], "pending");

        engine.drain_queue().await.unwrap();

        let detail: Value = client
            .get(format!("{}/task/{}", base, task["id"]))
            .header("x-user-id", "u1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["status"], "succeed");
        assert_eq!(detail["result"]["output"], 42);

        let missing = client
            .get(format!("{}/atom/{}", base, atom_id))
            .header("x-user-id", "someone-else")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let listed: Value = client
            .get(format!("{}/atom/{}/tasks?page=1&per_page=10", base, atom_id))
            .header("x-user-id", "u1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["total"], 1);
    }

    #[tokio::test]
    async fn test_pipeline_run_over_http() {
        let engine = engine();
        let base = serve(engine.clone()).await;
        let client = reqwest::Client::new();

        let atom: Value = client
            .post(format!("{}/atom", base))
            .header("x-user-id", "u1")
            .json(&json!({
                "name": "echo",
                "connect_url": lua_url("return function(i) return { success = true, output = i } end"),
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let pipeline: Value = client
            .post(format!("{}/pipeline", base))
            .header("x-user-id", "u1")
            .json(&json!({ "name": "p" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let pipeline_id = pipeline["id"].as_i64().unwrap();

        let batch = client
            .post(format!("{}/pipeline/{}/atoms/batch", base, pipeline_id))
            .header("x-user-id", "u1")
            .json(&json!({
                "atom_id": atom["id"],
                "next_atoms": [{ "atom_id": atom["id"] }]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(batch.status(), StatusCode::OK);

        let run: Value = client
            .post(format!("{}/pipeline/{}/execute", base, pipeline_id))
            .header("x-user-id", "u1")
            .json(&json!({ "input": "hi" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        engine.drain_queue().await.unwrap();

        let detail: Value = client
            .get(format!("{}/pipeline-task/{}?load_tasks=true", base, run["id"]))
            .header("x-user-id", "u1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["run_status"], "succeed");
        assert_eq!(detail["tasks"][0]["next_tasks"][0]["result"]["output"], "hi");

        let runs: Value = client
            .get(format!("{}/pipeline/{}/tasks", base, pipeline_id))
            .header("x-user-id", "u1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(runs["total"], 1);
    }

    #[tokio::test]
    async fn test_invalid_connect_url_is_bad_request() {
        let base = serve(engine()).await;

        let response = reqwest::Client::new()
            .post(format!("{}/atom", base))
            .header("x-user-id", "u1")
            .json(&json!({ "name": "x", "connect_url": "no scheme" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
