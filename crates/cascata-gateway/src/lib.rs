//! The Cascata gateway: the API-plane process described in §4. A single `axum` router handles
//! both tenant data-plane traffic (`/api/data/:slug/...`) and control-plane admin traffic
//! (`/api/control/...`), gated by one ordered middleware ([`pipeline::run`]) rather than per-route
//! guards, so every request passes through tenant resolution, CORS, authorisation, body-size and
//! rate limiting in the same order regardless of which handler it eventually reaches.

pub mod acquire;
pub mod auth;
pub mod config;
pub mod control_plane;
pub mod cors;
pub mod data_controller;
pub mod directory;
pub mod error;
pub mod panic_shield;
pub mod pipeline;
pub mod pool_registry;
pub mod rate_limit;
pub mod realtime;
pub mod routes;
pub mod state;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

pub use state::{build_state, AppState};

/// Assembles the full route table. Every route (save `/healthz` and `/readyz`, which
/// [`pipeline::run`] lets through unconditionally) passes through the same middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .merge(control_routes())
        .merge(data_routes())
        .layer(middleware::from_fn_with_state(state.clone(), pipeline::run))
        .with_state(state)
}

fn control_routes() -> Router<AppState> {
    Router::new()
        .route("/api/control/auth/login", post(control_plane::login))
        .route("/api/control/auth/verify", post(control_plane::verify))
        .route(
            "/api/control/projects",
            get(control_plane::list_projects).post(control_plane::create_project),
        )
        .route(
            "/api/control/projects/import/upload",
            post(control_plane::import_upload),
        )
        .route(
            "/api/control/projects/import/confirm",
            post(control_plane::import_confirm),
        )
        .route(
            "/api/control/projects/:slug",
            get(control_plane::get_project)
                .patch(control_plane::update_project)
                .delete(control_plane::delete_project),
        )
        .route(
            "/api/control/projects/:slug/rotate-keys",
            post(control_plane::rotate_keys),
        )
        .route(
            "/api/control/projects/:slug/reveal-key",
            post(control_plane::reveal_key),
        )
        .route(
            "/api/control/projects/:slug/export",
            get(control_plane::export_project),
        )
        .route(
            "/api/control/projects/:slug/block-ip",
            post(control_plane::block_ip),
        )
        .route(
            "/api/control/projects/:slug/block-ip/:ip",
            delete(control_plane::unblock_ip),
        )
}

fn data_routes() -> Router<AppState> {
    Router::new()
        .route("/api/data/:slug/tables", get(routes::list_tables))
        .route("/api/data/:slug/tables/:table/columns", get(routes::get_columns))
        .route("/api/data/:slug/functions", get(routes::list_functions))
        .route(
            "/api/data/:slug/functions/:name/definition",
            get(routes::function_definition),
        )
        .route("/api/data/:slug/triggers", get(routes::list_triggers))
        .route("/api/data/:slug/stats", get(routes::stats))
        .route("/api/data/:slug/openapi.json", get(routes::openapi))
        .route("/api/data/:slug/query", post(routes::raw_query))
        .route("/api/data/:slug/rpc/:name", post(routes::rpc))
        .route("/api/data/:slug/schema/tables", post(routes::create_table))
        .route(
            "/api/data/:slug/schema/tables/:table",
            delete(routes::delete_table),
        )
        .route(
            "/api/data/:slug/schema/recycle-bin",
            get(routes::recycle_bin),
        )
        .route(
            "/api/data/:slug/schema/recycle-bin/:deleted_name/restore",
            post(routes::restore_table),
        )
        .route("/api/data/:slug/realtime", get(routes::realtime))
        .route("/api/data/:slug/push/devices", post(routes::register_device))
        .route("/api/data/:slug/push/send", post(routes::send_push))
        .route(
            "/api/data/:slug/push/rules",
            get(routes::list_rules).post(routes::create_rule),
        )
        .route(
            "/api/data/:slug/push/rules/:id",
            delete(routes::delete_rule),
        )
        .route(
            "/api/data/:slug/:table",
            get(routes::select_rows)
                .post(routes::insert_rows)
                .patch(routes::update_rows)
                .delete(routes::delete_rows),
        )
}
