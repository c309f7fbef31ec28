//! Defines routes for the health probes and the admin upload API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz` : liveness
//!   - `GET  /readyz`  : readiness (SQLite)
//!
//! - **Admin uploads** (require `x-admin-key`)
//!   - `POST /api/admin/uploads/create`   : open a multipart session
//!   - `POST /api/admin/uploads/complete` : commit parts, mark media ready
//!   - `POST /api/admin/uploads/presign`  : presign a single derived asset
//!   - `GET  /api/admin/uploads/debug`    : storage config diagnostics

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{complete_upload, create_upload, presign_upload, upload_diagnostics},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the application router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/admin/uploads/create", post(create_upload))
        .route("/api/admin/uploads/complete", post(complete_upload))
        .route("/api/admin/uploads/presign", post(presign_upload))
        .route("/api/admin/uploads/debug", get(upload_diagnostics))
}

/// Router with state attached, ready to serve.
pub fn app(state: AppState) -> Router {
    routes().with_state(state)
}
