//! DexterHub: cohort-based course delivery with enrollment, grading and a
//! drop/appeal review process behind a JSON API.
//!
//! Workflows live in `accounts`, `catalog`, `enrollment`, `submissions` and
//! `review`; each takes the shared [`state::AppState`] and the calling
//! [`policy::Actor`]. `routes` is a thin axum layer over them.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod accounts;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod extract;
pub mod grading;
pub mod models;
pub mod policy;
pub mod review;
pub mod routes;
pub mod state;
pub mod store;
pub mod submissions;

pub fn app(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
