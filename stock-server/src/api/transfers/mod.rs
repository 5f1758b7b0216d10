//! Transfer API 模块

mod handler;

use axum::{Router, routing::get, routing::post, routing::put};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/stocks/transfers", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/initiate", post(handler::initiate))
        .route("/incoming", get(handler::incoming))
        .route("/outgoing", get(handler::outgoing))
        .route("/history", get(handler::history))
        .route("/{id}/accept", put(handler::accept))
        .route("/{id}/reject", put(handler::reject))
        .route("/{id}/cancel", put(handler::cancel))
}
