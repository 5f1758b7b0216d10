//! Stock API 模块

mod handler;

use axum::{Router, middleware, routing::get, routing::post, routing::put};

use shared::Role;

use crate::auth::require_role;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/stocks", routes())
}

fn routes() -> Router<ServerState> {
    let main_routes = Router::new()
        .route("/", get(handler::list).post(handler::create))
        .route("/consume", post(handler::consume))
        .route("/{id}", put(handler::update));

    // 逻辑删除只开放给国家级账号
    let delete_routes = Router::new()
        .route("/{id}", axum::routing::delete(handler::delete_lot))
        .layer(middleware::from_fn(require_role(&[Role::National])));

    main_routes.merge(delete_routes)
}
