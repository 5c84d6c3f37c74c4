use std::sync::Arc;

use axum::{
    routing::get,
    Router,
};

use crate::service::ColumnService;

pub mod error;
pub mod handlers;
pub mod pagination;

pub use error::{ApiError, ErrorKind};
pub use pagination::Pagination;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ColumnService>,
    pub pagination: Pagination,
}

impl AppState {
    pub fn new(service: ColumnService, pagination: Pagination) -> Self {
        Self {
            service: Arc::new(service),
            pagination,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let columns = Router::new()
        .route(
            "/tables/{table_pk}/columns/",
            get(handlers::list).post(handlers::create),
        )
        .route(
            "/tables/{table_pk}/columns/{pk}/",
            get(handlers::retrieve)
                .patch(handlers::partial_update)
                .delete(handlers::destroy),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v0", columns)
        .fallback(handlers::not_found)
        .with_state(state)
}
