use std::sync::Arc;

use config::{Backend, Config};
use db::{
    memory::{ColumnSeed, MemoryCatalog},
    postgres::PostgresCatalog,
    types::ColumnType,
    Catalog,
};
use errors::DbError;
use log::{info, warn};

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod service;

pub use api::{router, AppState, Pagination};
pub use service::ColumnService;

/// Builds the catalog selected by `config`.
///
/// PostgreSQL catalogs get their metadata tables created and the configured
/// schemas registered. A memory catalog starts with one sample table.
pub async fn open_catalog(config: &Config) -> Result<Arc<dyn Catalog>, DbError> {
    match config.backend {
        Backend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| DbError::Config("DATABASE_URL must be set".to_string()))?;
            let catalog = PostgresCatalog::connect(url, config.max_connections).await?;
            catalog.ensure_schema().await?;
            catalog.reflect(&config.schemas).await?;
            info!("registered tables from schemas {:?}", config.schemas);
            Ok(Arc::new(catalog))
        }
        Backend::Memory => {
            warn!("using the in-memory backend; changes are lost on exit");
            let catalog = MemoryCatalog::new();
            let schema = config
                .schemas
                .first()
                .map(String::as_str)
                .unwrap_or("public");
            let table = catalog
                .create_table(
                    schema,
                    "library",
                    vec![
                        ColumnSeed::new("id", ColumnType::Integer).primary_key(),
                        ColumnSeed::new("title", ColumnType::Text).not_null(),
                        ColumnSeed::new("added", ColumnType::TimestampTz)
                            .default_expr("now()"),
                    ],
                )
                .await;
            info!("seeded table {}.{} with id {}", table.schema, table.name, table.id);
            Ok(Arc::new(catalog))
        }
    }
}

/// The application state for `config`, backed by `catalog`.
pub fn app_state(config: &Config, catalog: Arc<dyn Catalog>) -> AppState {
    AppState::new(
        ColumnService::new(catalog),
        Pagination {
            default_limit: config.page_limit,
            max_limit: config.max_page_limit,
        },
    )
}
