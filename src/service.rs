use std::sync::Arc;

use axum::http::StatusCode;
use log::{info, warn};
use serde_json::{json, Value};

use crate::{
    api::error::{ApiError, ErrorKind},
    cache::TableCache,
    db::{defaults::literal_text, types::ColumnType, Catalog, SchemaSession},
    errors::DbError,
    models::{
        requests::{ColumnDefinition, ColumnSource, CreateColumn, DuplicateColumn, UpdateColumn},
        schema::{Column, NewColumn, Page, Table},
    },
};

const DYNAMIC_DEFAULT_MESSAGE: &str = "Changing type of columns with dynamically-generated \
    defaults is not supported. Delete or change the default first.";

pub struct ColumnService {
    catalog: Arc<dyn Catalog>,
    cache: TableCache,
}

impl ColumnService {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            cache: TableCache::new(),
        }
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    /// Loads a table, answering 404 when it is not registered.
    pub async fn table(&self, table_id: i64) -> Result<Table, ApiError> {
        if let Some(table) = self.cache.get(table_id).await {
            return Ok(table);
        }
        let table = self
            .catalog
            .get_table(table_id)
            .await
            .map_err(ApiError::unexpected)?
            .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "Table not found."))?;
        self.cache.insert(table.clone()).await;
        Ok(table)
    }

    /// Columns whose attnum is live in the physical schema, by attnum.
    pub async fn list(
        &self,
        table_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Column>, ApiError> {
        let table = self.table(table_id).await?;
        let names = self
            .catalog
            .column_names(&table)
            .await
            .map_err(ApiError::unexpected)?;
        let attnums = self
            .catalog
            .resolve_attnums(table.oid, &names)
            .await
            .map_err(ApiError::unexpected)?;
        self.catalog
            .list_columns(&table, &attnums, limit, offset)
            .await
            .map_err(ApiError::unexpected)
    }

    pub async fn retrieve(&self, table_id: i64, column_id: i64) -> Result<Column, ApiError> {
        let table = self.table(table_id).await?;
        self.column(&table, column_id).await
    }

    pub async fn create(&self, table_id: i64, payload: &Value) -> Result<Column, ApiError> {
        let table = self.table(table_id).await?;
        let request = CreateColumn::from_json(payload).map_err(ApiError::validation)?;

        let mut session = self.catalog.begin().await.map_err(ApiError::unexpected)?;
        let result = create_in(session.as_mut(), &table, &request).await;
        let column = finish(session, result).await?;

        self.cache.invalidate(table.id).await;
        info!(
            "created column {} (attnum {}) on {}.{}",
            column.name(),
            column.attnum(),
            table.schema,
            table.name
        );
        Ok(column)
    }

    pub async fn update(
        &self,
        table_id: i64,
        column_id: i64,
        payload: &Value,
    ) -> Result<Column, ApiError> {
        let table = self.table(table_id).await?;
        let column = self.column(&table, column_id).await?;
        let request = UpdateColumn::from_json(payload).map_err(ApiError::validation)?;

        let mut session = self.catalog.begin().await.map_err(ApiError::unexpected)?;
        let result = update_in(session.as_mut(), &table, &column, &request).await;
        let column = finish(session, result).await?;

        self.cache.invalidate(table.id).await;
        info!(
            "updated column {} (attnum {}) on {}.{}",
            column.name(),
            column.attnum(),
            table.schema,
            table.name
        );
        Ok(column)
    }

    pub async fn delete(&self, table_id: i64, column_id: i64) -> Result<(), ApiError> {
        let table = self.table(table_id).await?;
        let column = self.column(&table, column_id).await?;

        let mut session = self.catalog.begin().await.map_err(ApiError::unexpected)?;
        let result = delete_in(session.as_mut(), &table, &column).await;
        finish(session, result).await?;

        self.cache.invalidate(table.id).await;
        info!(
            "dropped column {} (attnum {}) from {}.{}",
            column.name(),
            column.attnum(),
            table.schema,
            table.name
        );
        Ok(())
    }

    async fn column(&self, table: &Table, column_id: i64) -> Result<Column, ApiError> {
        self.catalog
            .get_column(table, column_id)
            .await
            .map_err(ApiError::unexpected)?
            .ok_or_else(ApiError::not_found)
    }
}

/// Commits on success, rolls back on failure.
async fn finish<T>(
    session: Box<dyn SchemaSession + '_>,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    match result {
        Ok(value) => {
            session.commit().await.map_err(ApiError::unexpected)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                warn!("rollback failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

async fn create_in(
    session: &mut dyn SchemaSession,
    table: &Table,
    request: &CreateColumn,
) -> Result<Column, ApiError> {
    let physical = match &request.source {
        ColumnSource::Duplicate(duplicate) => session
            .duplicate_column(
                table,
                duplicate.source_column,
                duplicate.copy_data,
                duplicate.copy_constraints,
                duplicate.name.clone(),
            )
            .await
            .map_err(|e| duplicate_error(e, duplicate))?,
        ColumnSource::Add(definition) => session
            .add_column(table, definition)
            .await
            .map_err(|e| add_error(e, definition))?,
    };

    let attnum = session
        .resolve_attnums(table.oid, std::slice::from_ref(&physical.name))
        .await
        .map_err(ApiError::unexpected)?
        .first()
        .copied()
        .ok_or_else(|| {
            ApiError::unexpected(DbError::General(format!(
                "new column {} has no attnum",
                physical.name
            )))
        })?;

    session
        .insert_column(&NewColumn {
            table_id: table.id,
            attnum,
            display_options: request.display_options.clone(),
        })
        .await
        .map_err(ApiError::unexpected)
}

async fn update_in(
    session: &mut dyn SchemaSession,
    table: &Table,
    column: &Column,
    request: &UpdateColumn,
) -> Result<Column, ApiError> {
    let alteration = &request.alteration;
    if changes_type(alteration.data_type.as_deref(), &column.physical.data_type)
        && session
            .has_dynamic_default(table, column.attnum())
            .await
            .map_err(|e| update_error(e, request, column))?
    {
        return Err(ApiError::new(ErrorKind::DynamicDefault, DYNAMIC_DEFAULT_MESSAGE));
    }

    if !alteration.is_empty() {
        session
            .alter_column(table, column.attnum(), alteration)
            .await
            .map_err(|e| update_error(e, request, column))?;
    }

    session
        .update_column(table, column.id, &request.fields)
        .await
        .map_err(ApiError::unexpected)
}

async fn delete_in(
    session: &mut dyn SchemaSession,
    table: &Table,
    column: &Column,
) -> Result<(), ApiError> {
    session
        .drop_column(table, column.attnum())
        .await
        .map_err(delete_error)?;
    session
        .delete_column(column.id)
        .await
        .map_err(ApiError::unexpected)
}

/// Whether `requested` names a different type than `current`. Unknown names
/// are left for the backend to reject.
fn changes_type(requested: Option<&str>, current: &str) -> bool {
    let Some(requested) = requested else {
        return false;
    };
    match ColumnType::parse(requested) {
        Ok(target) => ColumnType::parse(current).map_or(true, |current| current != target),
        Err(_) => false,
    }
}

fn default_text(default: Option<&Value>) -> String {
    default.and_then(literal_text).unwrap_or_default()
}

fn options_text(options: Option<&serde_json::Map<String, Value>>) -> String {
    options
        .map(|o| Value::Object(o.clone()).to_string())
        .unwrap_or_default()
}

fn add_error(err: DbError, definition: &ColumnDefinition) -> ApiError {
    match err {
        DbError::DuplicateColumn(name) => {
            let name = definition.name.clone().unwrap_or(name);
            ApiError::new(
                ErrorKind::DuplicateTable,
                format!("Column {} already exists", name),
            )
            .with_field("name")
        }
        DbError::Sqlx(e) => ApiError::programming(e),
        DbError::UndefinedFunction(message) => ApiError::programming(message),
        DbError::UnknownTypeOption(_) => {
            ApiError::new(ErrorKind::TypeMismatch, "Unknown type_option passed")
        }
        DbError::InvalidDefault(_) => ApiError::new(
            ErrorKind::InvalidDefault,
            format!(
                "default \"{}\" is invalid for type {}",
                default_text(definition.default.as_ref()),
                definition.data_type
            ),
        ),
        DbError::InvalidTypeOption(_) => ApiError::new(
            ErrorKind::InvalidTypeOption,
            format!(
                "parameter dict {} is invalid for type {}",
                options_text(definition.type_options.as_ref()),
                definition.data_type
            ),
        )
        .with_field("type_options"),
        DbError::InvalidType(_) => {
            ApiError::new(ErrorKind::InvalidTypeCast, "This type casting is invalid.")
        }
        err @ (DbError::ColumnIndexOutOfRange(_)
        | DbError::ColumnNotFound(_)
        | DbError::TableNotFound(_)
        | DbError::DynamicDefault(_)
        | DbError::Config(_)
        | DbError::Transaction(_)
        | DbError::Connection(_)
        | DbError::General(_)) => ApiError::unexpected(err),
    }
}

fn duplicate_error(err: DbError, duplicate: &DuplicateColumn) -> ApiError {
    match err {
        DbError::ColumnIndexOutOfRange(_) => ApiError::new(
            ErrorKind::NotFound,
            format!("column index \"{}\" not found", duplicate.source_column),
        )
        .with_field("source_column")
        .with_status(StatusCode::BAD_REQUEST)
        .with_detail(json!({ "source_column": duplicate.source_column })),
        DbError::DuplicateColumn(name) => ApiError::new(
            ErrorKind::DuplicateTable,
            format!("Column {} already exists", name),
        )
        .with_field("name"),
        DbError::Sqlx(e) => ApiError::programming(e),
        err @ (DbError::UndefinedFunction(_)
        | DbError::ColumnNotFound(_)
        | DbError::TableNotFound(_)
        | DbError::UnknownTypeOption(_)
        | DbError::InvalidTypeOption(_)
        | DbError::InvalidDefault(_)
        | DbError::InvalidType(_)
        | DbError::DynamicDefault(_)
        | DbError::Config(_)
        | DbError::Transaction(_)
        | DbError::Connection(_)
        | DbError::General(_)) => ApiError::unexpected(err),
    }
}

fn update_error(err: DbError, request: &UpdateColumn, column: &Column) -> ApiError {
    let alteration = &request.alteration;
    let data_type = alteration
        .data_type
        .as_deref()
        .unwrap_or(&column.physical.data_type);
    match err {
        DbError::UndefinedFunction(_) => ApiError::new(
            ErrorKind::UndefinedFunction,
            "This type cast is not implemented",
        ),
        DbError::Sqlx(e) => ApiError::programming(e),
        DbError::DuplicateColumn(name) => {
            ApiError::programming(format!("Column {} already exists", name))
        }
        DbError::ColumnNotFound(_) | DbError::ColumnIndexOutOfRange(_) => ApiError::not_found(),
        DbError::UnknownTypeOption(_) => {
            ApiError::new(ErrorKind::InvalidTypeOption, "Unknown type_option passed")
        }
        // Without a requested default, the column's own default failed to re-cast.
        DbError::InvalidDefault(text) => ApiError::new(
            ErrorKind::InvalidDefault,
            format!(
                "default \"{}\" is invalid for type {}",
                alteration
                    .default
                    .as_ref()
                    .and_then(Option::as_ref)
                    .and_then(literal_text)
                    .unwrap_or(text),
                data_type
            ),
        ),
        DbError::DynamicDefault(_) => {
            ApiError::new(ErrorKind::DynamicDefault, DYNAMIC_DEFAULT_MESSAGE)
        }
        DbError::InvalidTypeOption(_) => ApiError::new(
            ErrorKind::InvalidTypeOption,
            format!(
                "parameter dict {} is invalid for type {}",
                options_text(alteration.type_options.as_ref()),
                data_type
            ),
        ),
        DbError::InvalidType(_) => {
            ApiError::new(ErrorKind::InvalidTypeCast, "This type casting is invalid.")
        }
        err @ (DbError::TableNotFound(_)
        | DbError::Config(_)
        | DbError::Transaction(_)
        | DbError::Connection(_)
        | DbError::General(_)) => ApiError::unexpected(err),
    }
}

fn delete_error(err: DbError) -> ApiError {
    match err {
        DbError::ColumnNotFound(_) | DbError::ColumnIndexOutOfRange(_) => ApiError::not_found(),
        DbError::Sqlx(e) => ApiError::programming(e),
        err @ (DbError::DuplicateColumn(_)
        | DbError::UndefinedFunction(_)
        | DbError::TableNotFound(_)
        | DbError::UnknownTypeOption(_)
        | DbError::InvalidTypeOption(_)
        | DbError::InvalidDefault(_)
        | DbError::InvalidType(_)
        | DbError::DynamicDefault(_)
        | DbError::Config(_)
        | DbError::Transaction(_)
        | DbError::Connection(_)
        | DbError::General(_)) => ApiError::unexpected(err),
    }
}
