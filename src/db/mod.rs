use crate::{
    errors::DbError,
    models::{
        requests::{ColumnAlteration, ColumnDefinition},
        schema::{Column, ColumnFields, NewColumn, Page, PhysicalColumn, Table},
    },
};
use async_trait::async_trait;

pub mod defaults;
pub mod memory;
pub mod postgres;
pub mod types;

/// Read access to tables and column metadata, and the entry point for
/// mutations.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_table(&self, table_id: i64) -> Result<Option<Table>, DbError>;
    /// Names of the live physical columns of a table.
    async fn column_names(&self, table: &Table) -> Result<Vec<String>, DbError>;
    async fn resolve_attnums(&self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError>;
    /// Metadata records whose attnum is in `attnums`, ordered by attnum.
    async fn list_columns(
        &self,
        table: &Table,
        attnums: &[i16],
        limit: i64,
        offset: i64,
    ) -> Result<Page<Column>, DbError>;
    /// A record by id, provided its physical column is still live.
    async fn get_column(&self, table: &Table, column_id: i64) -> Result<Option<Column>, DbError>;
    /// Opens a session; its changes become visible on commit.
    async fn begin<'a>(&'a self) -> Result<Box<dyn SchemaSession + 'a>, DbError>;
}

/// Physical DDL and metadata writes sharing one transaction.
#[async_trait]
pub trait SchemaSession: Send {
    async fn add_column(
        &mut self,
        table: &Table,
        definition: &ColumnDefinition,
    ) -> Result<PhysicalColumn, DbError>;
    async fn duplicate_column(
        &mut self,
        table: &Table,
        source_index: i64,
        copy_data: bool,
        copy_constraints: bool,
        name: Option<String>,
    ) -> Result<PhysicalColumn, DbError>;
    async fn alter_column(
        &mut self,
        table: &Table,
        attnum: i16,
        alteration: &ColumnAlteration,
    ) -> Result<(), DbError>;
    async fn drop_column(&mut self, table: &Table, attnum: i16) -> Result<(), DbError>;
    async fn has_dynamic_default(&mut self, table: &Table, attnum: i16) -> Result<bool, DbError>;
    async fn resolve_attnums(&mut self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError>;
    async fn insert_column(&mut self, column: &NewColumn) -> Result<Column, DbError>;
    async fn update_column(
        &mut self,
        table: &Table,
        column_id: i64,
        fields: &ColumnFields,
    ) -> Result<Column, DbError>;
    async fn delete_column(&mut self, column_id: i64) -> Result<(), DbError>;
    async fn commit(self: Box<Self>) -> Result<(), DbError>;
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Picks `base n` with the smallest `n >= 1` not taken by `existing`.
pub fn unique_column_name(base: &str, existing: &[String]) -> String {
    (1..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !existing.iter().any(|name| name == candidate))
        .unwrap_or_else(|| base.to_string())
}
