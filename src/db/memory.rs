use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    errors::DbError,
    models::{
        requests::{ColumnAlteration, ColumnDefinition},
        schema::{Column, ColumnFields, NewColumn, Page, PhysicalColumn, Table},
    },
};

use super::{
    defaults::{default_expression, is_dynamic, literal_text, parse_default},
    types::{ColumnType, TypeOptions},
    unique_column_name, Catalog, SchemaSession,
};

/// A column to create along with a seeded table.
#[derive(Debug, Clone)]
pub struct ColumnSeed {
    name: String,
    data_type: ColumnType,
    type_options: Option<TypeOptions>,
    nullable: bool,
    primary_key: bool,
    default: Option<String>,
}

impl ColumnSeed {
    pub fn new(name: &str, data_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            type_options: None,
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn type_options(mut self, options: TypeOptions) -> Self {
        self.type_options = Some(options);
        self
    }

    /// Default given as a SQL expression, e.g. `now()` or `'5'::integer`.
    pub fn default_expr(mut self, expression: &str) -> Self {
        self.default = Some(expression.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct MemoryColumn {
    attnum: i16,
    name: String,
    data_type: ColumnType,
    type_options: Option<TypeOptions>,
    nullable: bool,
    primary_key: bool,
    unique: bool,
    default: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    table: Table,
    // Ordered by attnum.
    columns: Vec<MemoryColumn>,
    next_attnum: i16,
}

impl MemoryTable {
    fn position(&self, attnum: i16) -> Result<usize, DbError> {
        self.columns
            .iter()
            .position(|c| c.attnum == attnum)
            .ok_or(DbError::ColumnNotFound(attnum))
    }

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn ensure_name_free(&self, name: &str, except: Option<i16>) -> Result<(), DbError> {
        let taken = self
            .columns
            .iter()
            .any(|c| c.name == name && Some(c.attnum) != except);
        if taken {
            return Err(DbError::DuplicateColumn(name.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, mut column: MemoryColumn) -> PhysicalColumn {
        column.attnum = self.next_attnum;
        self.next_attnum += 1;
        self.columns.push(column);
        let index = self.columns.len() - 1;
        self.physical(index)
    }

    fn physical(&self, index: usize) -> PhysicalColumn {
        let column = &self.columns[index];
        PhysicalColumn {
            index: index as i64,
            attnum: column.attnum,
            name: column.name.clone(),
            data_type: column.data_type.name().to_string(),
            type_options: column.type_options.clone(),
            nullable: column.nullable,
            primary_key: column.primary_key,
            default: column.default.as_deref().map(parse_default),
        }
    }
}

#[derive(Debug, Clone)]
struct Record {
    id: i64,
    table_id: i64,
    attnum: i16,
    display_options: Option<Value>,
}

#[derive(Debug, Clone)]
struct State {
    tables: BTreeMap<i64, MemoryTable>,
    records: BTreeMap<i64, Record>,
    next_table_id: i64,
    next_record_id: i64,
    next_oid: i64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            records: BTreeMap::new(),
            next_table_id: 1,
            next_record_id: 1,
            next_oid: 16384,
        }
    }
}

impl State {
    fn table(&self, table_id: i64) -> Result<&MemoryTable, DbError> {
        self.tables
            .get(&table_id)
            .ok_or(DbError::TableNotFound(table_id))
    }

    fn table_mut(&mut self, table_id: i64) -> Result<&mut MemoryTable, DbError> {
        self.tables
            .get_mut(&table_id)
            .ok_or(DbError::TableNotFound(table_id))
    }

    fn table_by_oid(&self, oid: i64) -> Result<&MemoryTable, DbError> {
        self.tables
            .values()
            .find(|t| t.table.oid == oid)
            .ok_or_else(|| DbError::General(format!("no relation with oid {}", oid)))
    }

    fn resolve_attnums(&self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError> {
        let table = self.table_by_oid(oid)?;
        Ok(table
            .columns
            .iter()
            .filter(|c| names.contains(&c.name))
            .map(|c| c.attnum)
            .collect())
    }

    fn column(&self, record: &Record) -> Option<Column> {
        let table = self.tables.get(&record.table_id)?;
        let index = table.position(record.attnum).ok()?;
        Some(Column {
            id: record.id,
            table_id: record.table_id,
            physical: table.physical(index),
            display_options: record.display_options.clone(),
        })
    }

    fn insert_record(&mut self, column: &NewColumn) -> Result<Column, DbError> {
        let exists = self
            .records
            .values()
            .any(|r| r.table_id == column.table_id && r.attnum == column.attnum);
        if exists {
            return Err(DbError::General(format!(
                "metadata for attnum {} of table {} already exists",
                column.attnum, column.table_id
            )));
        }
        let record = Record {
            id: self.next_record_id,
            table_id: column.table_id,
            attnum: column.attnum,
            display_options: column.display_options.clone(),
        };
        self.next_record_id += 1;
        let joined = self
            .column(&record)
            .ok_or(DbError::ColumnNotFound(column.attnum))?;
        self.records.insert(record.id, record);
        Ok(joined)
    }
}

/// Catalog kept entirely in memory. Tables hold no rows, and a session holds
/// the lock until it commits or rolls back.
#[derive(Default, Clone)]
pub struct MemoryCatalog {
    state: Arc<Mutex<State>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table and registers metadata for its columns.
    pub async fn create_table(&self, schema: &str, name: &str, columns: Vec<ColumnSeed>) -> Table {
        let mut state = self.state.lock().await;
        let table = Table {
            id: state.next_table_id,
            oid: state.next_oid,
            schema: schema.to_string(),
            name: name.to_string(),
        };
        state.next_table_id += 1;
        state.next_oid += 1;

        let mut memory_table = MemoryTable {
            table: table.clone(),
            columns: Vec::new(),
            next_attnum: 1,
        };
        for seed in columns {
            let physical = memory_table.push(MemoryColumn {
                attnum: 0,
                name: seed.name,
                data_type: seed.data_type,
                type_options: seed.type_options,
                nullable: seed.nullable,
                primary_key: seed.primary_key,
                unique: seed.primary_key,
                default: seed.default,
            });
            let id = state.next_record_id;
            state.next_record_id += 1;
            state.records.insert(
                id,
                Record {
                    id,
                    table_id: table.id,
                    attnum: physical.attnum,
                    display_options: None,
                },
            );
        }
        state.tables.insert(table.id, memory_table);
        debug!("created table {}.{} (id {})", schema, name, table.id);
        table
    }

    /// Drops a physical column without touching its metadata, as DDL run
    /// outside the service would.
    pub async fn drop_physical_column(&self, table_id: i64, name: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let table = state.table_mut(table_id)?;
        let before = table.columns.len();
        table.columns.retain(|c| c.name != name);
        if table.columns.len() == before {
            return Err(DbError::General(format!("no column named {}", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_table(&self, table_id: i64) -> Result<Option<Table>, DbError> {
        let state = self.state.lock().await;
        Ok(state.tables.get(&table_id).map(|t| t.table.clone()))
    }

    async fn column_names(&self, table: &Table) -> Result<Vec<String>, DbError> {
        let state = self.state.lock().await;
        Ok(state.table(table.id)?.names())
    }

    async fn resolve_attnums(&self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError> {
        let state = self.state.lock().await;
        state.resolve_attnums(oid, names)
    }

    async fn list_columns(
        &self,
        table: &Table,
        attnums: &[i16],
        limit: i64,
        offset: i64,
    ) -> Result<Page<Column>, DbError> {
        let state = self.state.lock().await;
        let mut columns: Vec<Column> = state
            .records
            .values()
            .filter(|r| r.table_id == table.id && attnums.contains(&r.attnum))
            .filter_map(|r| state.column(r))
            .collect();
        columns.sort_by_key(Column::attnum);
        let count = columns.len() as i64;
        let results = columns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(Page { count, results })
    }

    async fn get_column(&self, table: &Table, column_id: i64) -> Result<Option<Column>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&column_id)
            .filter(|r| r.table_id == table.id)
            .and_then(|r| state.column(r)))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn SchemaSession + 'a>, DbError> {
        let guard = self.state.lock().await;
        let working = guard.clone();
        Ok(Box::new(MemorySession { guard, working }))
    }
}

pub struct MemorySession<'a> {
    guard: MutexGuard<'a, State>,
    working: State,
}

impl MemorySession<'_> {
    fn default_for(
        data_type: ColumnType,
        options: Option<&TypeOptions>,
        value: &Value,
    ) -> Result<Option<String>, DbError> {
        let Some(text) = literal_text(value) else {
            return Ok(None);
        };
        if !data_type.accepts_literal(&text, options) {
            return Err(DbError::InvalidDefault(text));
        }
        Ok(Some(default_expression(&text, &data_type.to_sql(options))))
    }
}

#[async_trait]
impl<'a> SchemaSession for MemorySession<'a> {
    async fn add_column(
        &mut self,
        table: &Table,
        definition: &ColumnDefinition,
    ) -> Result<PhysicalColumn, DbError> {
        let data_type = ColumnType::parse(&definition.data_type)?;
        if let Some(options) = &definition.type_options {
            data_type.validate_options(options)?;
        }
        let memory_table = self.working.table_mut(table.id)?;
        let name = match &definition.name {
            Some(name) => name.clone(),
            None => unique_column_name("Column", &memory_table.names()),
        };
        memory_table.ensure_name_free(&name, None)?;
        let default = match &definition.default {
            Some(value) => {
                Self::default_for(data_type, definition.type_options.as_ref(), value)?
            }
            None => None,
        };
        Ok(memory_table.push(MemoryColumn {
            attnum: 0,
            name,
            data_type,
            type_options: definition.type_options.clone(),
            nullable: definition.nullable,
            primary_key: false,
            unique: false,
            default,
        }))
    }

    async fn duplicate_column(
        &mut self,
        table: &Table,
        source_index: i64,
        copy_data: bool,
        copy_constraints: bool,
        name: Option<String>,
    ) -> Result<PhysicalColumn, DbError> {
        let memory_table = self.working.table_mut(table.id)?;
        let source = usize::try_from(source_index)
            .ok()
            .and_then(|i| memory_table.columns.get(i))
            .cloned()
            .ok_or(DbError::ColumnIndexOutOfRange(source_index))?;
        let name = match name {
            Some(name) => name,
            None => unique_column_name(&source.name, &memory_table.names()),
        };
        memory_table.ensure_name_free(&name, None)?;
        Ok(memory_table.push(MemoryColumn {
            attnum: 0,
            name,
            data_type: source.data_type,
            type_options: source.type_options,
            // NOT NULL can only hold once the values are copied over.
            nullable: !(copy_constraints && copy_data) || source.nullable,
            primary_key: false,
            unique: copy_constraints && source.unique,
            default: if copy_data { source.default } else { None },
        }))
    }

    async fn alter_column(
        &mut self,
        table: &Table,
        attnum: i16,
        alteration: &ColumnAlteration,
    ) -> Result<(), DbError> {
        let memory_table = self.working.table_mut(table.id)?;
        let position = memory_table.position(attnum)?;
        let mut column = memory_table.columns[position].clone();

        let target = match &alteration.data_type {
            Some(name) => ColumnType::parse(name)?,
            None => column.data_type,
        };
        let type_changed = target != column.data_type;
        let options = match (&alteration.type_options, type_changed) {
            (Some(options), _) => Some(options.clone()),
            (None, true) => None,
            (None, false) => column.type_options.clone(),
        };
        if let Some(options) = &options {
            target.validate_options(options)?;
        }

        if type_changed {
            if !column.data_type.can_cast_to(target) {
                return Err(DbError::UndefinedFunction(format!(
                    "no cast from {} to {}",
                    column.data_type, target
                )));
            }
            if let Some(expression) = &column.default {
                if is_dynamic(expression) {
                    return Err(DbError::DynamicDefault(column.name.clone()));
                }
            }
        }
        // Dynamic defaults only get here when the type is unchanged; they stay as they are.
        if type_changed || alteration.type_options.is_some() {
            let constant = column
                .default
                .as_deref()
                .map(parse_default)
                .filter(|d| !d.is_dynamic);
            if let Some(existing) = constant {
                column.default = Self::default_for(target, options.as_ref(), &existing.value)?;
            }
        }
        column.data_type = target;
        column.type_options = options;

        if let Some(name) = &alteration.name {
            memory_table.ensure_name_free(name, Some(attnum))?;
            column.name = name.clone();
        }
        if let Some(default) = &alteration.default {
            column.default = match default {
                Some(value) => Self::default_for(target, column.type_options.as_ref(), value)?,
                None => None,
            };
        }
        if let Some(nullable) = alteration.nullable {
            column.nullable = nullable;
        }

        memory_table.columns[position] = column;
        Ok(())
    }

    async fn drop_column(&mut self, table: &Table, attnum: i16) -> Result<(), DbError> {
        let memory_table = self.working.table_mut(table.id)?;
        let position = memory_table.position(attnum)?;
        memory_table.columns.remove(position);
        Ok(())
    }

    async fn has_dynamic_default(&mut self, table: &Table, attnum: i16) -> Result<bool, DbError> {
        let memory_table = self.working.table(table.id)?;
        let position = memory_table.position(attnum)?;
        Ok(memory_table.columns[position]
            .default
            .as_deref()
            .is_some_and(is_dynamic))
    }

    async fn resolve_attnums(&mut self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError> {
        self.working.resolve_attnums(oid, names)
    }

    async fn insert_column(&mut self, column: &NewColumn) -> Result<Column, DbError> {
        self.working.insert_record(column)
    }

    async fn update_column(
        &mut self,
        table: &Table,
        column_id: i64,
        fields: &ColumnFields,
    ) -> Result<Column, DbError> {
        let record = self
            .working
            .records
            .get_mut(&column_id)
            .filter(|r| r.table_id == table.id)
            .ok_or_else(|| DbError::General(format!("column record {} not found", column_id)))?;
        if let Some(display_options) = &fields.display_options {
            record.display_options = display_options.clone();
        }
        let record = record.clone();
        self.working
            .column(&record)
            .ok_or(DbError::ColumnNotFound(record.attnum))
    }

    async fn delete_column(&mut self, column_id: i64) -> Result<(), DbError> {
        self.working
            .records
            .remove(&column_id)
            .map(|_| ())
            .ok_or_else(|| DbError::General(format!("column record {} not found", column_id)))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemorySession { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> (MemoryCatalog, Table) {
        let catalog = MemoryCatalog::new();
        let table = catalog
            .create_table(
                "public",
                "people",
                vec![
                    ColumnSeed::new("id", ColumnType::Integer).primary_key(),
                    ColumnSeed::new("name", ColumnType::Text),
                    ColumnSeed::new("created", ColumnType::TimestampTz)
                        .default_expr("CURRENT_TIMESTAMP"),
                ],
            )
            .await;
        (catalog, table)
    }

    fn definition(name: &str, data_type: &str) -> ColumnDefinition {
        ColumnDefinition {
            name: Some(name.to_string()),
            data_type: data_type.to_string(),
            type_options: None,
            default: None,
            nullable: true,
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        session
            .add_column(&table, &definition("age", "integer"))
            .await
            .unwrap();
        session.rollback().await.unwrap();

        let names = catalog.column_names(&table).await.unwrap();
        assert_eq!(names, vec!["id", "name", "created"]);
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        let physical = session
            .add_column(&table, &definition("age", "integer"))
            .await
            .unwrap();
        assert_eq!(physical.attnum, 4);
        assert_eq!(physical.index, 3);
        session.commit().await.unwrap();

        let attnums = catalog
            .resolve_attnums(table.oid, &["age".to_string()])
            .await
            .unwrap();
        assert_eq!(attnums, vec![4]);
    }

    #[tokio::test]
    async fn test_attnums_are_not_reused() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        session.drop_column(&table, 2).await.unwrap();
        let physical = session
            .add_column(&table, &definition("name", "text"))
            .await
            .unwrap();
        assert_eq!(physical.attnum, 4);
        assert_eq!(physical.index, 2);
    }

    #[tokio::test]
    async fn test_add_column_errors() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();

        let err = session
            .add_column(&table, &definition("name", "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateColumn(name) if name == "name"));

        let err = session
            .add_column(&table, &definition("shape", "polygon"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidType(_)));

        let mut bad_default = definition("age", "integer");
        bad_default.default = Some(json!("old"));
        let err = session.add_column(&table, &bad_default).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidDefault(text) if text == "old"));
    }

    #[tokio::test]
    async fn test_duplicate_column_generates_name() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        let physical = session
            .duplicate_column(&table, 1, true, true, None)
            .await
            .unwrap();
        assert_eq!(physical.name, "name 1");
        assert_eq!(physical.data_type, "text");

        let err = session
            .duplicate_column(&table, 9, false, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ColumnIndexOutOfRange(9)));
    }

    #[tokio::test]
    async fn test_alter_column_type_with_dynamic_default() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        assert!(session.has_dynamic_default(&table, 3).await.unwrap());
        assert!(!session.has_dynamic_default(&table, 2).await.unwrap());

        let alteration = ColumnAlteration {
            data_type: Some("text".to_string()),
            ..Default::default()
        };
        let err = session
            .alter_column(&table, 3, &alteration)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DynamicDefault(name) if name == "created"));
    }

    #[tokio::test]
    async fn test_alter_column_recasts_constant_default() {
        let catalog = MemoryCatalog::new();
        let table = catalog
            .create_table(
                "public",
                "scores",
                vec![ColumnSeed::new("points", ColumnType::Text).default_expr("'12'::text")],
            )
            .await;
        let mut session = catalog.begin().await.unwrap();
        let alteration = ColumnAlteration {
            data_type: Some("integer".to_string()),
            ..Default::default()
        };
        session.alter_column(&table, 1, &alteration).await.unwrap();
        session.commit().await.unwrap();

        let column = catalog.get_column(&table, 1).await.unwrap().unwrap();
        assert_eq!(column.physical.data_type, "integer");
        let default = column.physical.default.unwrap();
        assert_eq!(default.value, json!("12"));
        assert!(!default.is_dynamic);
    }

    #[tokio::test]
    async fn test_alter_type_options_keeps_dynamic_default() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        let alteration = ColumnAlteration {
            type_options: Some(json!({"precision": 3}).as_object().unwrap().clone()),
            ..Default::default()
        };
        session.alter_column(&table, 3, &alteration).await.unwrap();
        session.commit().await.unwrap();

        let column = catalog.get_column(&table, 3).await.unwrap().unwrap();
        assert_eq!(column.physical.type_options, alteration.type_options);
        let default = column.physical.default.unwrap();
        assert!(default.is_dynamic);
        assert_eq!(default.value, json!("CURRENT_TIMESTAMP"));
    }

    #[tokio::test]
    async fn test_alter_type_with_uncastable_default() {
        let catalog = MemoryCatalog::new();
        let table = catalog
            .create_table(
                "public",
                "labels",
                vec![ColumnSeed::new("code", ColumnType::Text).default_expr("'abc'::text")],
            )
            .await;
        let mut session = catalog.begin().await.unwrap();
        let alteration = ColumnAlteration {
            data_type: Some("integer".to_string()),
            ..Default::default()
        };
        let err = session
            .alter_column(&table, 1, &alteration)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidDefault(text) if text == "abc"));
    }

    #[tokio::test]
    async fn test_alter_column_without_cast() {
        let (catalog, table) = seeded().await;
        let mut session = catalog.begin().await.unwrap();
        let alteration = ColumnAlteration {
            data_type: Some("uuid".to_string()),
            ..Default::default()
        };
        let err = session
            .alter_column(&table, 1, &alteration)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UndefinedFunction(_)));
    }

    #[tokio::test]
    async fn test_list_skips_stale_metadata() {
        let (catalog, table) = seeded().await;
        catalog.drop_physical_column(table.id, "name").await.unwrap();
        let names = catalog.column_names(&table).await.unwrap();
        let attnums = catalog.resolve_attnums(table.oid, &names).await.unwrap();
        let page = catalog
            .list_columns(&table, &attnums, 50, 0)
            .await
            .unwrap();
        assert_eq!(page.count, 2);
        let listed: Vec<i16> = page.results.iter().map(Column::attnum).collect();
        assert_eq!(listed, vec![1, 3]);
    }
}
