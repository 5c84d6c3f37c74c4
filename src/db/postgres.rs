use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Postgres, Row};

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

/// Schema holding the metadata tables. Never reflected.
const METADATA_SCHEMA: &str = "coldef";

// Live columns of a table with their index among live columns. $1 is the
// table id.
const PHYSICAL_SELECT: &str = r#"
    SELECT a.attnum,
           a.attname::text AS name,
           format_type(a.atttypid, NULL) AS data_type,
           a.atttypmod AS typmod,
           NOT a.attnotnull AS nullable,
           EXISTS (
               SELECT 1 FROM pg_index i
               WHERE i.indrelid = a.attrelid
                 AND i.indisprimary
                 AND a.attnum = ANY(i.indkey)
           ) AS primary_key,
           pg_get_expr(d.adbin, d.adrelid) AS default_expr,
           row_number() OVER (ORDER BY a.attnum) - 1 AS idx
    FROM coldef.tables t
    JOIN pg_attribute a ON a.attrelid = t.oid::oid
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE t.id = $1 AND a.attnum > 0 AND NOT a.attisdropped
"#;

const LIVE_ATTRIBUTE_FILTER: &str = "a.attrelid = $1::oid AND a.attnum > 0 AND NOT a.attisdropped";

pub struct PostgresCatalog {
    pub pool: PgPool,
}

impl PostgresCatalog {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates the metadata schema and tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", METADATA_SCHEMA),
            r#"
            CREATE TABLE IF NOT EXISTS coldef.tables (
                id BIGSERIAL PRIMARY KEY,
                oid BIGINT NOT NULL UNIQUE,
                schema_name TEXT NOT NULL,
                name TEXT NOT NULL
            )
            "#
            .to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS coldef.columns (
                id BIGSERIAL PRIMARY KEY,
                table_id BIGINT NOT NULL REFERENCES coldef.tables (id) ON DELETE CASCADE,
                attnum SMALLINT NOT NULL,
                display_options JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (table_id, attnum)
            )
            "#
            .to_string(),
        ];
        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(DbError::Sqlx)?;
        }
        Ok(())
    }

    /// Registers the tables of `schemas` and gives every live column a
    /// metadata record. Records of vanished tables are removed.
    pub async fn reflect(&self, schemas: &[String]) -> Result<(), DbError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        sqlx::query(
            r#"
            DELETE FROM coldef.tables t
            WHERE NOT EXISTS (SELECT 1 FROM pg_class c WHERE c.oid = t.oid::oid)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let tables = sqlx::query(
            r#"
            INSERT INTO coldef.tables (oid, schema_name, name)
            SELECT c.oid::bigint, n.nspname, c.relname
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p') AND n.nspname::text = ANY($1) AND n.nspname::text <> $2
            ON CONFLICT (oid) DO UPDATE
                SET schema_name = EXCLUDED.schema_name, name = EXCLUDED.name
            "#,
        )
        .bind(schemas)
        .bind(METADATA_SCHEMA)
        .execute(&mut *tx)
        .await?;

        let columns = sqlx::query(
            r#"
            INSERT INTO coldef.columns (table_id, attnum)
            SELECT t.id, a.attnum
            FROM coldef.tables t
            JOIN pg_attribute a ON a.attrelid = t.oid::oid
            WHERE a.attnum > 0 AND NOT a.attisdropped
            ON CONFLICT (table_id, attnum) DO NOTHING
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        info!(
            "reflected {} tables, {} new column records",
            tables.rows_affected(),
            columns.rows_affected()
        );
        Ok(())
    }

    /// Looks a registered table up by its qualified name.
    pub async fn find_table(&self, schema: &str, name: &str) -> Result<Option<Table>, DbError> {
        let row = sqlx::query(
            "SELECT id, oid, schema_name, name FROM coldef.tables WHERE schema_name = $1 AND name = $2",
        )
        .bind(schema)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| table_from_row(&row)).transpose()
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Metadata records joined with their live physical columns; callers append
/// further `AND` conditions.
fn column_select() -> String {
    format!(
        r#"
        SELECT m.id, m.table_id, m.display_options, p.*
        FROM coldef.columns m
        JOIN ({}) p ON p.attnum = m.attnum
        WHERE m.table_id = $1
        "#,
        PHYSICAL_SELECT
    )
}

fn physical_from_row(row: &PgRow) -> Result<PhysicalColumn, DbError> {
    let data_type: String = row.try_get("data_type")?;
    let typmod: i32 = row.try_get("typmod")?;
    let default_expr: Option<String> = row.try_get("default_expr")?;

    Ok(PhysicalColumn {
        index: row.try_get("idx")?,
        attnum: row.try_get("attnum")?,
        name: row.try_get("name")?,
        type_options: ColumnType::parse(&data_type)
            .ok()
            .and_then(|ty| ty.options_from_typmod(typmod)),
        data_type,
        nullable: row.try_get("nullable")?,
        primary_key: row.try_get("primary_key")?,
        default: default_expr.as_deref().map(parse_default),
    })
}

fn table_from_row(row: &PgRow) -> Result<Table, DbError> {
    Ok(Table {
        id: row.try_get("id")?,
        oid: row.try_get("oid")?,
        schema: row.try_get("schema_name")?,
        name: row.try_get("name")?,
    })
}

fn column_from_row(row: &PgRow) -> Result<Column, DbError> {
    Ok(Column {
        id: row.try_get("id")?,
        table_id: row.try_get("table_id")?,
        physical: physical_from_row(row)?,
        display_options: row.try_get("display_options")?,
    })
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn get_table(&self, table_id: i64) -> Result<Option<Table>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT t.id, t.oid, n.nspname::text AS schema_name, c.relname::text AS name
            FROM coldef.tables t
            JOIN pg_class c ON c.oid = t.oid::oid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE t.id = $1
            "#,
        )
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        row.map(|row| table_from_row(&row)).transpose()
    }

    async fn column_names(&self, table: &Table) -> Result<Vec<String>, DbError> {
        let query = format!(
            "SELECT a.attname::text FROM pg_attribute a WHERE {} ORDER BY a.attnum",
            LIVE_ATTRIBUTE_FILTER
        );
        let names = sqlx::query_scalar(&query)
            .bind(table.oid)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(names)
    }

    async fn resolve_attnums(&self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError> {
        let query = format!(
            "SELECT a.attnum FROM pg_attribute a WHERE {} AND a.attname::text = ANY($2) ORDER BY a.attnum",
            LIVE_ATTRIBUTE_FILTER
        );
        let attnums = sqlx::query_scalar(&query)
            .bind(oid)
            .bind(names)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(attnums)
    }

    async fn list_columns(
        &self,
        table: &Table,
        attnums: &[i16],
        limit: i64,
        offset: i64,
    ) -> Result<Page<Column>, DbError> {
        let count_query = format!(
            "SELECT count(*) FROM ({} AND m.attnum = ANY($2)) listed",
            column_select()
        );
        let count: i64 = sqlx::query_scalar(&count_query)
            .bind(table.id)
            .bind(attnums)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let query = format!(
            "{} AND m.attnum = ANY($2) ORDER BY m.attnum LIMIT $3 OFFSET $4",
            column_select()
        );
        let rows = sqlx::query(&query)
            .bind(table.id)
            .bind(attnums)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let results = rows
            .iter()
            .map(column_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { count, results })
    }

    async fn get_column(&self, table: &Table, column_id: i64) -> Result<Option<Column>, DbError> {
        let query = format!("{} AND m.id = $2", column_select());
        let row = sqlx::query(&query)
            .bind(table.id)
            .bind(column_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        row.as_ref().map(column_from_row).transpose()
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn SchemaSession + 'a>, DbError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(Box::new(PostgresSession { tx }))
    }
}

/// A live attribute as seen from inside a session.
struct Attribute {
    attnum: i16,
    name: String,
    data_type: String,
    full_type: String,
    nullable: bool,
    default_expr: Option<String>,
}

pub struct PostgresSession<'a> {
    tx: sqlx::Transaction<'a, Postgres>,
}

impl<'a> PostgresSession<'a> {
    async fn execute(&mut self, statement: &str) -> Result<(), DbError> {
        debug!("executing: {}", statement);
        sqlx::query(statement)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    /// Fully qualified, quoted relation name.
    async fn relation(&mut self, table: &Table) -> Result<String, DbError> {
        let relation = sqlx::query_scalar("SELECT $1::oid::regclass::text")
            .bind(table.oid)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(relation)
    }

    async fn attributes(&mut self, table: &Table) -> Result<Vec<Attribute>, DbError> {
        let query = format!(
            r#"
            SELECT a.attnum, a.attname::text AS name,
                   format_type(a.atttypid, NULL) AS data_type,
                   format_type(a.atttypid, a.atttypmod) AS full_type,
                   NOT a.attnotnull AS nullable,
                   pg_get_expr(d.adbin, d.adrelid) AS default_expr
            FROM pg_attribute a
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE {}
            ORDER BY a.attnum
            "#,
            LIVE_ATTRIBUTE_FILTER
        );
        let rows = sqlx::query(&query)
            .bind(table.oid)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        rows.iter()
            .map(|row| -> Result<Attribute, DbError> {
                Ok(Attribute {
                    attnum: row.try_get("attnum")?,
                    name: row.try_get("name")?,
                    data_type: row.try_get("data_type")?,
                    full_type: row.try_get("full_type")?,
                    nullable: row.try_get("nullable")?,
                    default_expr: row.try_get("default_expr")?,
                })
            })
            .collect()
    }

    async fn attribute(&mut self, table: &Table, attnum: i16) -> Result<Attribute, DbError> {
        self.attributes(table)
            .await?
            .into_iter()
            .find(|a| a.attnum == attnum)
            .ok_or(DbError::ColumnNotFound(attnum))
    }

    async fn physical(&mut self, table: &Table, name: &str) -> Result<PhysicalColumn, DbError> {
        let query = format!("SELECT * FROM ({}) p WHERE p.name = $2", PHYSICAL_SELECT);
        let row = sqlx::query(&query)
            .bind(table.id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?
            .ok_or_else(|| DbError::General(format!("column {} vanished", name)))?;
        physical_from_row(&row)
    }

    /// Checks that `value` casts to `type_sql` and returns the default
    /// expression for it.
    async fn cast_default(&mut self, value: &Value, type_sql: &str) -> Result<Option<String>, DbError> {
        let Some(text) = literal_text(value) else {
            return Ok(None);
        };
        sqlx::query(&format!("SELECT CAST($1::text AS {})", type_sql))
            .bind(&text)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_default_cast(e, &text))?;
        Ok(Some(default_expression(&text, type_sql)))
    }

    async fn has_unique_constraint(&mut self, table: &Table, attnum: i16) -> Result<bool, DbError> {
        let exists = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_constraint
                WHERE conrelid = $1::oid AND contype = 'u' AND conkey = ARRAY[$2]::int2[]
            )
            "#,
        )
        .bind(table.oid)
        .bind(attnum)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(exists)
    }
}

#[async_trait]
impl<'a> SchemaSession for PostgresSession<'a> {
    async fn add_column(
        &mut self,
        table: &Table,
        definition: &ColumnDefinition,
    ) -> Result<PhysicalColumn, DbError> {
        let data_type = ColumnType::parse(&definition.data_type)?;
        if let Some(options) = &definition.type_options {
            data_type.validate_options(options)?;
        }
        let type_sql = data_type.to_sql(definition.type_options.as_ref());
        let relation = self.relation(table).await?;
        let name = match &definition.name {
            Some(name) => name.clone(),
            None => {
                let names: Vec<String> =
                    self.attributes(table).await?.into_iter().map(|a| a.name).collect();
                unique_column_name("Column", &names)
            }
        };

        let mut statement = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            relation,
            quote_ident(&name),
            type_sql
        );
        if let Some(value) = &definition.default {
            if let Some(expression) = self.cast_default(value, &type_sql).await? {
                statement.push_str(&format!(" DEFAULT {}", expression));
            }
        }
        if !definition.nullable {
            statement.push_str(" NOT NULL");
        }
        self.execute(&statement).await?;
        self.physical(table, &name).await
    }

    async fn duplicate_column(
        &mut self,
        table: &Table,
        source_index: i64,
        copy_data: bool,
        copy_constraints: bool,
        name: Option<String>,
    ) -> Result<PhysicalColumn, DbError> {
        let mut attributes = self.attributes(table).await?;
        let names: Vec<String> = attributes.iter().map(|a| a.name.clone()).collect();
        let index = usize::try_from(source_index)
            .ok()
            .filter(|i| *i < attributes.len())
            .ok_or(DbError::ColumnIndexOutOfRange(source_index))?;
        let source = attributes.swap_remove(index);
        let name = match name {
            Some(name) => name,
            None => unique_column_name(&source.name, &names),
        };
        let relation = self.relation(table).await?;
        let target = quote_ident(&name);

        self.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            relation, target, source.full_type
        ))
        .await?;
        if copy_data {
            self.execute(&format!(
                "UPDATE {} SET {} = {}",
                relation,
                target,
                quote_ident(&source.name)
            ))
            .await?;
            if let Some(expression) = &source.default_expr {
                self.execute(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    relation, target, expression
                ))
                .await?;
            }
        }
        if copy_constraints {
            if copy_data && !source.nullable {
                self.execute(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                    relation, target
                ))
                .await?;
            }
            if self.has_unique_constraint(table, source.attnum).await? {
                self.execute(&format!("ALTER TABLE {} ADD UNIQUE ({})", relation, target))
                    .await?;
            }
        }
        self.physical(table, &name).await
    }

    async fn alter_column(
        &mut self,
        table: &Table,
        attnum: i16,
        alteration: &ColumnAlteration,
    ) -> Result<(), DbError> {
        let current = self.attribute(table, attnum).await?;
        let relation = self.relation(table).await?;
        let column = quote_ident(&current.name);
        let current_type = ColumnType::parse(&current.data_type).ok();

        let target = match &alteration.data_type {
            Some(name) => Some(ColumnType::parse(name)?),
            None => current_type,
        };
        let type_changed = alteration.data_type.is_some() && target != current_type;

        if type_changed || alteration.type_options.is_some() {
            let target = target.ok_or_else(|| DbError::InvalidType(current.data_type.clone()))?;
            let options: Option<TypeOptions> = alteration.type_options.clone();
            if let Some(options) = &options {
                target.validate_options(options)?;
            }
            let type_sql = target.to_sql(options.as_ref());

            let existing_default = current.default_expr.as_deref().map(parse_default);
            if let Some(default) = &existing_default {
                if default.is_dynamic && type_changed {
                    return Err(DbError::DynamicDefault(current.name.clone()));
                }
                // A dynamic default stays in place; the server re-casts the
                // expression along with the column.
                if !default.is_dynamic {
                    self.execute(&format!(
                        "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                        relation, column
                    ))
                    .await?;
                }
            }
            self.execute(&format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                relation, column, type_sql, column, type_sql
            ))
            .await?;
            if let Some(default) = existing_default.filter(|d| !d.is_dynamic) {
                if let Some(expression) = self.cast_default(&default.value, &type_sql).await? {
                    self.execute(&format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                        relation, column, expression
                    ))
                    .await?;
                }
            }
        }

        if let Some(default) = &alteration.default {
            match default {
                Some(value) => {
                    let full_type = self.attribute(table, attnum).await?.full_type;
                    if let Some(expression) = self.cast_default(value, &full_type).await? {
                        self.execute(&format!(
                            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                            relation, column, expression
                        ))
                        .await?;
                    }
                }
                None => {
                    self.execute(&format!(
                        "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                        relation, column
                    ))
                    .await?;
                }
            }
        }

        if let Some(nullable) = alteration.nullable {
            let action = if nullable { "DROP" } else { "SET" };
            self.execute(&format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                relation, column, action
            ))
            .await?;
        }

        if let Some(name) = alteration.name.as_deref().filter(|n| *n != current.name) {
            self.execute(&format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                relation,
                column,
                quote_ident(name)
            ))
            .await?;
        }
        Ok(())
    }

    async fn drop_column(&mut self, table: &Table, attnum: i16) -> Result<(), DbError> {
        let current = self.attribute(table, attnum).await?;
        let relation = self.relation(table).await?;
        self.execute(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            relation,
            quote_ident(&current.name)
        ))
        .await
    }

    async fn has_dynamic_default(&mut self, table: &Table, attnum: i16) -> Result<bool, DbError> {
        let current = self.attribute(table, attnum).await?;
        Ok(current.default_expr.as_deref().is_some_and(is_dynamic))
    }

    async fn resolve_attnums(&mut self, oid: i64, names: &[String]) -> Result<Vec<i16>, DbError> {
        let query = format!(
            "SELECT a.attnum FROM pg_attribute a WHERE {} AND a.attname::text = ANY($2) ORDER BY a.attnum",
            LIVE_ATTRIBUTE_FILTER
        );
        let attnums = sqlx::query_scalar(&query)
            .bind(oid)
            .bind(names)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(attnums)
    }

    async fn insert_column(&mut self, column: &NewColumn) -> Result<Column, DbError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO coldef.columns (table_id, attnum, display_options)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(column.table_id)
        .bind(column.attnum)
        .bind(&column.display_options)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DbError::Sqlx)?;

        let query = format!("{} AND m.id = $2", column_select());
        let row = sqlx::query(&query)
            .bind(column.table_id)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        column_from_row(&row)
    }

    async fn update_column(
        &mut self,
        table: &Table,
        column_id: i64,
        fields: &ColumnFields,
    ) -> Result<Column, DbError> {
        if let Some(display_options) = &fields.display_options {
            sqlx::query(
                r#"
                UPDATE coldef.columns
                SET display_options = $1, updated_at = now()
                WHERE id = $2 AND table_id = $3
                "#,
            )
            .bind(display_options)
            .bind(column_id)
            .bind(table.id)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        }

        let query = format!("{} AND m.id = $2", column_select());
        let row = sqlx::query(&query)
            .bind(table.id)
            .bind(column_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?
            .ok_or_else(|| DbError::General(format!("column record {} not found", column_id)))?;
        column_from_row(&row)
    }

    async fn delete_column(&mut self, column_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM coldef.columns WHERE id = $1")
            .bind(column_id)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }
}
