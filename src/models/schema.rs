use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::types::TypeOptions;

/// A registered database table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Table {
    pub id: i64,
    pub oid: i64,
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColumnDefault {
    pub value: Value,
    pub is_dynamic: bool,
}

/// A live column as the database describes it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PhysicalColumn {
    pub index: i64,
    pub attnum: i16,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub type_options: Option<TypeOptions>,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<ColumnDefault>,
}

/// A column metadata record joined with its live physical column. This is
/// what the API serializes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Column {
    pub id: i64,
    #[serde(rename = "table")]
    pub table_id: i64,
    #[serde(flatten)]
    pub physical: PhysicalColumn,
    pub display_options: Option<Value>,
}

impl Column {
    pub fn attnum(&self) -> i16 {
        self.physical.attnum
    }

    pub fn name(&self) -> &str {
        &self.physical.name
    }
}

/// Fields persisted on a metadata record when it is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewColumn {
    pub table_id: i64,
    pub attnum: i16,
    pub display_options: Option<Value>,
}

/// The editable metadata fields of a record. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnFields {
    pub display_options: Option<Option<Value>>,
}

impl ColumnFields {
    pub fn is_empty(&self) -> bool {
        self.display_options.is_none()
    }
}

/// One page of a listing.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Page<T> {
    pub count: i64,
    pub results: Vec<T>,
}
