use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::types::TypeOptions;
use crate::models::schema::ColumnFields;

/// Postgres truncates identifiers longer than this.
const MAX_IDENTIFIER_BYTES: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    fn new(field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn for_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(Some(field), message)
    }

    /// An error about the payload as a whole.
    pub fn non_field(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: Option<String>,
    pub data_type: String,
    pub type_options: Option<TypeOptions>,
    /// Never `Some(Value::Null)`; a null default is no default.
    pub default: Option<Value>,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateColumn {
    pub source_column: i64,
    pub copy_data: bool,
    pub copy_constraints: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    Add(ColumnDefinition),
    Duplicate(DuplicateColumn),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateColumn {
    pub source: ColumnSource,
    pub display_options: Option<Value>,
}

/// Physical changes requested by a partial update. `None` leaves a property
/// as is; `default: Some(None)` removes the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnAlteration {
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub type_options: Option<TypeOptions>,
    pub default: Option<Option<Value>>,
    pub nullable: Option<bool>,
}

impl ColumnAlteration {
    pub fn is_empty(&self) -> bool {
        *self == ColumnAlteration::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateColumn {
    pub alteration: ColumnAlteration,
    pub fields: ColumnFields,
}

impl CreateColumn {
    pub fn from_json(payload: &Value) -> Result<Self, Vec<FieldError>> {
        let mut reader = FieldReader::new(payload)?;
        let name = reader.name(true);
        let display_options = reader.object("display_options").flatten().map(Value::Object);

        let source = match reader.integer("source_column") {
            Some(Some(source_column)) => {
                if source_column < 0 {
                    reader.error(
                        "source_column",
                        "Ensure this value is greater than or equal to 0.",
                    );
                }
                ColumnSource::Duplicate(DuplicateColumn {
                    source_column,
                    copy_data: reader.boolean("copy_source_data").unwrap_or(true),
                    copy_constraints: reader.boolean("copy_source_constraints").unwrap_or(true),
                    name,
                })
            }
            Some(None) => {
                reader.error("source_column", "This field may not be null.");
                ColumnSource::Add(reader.definition(name))
            }
            None => ColumnSource::Add(reader.definition(name)),
        };

        reader.finish(CreateColumn {
            source,
            display_options,
        })
    }
}

impl UpdateColumn {
    pub fn from_json(payload: &Value) -> Result<Self, Vec<FieldError>> {
        let mut reader = FieldReader::new(payload)?;
        let name = reader.name(false);
        let data_type = match reader.string("type") {
            Some(Some(ty)) if ty.trim().is_empty() => {
                reader.error("type", "This field may not be blank.");
                None
            }
            Some(Some(ty)) => Some(ty),
            Some(None) => {
                reader.error("type", "This field may not be null.");
                None
            }
            None => None,
        };
        let alteration = ColumnAlteration {
            name,
            data_type,
            type_options: reader.object("type_options").flatten(),
            default: reader.value("default").map(|v| (!v.is_null()).then_some(v)),
            nullable: reader.boolean("nullable"),
        };
        let fields = ColumnFields {
            display_options: reader
                .object("display_options")
                .map(|o| o.map(Value::Object)),
        };
        reader.finish(UpdateColumn { alteration, fields })
    }
}

struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> FieldReader<'a> {
    fn new(payload: &'a Value) -> Result<Self, Vec<FieldError>> {
        match payload.as_object() {
            Some(map) => Ok(Self {
                map,
                errors: Vec::new(),
            }),
            None => Err(vec![FieldError::new(
                None,
                "Invalid data. Expected a dictionary.",
            )]),
        }
    }

    fn error(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(Some(field), message));
    }

    fn finish<T>(self, value: T) -> Result<T, Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.map.get(key).cloned()
    }

    /// `None` when absent, `Some(None)` when null.
    fn typed<T>(
        &mut self,
        key: &str,
        expected: &str,
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Option<Option<T>> {
        let map = self.map;
        let value = map.get(key)?;
        if value.is_null() {
            return Some(None);
        }
        match extract(value) {
            Some(v) => Some(Some(v)),
            None => {
                self.error(key, expected);
                None
            }
        }
    }

    fn string(&mut self, key: &str) -> Option<Option<String>> {
        self.typed(key, "Not a valid string.", |v| v.as_str().map(str::to_string))
    }

    fn integer(&mut self, key: &str) -> Option<Option<i64>> {
        self.typed(key, "A valid integer is required.", Value::as_i64)
    }

    fn object(&mut self, key: &str) -> Option<Option<Map<String, Value>>> {
        self.typed(key, "Expected a dictionary of items.", |v| {
            v.as_object().cloned()
        })
    }

    fn boolean(&mut self, key: &str) -> Option<bool> {
        match self.typed(key, "Must be a valid boolean.", Value::as_bool) {
            Some(Some(b)) => Some(b),
            Some(None) => {
                self.error(key, "This field may not be null.");
                None
            }
            None => None,
        }
    }

    fn name(&mut self, nullable: bool) -> Option<String> {
        match self.string("name") {
            Some(Some(name)) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    self.error("name", "This field may not be blank.");
                    None
                } else if name.len() > MAX_IDENTIFIER_BYTES {
                    self.error(
                        "name",
                        "Ensure this field has no more than 63 characters.",
                    );
                    None
                } else {
                    Some(name)
                }
            }
            Some(None) if !nullable => {
                self.error("name", "This field may not be null.");
                None
            }
            _ => None,
        }
    }

    fn definition(&mut self, name: Option<String>) -> ColumnDefinition {
        let data_type = match self.string("type") {
            Some(Some(ty)) if !ty.trim().is_empty() => ty,
            Some(Some(_)) => {
                self.error("type", "This field may not be blank.");
                String::new()
            }
            _ => {
                if !self.errors.iter().any(|e| e.field.as_deref() == Some("type")) {
                    self.error("type", "This field is required.");
                }
                String::new()
            }
        };
        ColumnDefinition {
            name,
            data_type,
            type_options: self.object("type_options").flatten(),
            default: self.value("default").filter(|v| !v.is_null()),
            nullable: self.boolean("nullable").unwrap_or(true),
        }
    }
}
