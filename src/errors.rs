use thiserror::Error;

/// Custom error type for catalog and schema operations.
///
/// Every failure a backend can report while mutating columns has its own
/// variant, so callers can match on the kind instead of inspecting driver
/// error codes.
#[derive(Error, Debug)]
pub enum DbError {
    /// Unclassified database execution failure.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// A column with this name already exists in the table.
    #[error("Column {0} already exists")]
    DuplicateColumn(String),
    /// The database has no implementation for the requested cast.
    #[error("Undefined function: {0}")]
    UndefinedFunction(String),
    /// No live column sits at this index.
    #[error("Column index {0} is out of range")]
    ColumnIndexOutOfRange(i64),
    /// No live column has this attnum.
    #[error("Column with attnum {0} not found")]
    ColumnNotFound(i16),
    #[error("Table {0} not found")]
    TableNotFound(i64),
    /// A type option key the type does not take.
    #[error("Unknown type option: {0}")]
    UnknownTypeOption(String),
    /// Known type option keys with values the type rejects.
    #[error("Invalid type options: {0}")]
    InvalidTypeOption(String),
    /// Default value that cannot be cast to the column type.
    #[error("Invalid default: {0}")]
    InvalidDefault(String),
    /// Unknown or unsupported column type.
    #[error("Invalid type: {0}")]
    InvalidType(String),
    /// Type change blocked by a dynamically generated default.
    #[error("Column {0} has a dynamically generated default")]
    DynamicDefault(String),
    /// Configuration error (e.g., invalid database URL or missing parameters).
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transaction error (e.g., failed to commit or rollback a transaction).
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Connection error (e.g., issues with network or database connection).
    #[error("Connection error: {0}")]
    Connection(String),
    /// General error with a custom message.
    #[error("Error: {0}")]
    General(String),
}

impl DbError {
    /// Classifies a driver error by its SQLSTATE.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };
        match code.as_deref() {
            Some("42701") => DbError::DuplicateColumn(constraint_subject(&err)),
            Some("42883") | Some("42846") => DbError::UndefinedFunction(database_message(&err)),
            Some("42704") => DbError::InvalidType(database_message(&err)),
            _ => DbError::Sqlx(err),
        }
    }

    /// Classifies a failure raised while casting a default value. Data
    /// exceptions (class 22) mean the literal does not fit the type.
    pub fn from_default_cast(err: sqlx::Error, default: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().is_some_and(|c| c.starts_with("22")) => {
                DbError::InvalidDefault(default.to_string())
            }
            _ => DbError::from_sqlx(err),
        }
    }
}

fn database_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

// Postgres reports `column "x" of relation "t" already exists`.
fn constraint_subject(err: &sqlx::Error) -> String {
    let message = database_message(err);
    message
        .split('"')
        .nth(1)
        .map(str::to_string)
        .unwrap_or(message)
}
