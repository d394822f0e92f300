use thiserror::Error;

/// Errors that end (or abandon part of) a migration run
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Source or destination could not be reached
    #[error("Connection failed ({target}): {source}")]
    Connection {
        target: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Reading a table from the source failed
    #[error("Failed to read source table '{table}': {source}")]
    SourceRead {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// Relation lookup or existing-row comparison failed
    #[error("Destination query failed for '{table}': {source}")]
    Destination {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// A batch insert failed and the failure policy says to stop
    #[error("Batch insert into '{table}' failed: {source}")]
    BatchInsert {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Relation cycle between entity types: {0}")]
    DependencyCycle(String),

    #[error("Unknown table requested: {0}")]
    UnknownTable(String),
}

impl MigrationError {
    pub fn connection(target: &'static str, source: sqlx::Error) -> Self {
        Self::Connection { target, source }
    }

    pub fn source_read(table: impl Into<String>, source: sqlx::Error) -> Self {
        Self::SourceRead {
            table: table.into(),
            source,
        }
    }

    pub fn destination(table: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Destination {
            table: table.into(),
            source,
        }
    }

    pub fn batch_insert(table: impl Into<String>, source: sqlx::Error) -> Self {
        Self::BatchInsert {
            table: table.into(),
            source,
        }
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
