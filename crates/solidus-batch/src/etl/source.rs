//! MySQL source extraction
//!
//! Tables are enumerated from `information_schema` and read with full-table
//! scans; each table's rows are held in memory until the table is migrated.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use super::error::{MigrationError, MigrationResult};
use super::value::{FieldValue, SourceRow};

/// Default MySQL port
pub const DEFAULT_SOURCE_PORT: u16 = 3306;

/// Read side of the migration
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// All base table names in the source database
    async fn tables(&self) -> MigrationResult<Vec<String>>;

    /// Every row of one table
    async fn read_table(&self, table: &str) -> MigrationResult<Vec<SourceRow>>;
}

/// Connection parameters for the source database
#[derive(Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Run `SET SESSION foreign_key_checks = 0` on every pooled connection
    pub disable_foreign_key_checks: bool,
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("disable_foreign_key_checks", &self.disable_foreign_key_checks)
            .finish()
    }
}

impl SourceConfig {
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// [`SourceReader`] over a MySQL pool
pub struct MySqlSource {
    pool: MySqlPool,
}

impl MySqlSource {
    pub async fn connect(config: &SourceConfig) -> MigrationResult<Self> {
        let mut options = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

        if config.disable_foreign_key_checks {
            options = options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET SESSION foreign_key_checks = 0")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            });
        }

        let pool = options
            .connect_with(config.connect_options())
            .await
            .map_err(|e| MigrationError::connection("source", e))?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to source database"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceReader for MySqlSource {
    async fn tables(&self) -> MigrationResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT CAST(table_name AS CHAR)
            FROM information_schema.tables
            WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrationError::source_read("information_schema.tables", e))
    }

    async fn read_table(&self, table: &str) -> MigrationResult<Vec<SourceRow>> {
        let sql = format!("SELECT * FROM {}", quote_identifier(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::source_read(table, e))?;

        Ok(rows.iter().map(decode_row).collect())
    }
}

/// Backtick-quote a MySQL identifier
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn decode_row(row: &MySqlRow) -> SourceRow {
    let mut out = SourceRow::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name());
        out.push(column.name(), value);
    }
    out
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> FieldValue {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.trim_end_matches(" UNSIGNED");

    let decoded = match base {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index).map(FieldValue::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            if upper.ends_with("UNSIGNED") {
                row.try_get::<Option<u64>, _>(index).map(|v| {
                    v.map(|n| i64::try_from(n).map_or(FieldValue::Text(n.to_string()), FieldValue::Int))
                        .unwrap_or(FieldValue::Null)
                })
            } else {
                row.try_get::<Option<i64>, _>(index).map(FieldValue::from)
            }
        }
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .map(|v| v.map(FieldValue::Float).unwrap_or(FieldValue::Null)),
        "DECIMAL" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(index)
            .map(|v| v.map(|d| FieldValue::Decimal(d.to_string())).unwrap_or(FieldValue::Null)),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index).map(FieldValue::from),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(FieldValue::DateTime).unwrap_or(FieldValue::Null)),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(|t| FieldValue::DateTime(t.naive_utc())).unwrap_or(FieldValue::Null)),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|v| {
                v.map(|bytes| FieldValue::Text(String::from_utf8_lossy(&bytes).into_owned()))
                    .unwrap_or(FieldValue::Null)
            }),
        _ => row.try_get::<Option<String>, _>(index).map(FieldValue::from),
    };

    match decoded {
        Ok(value) => value,
        Err(e) => {
            // Zero dates and similar values MySQL allows but cannot be decoded
            tracing::debug!(column = index, type_name, error = %e, "Undecodable source value read as NULL");
            FieldValue::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("Parts"), "`Parts`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_debug_hides_password() {
        let config = SourceConfig {
            host: "db.internal".into(),
            port: DEFAULT_SOURCE_PORT,
            database: "pcadb".into(),
            user: "reader".into(),
            password: "hunter2".into(),
            disable_foreign_key_checks: true,
            connect_timeout_secs: 10,
        };
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("db.internal"));
        assert!(!rendered.contains("hunter2"));
    }
}
