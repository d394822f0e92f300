//! PCAdb migration from the AutoCare MySQL source into PostgreSQL
//!
//! ```text
//! SourceReader -> schema::resolve -> plan -> RowTransformer -> BatchLoader
//! ```

pub mod destination;
pub mod error;
pub mod loader;
pub mod migrator;
pub mod plan;
pub mod schema;
pub mod source;
pub mod transform;
pub mod value;

pub use destination::PgDestination;
pub use error::{MigrationError, MigrationResult};
pub use loader::{BatchFailurePolicy, BatchLoader, DestinationStore, LoadStats, DEFAULT_BATCH_SIZE};
pub use migrator::{MigrationOptions, MigrationReport, Migrator, TableReport};
pub use schema::{resolve, EntityDef, FieldDef, FieldKind, ENTITIES};
pub use source::{MySqlSource, SourceConfig, SourceReader};
pub use transform::{Entity, RelationLookup, RowTransformer, SkipReason, Transformed};
pub use value::{FieldValue, SourceRow};
