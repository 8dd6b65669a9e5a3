// Persistence adapters: blob objects, task/document metadata, and the work
// queue. Postgres is the default backend; in-memory twins back the test
// suites and single-process local runs.

pub mod documents;
pub mod object;
pub mod queue;
pub mod tasks;
pub mod verified;

pub use documents::{DocumentStore, MemoryDocumentStore, PostgresDocumentStore};
pub use object::{MemoryObjectStore, ObjectMetadata, ObjectStore, PostgresObjectStore};
pub use queue::{MemoryQueue, PostgresQueue, QueueMessage, WorkQueue};
pub use tasks::{MemoryTaskStore, PostgresTaskStore, TaskStore};
pub use verified::{crawled_key, guess_content_type, temp_key, upload_key, VerifiedStore};

use driftnet_common::Result;
use sqlx::PgPool;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}
