use crate::db::connection::WorldDb;
use crate::TaleforgeError;

/// Graph nodes, graph edges and vector points.
const SCHEMA_001: &str = include_str!("migrations/001_world_store.surql");

/// Apply the schema to a connected database.
///
/// Safe to call multiple times: every statement uses `IF NOT EXISTS`.
pub async fn apply_schema(db: &WorldDb) -> Result<(), TaleforgeError> {
    db.query(SCHEMA_001).await?.check()?;
    Ok(())
}
