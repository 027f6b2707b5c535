use std::path::Path;

use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::capabilities::Capabilities;
use surrealdb::Surreal;

use crate::config::load_layered;
use crate::TaleforgeError;

/// Unified database handle type. Works with embedded, in-memory and remote SurrealDB.
pub type WorldDb = Surreal<Any>;

fn default_namespace() -> String {
    "taleforge".to_string()
}

fn default_database() -> String {
    "world".to_string()
}

/// Database connection configuration.
/// Loaded from `{data_path}/database.toml`, env vars, or defaults to embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DbConfig {
    /// Embedded RocksDB (default). Single-process access.
    Embedded {
        /// Overrides the default RocksDB path (`{data_path}/world.db`)
        #[serde(default)]
        path: Option<String>,
    },
    /// Volatile in-process store, for dry runs.
    Memory,
    /// Remote SurrealDB server via WebSocket.
    Remote {
        /// WebSocket endpoint (e.g. `ws://127.0.0.1:8000`)
        endpoint: String,
        /// Username (can also be set via `TALEFORGE_DB_USER`)
        #[serde(default)]
        username: Option<String>,
        /// Password (can also be set via `TALEFORGE_DB_PASS`)
        #[serde(default)]
        password: Option<String>,
        #[serde(default = "default_namespace")]
        namespace: String,
        #[serde(default = "default_database")]
        database: String,
    },
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::Embedded { path: None }
    }
}

/// Load database config with priority:
/// 1. `{data_path}/database.toml` file
/// 2. `TALEFORGE_DB_URL` env var → `Remote` config
/// 3. Default → `Embedded { path: None }`
pub fn load_db_config(data_path: &Path) -> DbConfig {
    if data_path.join("database.toml").exists() {
        return load_layered(data_path, "database.toml", "TALEFORGE_DB_CONFIG");
    }

    if let Ok(url) = std::env::var("TALEFORGE_DB_URL") {
        tracing::info!("Loaded database config from TALEFORGE_DB_URL env");
        return DbConfig::Remote {
            endpoint: url,
            username: std::env::var("TALEFORGE_DB_USER").ok(),
            password: std::env::var("TALEFORGE_DB_PASS").ok(),
            namespace: default_namespace(),
            database: default_database(),
        };
    }

    DbConfig::default()
}

/// Connect to SurrealDB according to `config`.
///
/// * `data_path` - Base data directory (default RocksDB location for embedded mode)
pub async fn init_db(config: &DbConfig, data_path: &Path) -> Result<WorldDb, TaleforgeError> {
    match config {
        DbConfig::Embedded { path } => {
            let db_path = path.as_deref().map(String::from).unwrap_or_else(|| {
                data_path.join("world.db").to_string_lossy().into_owned()
            });
            let surreal_config = surrealdb::opt::Config::new()
                .capabilities(Capabilities::all().with_all_experimental_features_allowed());
            let db =
                surrealdb::engine::any::connect((format!("rocksdb:{db_path}"), surreal_config))
                    .await?;
            db.use_ns(default_namespace())
                .use_db(default_database())
                .await?;
            Ok(db)
        }
        DbConfig::Memory => {
            let db = surrealdb::engine::any::connect("mem://").await?;
            db.use_ns(default_namespace())
                .use_db(default_database())
                .await?;
            Ok(db)
        }
        DbConfig::Remote {
            endpoint,
            username,
            password,
            namespace,
            database,
        } => {
            let db = surrealdb::engine::any::connect(endpoint).await?;
            let user = username
                .clone()
                .or_else(|| std::env::var("TALEFORGE_DB_USER").ok())
                .unwrap_or_else(|| "root".to_string());
            let pass = password
                .clone()
                .or_else(|| std::env::var("TALEFORGE_DB_PASS").ok())
                .unwrap_or_else(|| "root".to_string());
            db.signin(surrealdb::opt::auth::Root {
                username: &user,
                password: &pass,
            })
            .await?;
            db.use_ns(namespace).use_db(database).await?;
            Ok(db)
        }
    }
}
