//! Wiring shared by the CLI commands: one pool, the SQLite store and
//! channel on top of it, and a producer publishing to that channel.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::producer::Producer;
use crate::sqlite_channel::SqliteEventChannel;
use crate::sqlite_store::SqliteStore;

pub struct App {
    pub store: Arc<SqliteStore>,
    pub channel: Arc<SqliteEventChannel>,
    pub producer: Producer,
}

impl App {
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let channel = Arc::new(SqliteEventChannel::new(
            pool,
            config.channel.partitions,
            config.channel.lease_ttl(),
        ));
        let producer = Producer::new(channel.clone());
        Ok(Self {
            store,
            channel,
            producer,
        })
    }
}
