use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One engine per property. The property is the database name a client
/// connects to; each gets its own WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Keep letters, digits, `_` and `-`, so a name can never leave the data directory.
    fn wal_file_name(tenant: &str) -> io::Result<String> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "property name too long",
            ));
        }
        let safe: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty property name",
            ));
        }
        Ok(format!("{safe}.wal"))
    }

    /// Get the engine for `tenant`, opening (and replaying) it on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let file_name = Self::wal_file_name(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many properties"));
        }

        // The entry lock makes concurrent first connections share one engine.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::Entry::Occupied(e) = &entry {
            return Ok(e.get().clone());
        }

        let engine = Arc::new(Engine::new(self.data_dir.join(&file_name))?);
        tokio::spawn(compactor::run_compactor(
            engine.clone(),
            self.compact_threshold,
            compactor::COMPACT_CHECK_INTERVAL,
        ));
        entry.or_insert(engine.clone());

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("opened property {tenant} ({file_name})");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
