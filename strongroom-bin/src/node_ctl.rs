use std::{fs, path::Path, sync::Arc};

use anyhow::{anyhow, bail};
use log::{debug, info, warn};
use strongroom_barrier::{store::SeaOrmStore, BarrierConfig, BarrierService, SealStatus};
use strongroom_core::{anyhow, log, serde_json, tokio};
use strongroom_migration::{Migrator, MigratorTrait};

/// Read a JSON `BarrierConfig`, falling back to defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BarrierConfig> {
    match path {
        Some(path) => parse_config(&fs::read_to_string(path)?),
        None => Ok(BarrierConfig::default()),
    }
}

pub fn parse_config(json: &str) -> anyhow::Result<BarrierConfig> {
    let config: BarrierConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

pub struct NodeCtl {
    service: Arc<BarrierService>,
}

impl NodeCtl {
    pub async fn new(
        config: BarrierConfig,
        db_url: String,
        max_connections: u32,
        migrate: bool,
    ) -> anyhow::Result<Self> {
        let database =
            strongroom_entity::database_connection_pool(&db_url, max_connections).await?;
        if migrate {
            debug!("Applying pending migrations");
            Migrator::up(&database, None).await?;
        }
        let store = Arc::new(SeaOrmStore::new(database));
        let service = Arc::new(BarrierService::new(config, store)?);
        Ok(NodeCtl { service })
    }

    pub fn service(&self) -> Arc<BarrierService> {
        self.service.clone()
    }

    /// First ever initialization. The encoded shares are returned exactly once.
    pub async fn init(&self) -> anyhow::Result<Vec<String>> {
        let shares = self.service.initialize().await?;
        let config = self.service.config();
        info!(
            "Dealt {} unseal shares, {} are required to unseal",
            config.unseal.shares, config.unseal.threshold
        );
        Ok(shares.iter().map(|s| s.encode().to_string()).collect())
    }

    pub async fn unseal(&self, shares: &[String]) -> anyhow::Result<()> {
        if !self.service.unseal_coordinator().is_initialized().await? {
            bail!("Barrier is not initialized, run `strongroom init` first");
        }
        for share in shares {
            match self.service.submit_encoded_share(share).await {
                Ok(SealStatus::Unsealed) => break,
                Ok(status) => debug!("Unseal progress {:?}", status),
                Err(err) => warn!("Rejected unseal share: {}", err),
            }
        }
        match self.service.seal_status().await {
            SealStatus::Unsealed => Ok(()),
            SealStatus::Unsealing {
                submitted,
                threshold,
            } => Err(anyhow!(
                "Barrier still sealed, {} of {} shares accepted",
                submitted,
                threshold
            )),
            SealStatus::Sealed => Err(anyhow!("Barrier still sealed, no share accepted")),
        }
    }

    /// Unseal, then host the barrier until ctrl-c.
    pub async fn serve(&self, shares: &[String]) -> anyhow::Result<()> {
        self.unseal(shares).await?;
        let sweeper = self.service.spawn_sweeper();
        info!("Barrier unsealed and serving");

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        sweeper.abort();
        self.service.cache().clear();
        Ok(())
    }
}
