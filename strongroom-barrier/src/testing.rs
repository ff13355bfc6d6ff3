//! Helpers for building a ready to use barrier in tests.

use std::sync::Arc;

use strongroom_encryption::UnsealShare;

use crate::{store::InMemoryStore, BarrierConfig, BarrierError, BarrierService};

/// An initialized but still sealed service over a fresh in-memory store,
/// together with the dealt shares.
pub async fn sealed_service(
    config: BarrierConfig,
) -> Result<(Arc<InMemoryStore>, BarrierService, Vec<UnsealShare>), BarrierError> {
    let store = Arc::new(InMemoryStore::new());
    let service = BarrierService::new(config, store.clone())?;
    let shares = service.initialize().await?;
    Ok((store, service, shares))
}

/// A default configured service unsealed with the first threshold shares.
pub async fn unsealed_service() -> Result<(Arc<InMemoryStore>, BarrierService), BarrierError> {
    let config = BarrierConfig::default();
    let threshold = usize::from(config.unseal.threshold);
    let (store, service, shares) = sealed_service(config).await?;
    for share in shares.iter().take(threshold) {
        service.submit_encoded_share(&share.encode()).await?;
    }
    Ok((store, service))
}
