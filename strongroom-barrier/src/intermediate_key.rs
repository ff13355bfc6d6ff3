use std::sync::Arc;

use log::{info, warn};

use strongroom_core::{log, IntermediateKeyId, TenantId};
use strongroom_encryption::{
    IntermediateKeyCustodian, KeyCustodian, LockedContentKey, TenantScopedSecret,
    VersionScopedSecret, WrapAlgorithm,
};

use crate::{locks::KeyedLocks, store::BarrierStore, BarrierError, IntermediateKey, RootKeyManager};

/// Outcome of an intermediate key rotation.
#[derive(Clone, Debug)]
pub struct IntermediateKeyRotation {
    pub active: IntermediateKey,
    pub retired: Option<IntermediateKeyId>,
}

/// Per tenant keys wrapped by the root key. Unwrapped intermediate material
/// never outlives the call that needed it.
pub struct IntermediateKeyManager {
    store: Arc<dyn BarrierStore>,
    root: Arc<RootKeyManager>,
    algorithm: WrapAlgorithm,
    // readers wrap content keys, writers create or rotate the active key
    tenant_locks: KeyedLocks<TenantId>,
}

impl IntermediateKeyManager {
    pub fn new(
        store: Arc<dyn BarrierStore>,
        root: Arc<RootKeyManager>,
        algorithm: WrapAlgorithm,
    ) -> Self {
        IntermediateKeyManager {
            store,
            root,
            algorithm,
            tenant_locks: KeyedLocks::new(),
        }
    }

    async fn find_active(&self, tenant_id: TenantId) -> Result<Option<IntermediateKey>, BarrierError> {
        let active = self.store.list_active_intermediate_keys(tenant_id).await?;
        if active.len() > 1 {
            warn!(
                "Tenant {} has {} active intermediate keys, using the newest",
                tenant_id,
                active.len()
            );
        }
        Ok(active.into_iter().max_by_key(|k| k.created_at))
    }

    fn custodian_for(&self, key: &IntermediateKey) -> Result<IntermediateKeyCustodian, BarrierError> {
        let scoped = self.root.unlock_intermediate(&key.locked_key()).map_err(|err| {
            if err == BarrierError::AuthenticationFailure {
                warn!(
                    "Intermediate key {} for tenant {} failed authentication",
                    key.id, key.tenant_id
                );
            }
            err
        })?;
        Ok(IntermediateKeyCustodian::new(
            scoped.key_id,
            scoped.secret,
            self.algorithm,
        )?)
    }

    fn new_key(&self, tenant_id: TenantId) -> Result<IntermediateKey, BarrierError> {
        let locked = self.root.lock_intermediate(&TenantScopedSecret {
            tenant_id,
            key_id: IntermediateKeyId::new(),
            secret: self.root.gen_intermediate_secret()?,
        })?;
        Ok(IntermediateKey::from_locked(locked))
    }

    async fn create_first(&self, tenant_id: TenantId) -> Result<(), BarrierError> {
        let _guard = self.tenant_locks.write(tenant_id).await;
        if self.find_active(tenant_id).await?.is_some() {
            return Ok(());
        }
        let key = self.new_key(tenant_id)?;
        match self.store.create_intermediate_key(&key).await {
            Ok(()) => {
                info!("Created intermediate key {} for tenant {}", key.id, tenant_id);
                Ok(())
            }
            // created by another process in the meantime
            Err(BarrierError::ConcurrentModification(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// The tenant's active intermediate key, created on first use.
    pub async fn active(&self, tenant_id: TenantId) -> Result<IntermediateKey, BarrierError> {
        if !self.root.is_unsealed() {
            return Err(BarrierError::ServiceSealed);
        }
        for _ in 0..2 {
            if let Some(active) = self.find_active(tenant_id).await? {
                return Ok(active);
            }
            self.create_first(tenant_id).await?;
        }
        Err(BarrierError::ConcurrentModification(format!(
            "no active intermediate key for tenant {}",
            tenant_id
        )))
    }

    /// Wrap fresh content key material under the tenant's active intermediate
    /// key. Holds the tenant read lock so a concurrent rotation is observed
    /// either entirely before or entirely after.
    pub async fn lock_content_key(
        &self,
        tenant_id: TenantId,
        secret: &VersionScopedSecret,
    ) -> Result<LockedContentKey, BarrierError> {
        if !self.root.is_unsealed() {
            return Err(BarrierError::ServiceSealed);
        }
        for _ in 0..2 {
            {
                let _guard = self.tenant_locks.read(tenant_id).await;
                if let Some(active) = self.find_active(tenant_id).await? {
                    let custodian = self.custodian_for(&active)?;
                    return Ok(custodian.lock(secret)?);
                }
            }
            self.create_first(tenant_id).await?;
        }
        Err(BarrierError::ConcurrentModification(format!(
            "no active intermediate key for tenant {}",
            tenant_id
        )))
    }

    /// Unwrap content key material with the intermediate key recorded on the
    /// version, whether that key is still active or already retired.
    pub async fn unlock_content_key(
        &self,
        tenant_id: TenantId,
        locked: &LockedContentKey,
    ) -> Result<VersionScopedSecret, BarrierError> {
        if !self.root.is_unsealed() {
            return Err(BarrierError::ServiceSealed);
        }
        let key = self
            .store
            .get_intermediate_key(tenant_id, locked.intermediate_key_id)
            .await?
            .ok_or_else(|| {
                BarrierError::NotFound(format!("intermediate key {}", locked.intermediate_key_id))
            })?;
        let custodian = self.custodian_for(&key)?;
        custodian.unlock(locked).map_err(|err| {
            warn!(
                "Content key {} v{} failed to unwrap: {}",
                locked.elastic_key_id, locked.version, err
            );
            err.into()
        })
    }

    /// Replace the tenant's active intermediate key. Versions wrapped by the
    /// previous key keep using it for unwrap.
    pub async fn rotate(&self, tenant_id: TenantId) -> Result<IntermediateKeyRotation, BarrierError> {
        if !self.root.is_unsealed() {
            return Err(BarrierError::ServiceSealed);
        }
        let _guard = self.tenant_locks.write(tenant_id).await;
        let next = self.new_key(tenant_id)?;
        let retired = match self.find_active(tenant_id).await? {
            Some(current) => {
                self.store
                    .rotate_intermediate_key(tenant_id, current.id, &next)
                    .await?;
                Some(current.id)
            }
            None => {
                self.store.create_intermediate_key(&next).await?;
                None
            }
        };
        info!(
            "Rotated intermediate key for tenant {} to {} (retired {:?})",
            tenant_id, next.id, retired
        );
        Ok(IntermediateKeyRotation {
            active: next,
            retired,
        })
    }

    pub async fn list_retired(&self, tenant_id: TenantId) -> Result<Vec<IntermediateKey>, BarrierError> {
        self.store.list_retired_intermediate_keys(tenant_id).await
    }
}
