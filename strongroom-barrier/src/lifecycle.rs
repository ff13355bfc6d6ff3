use std::{future::Future, sync::Arc};

use chrono::Utc;
use log::{info, warn};

use strongroom_core::{chrono, log, tokio, ElasticKeyId, TenantId};
use strongroom_encryption::{ContentKeyCustodian, KeyAlgorithm, VersionScopedSecret};

use crate::{
    locks::KeyedLocks, store::BarrierStore, BarrierError, ElasticKey, ElasticKeyStatus, ElasticKeyVersion,
    IntermediateKeyManager, Operation, UnwrappedKeyCache, VersionStatus,
};

/// Drives elastic keys through `Creating -> Active <-> Disabled ->
/// PendingDestroy -> Destroyed`. Transitions on one key are serialized, keys
/// are independent of each other.
pub struct ElasticKeyLifecycle {
    store: Arc<dyn BarrierStore>,
    intermediate: Arc<IntermediateKeyManager>,
    cache: Arc<UnwrappedKeyCache>,
    transition_locks: KeyedLocks<ElasticKeyId>,
}

/// Runs a store commit and the cache purge that has to follow it on a
/// detached task. Dropping the caller's future cannot split the pair.
async fn commit_then_purge<C, P>(commit: C, purge: P) -> Result<(), BarrierError>
where
    C: Future<Output = Result<(), BarrierError>> + Send + 'static,
    P: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        commit.await?;
        purge();
        Ok(())
    })
    .await
    .map_err(|err| BarrierError::StoreUnavailable(format!("commit task failed: {}", err)))?
}

impl ElasticKeyLifecycle {
    pub fn new(
        store: Arc<dyn BarrierStore>,
        intermediate: Arc<IntermediateKeyManager>,
        cache: Arc<UnwrappedKeyCache>,
    ) -> Self {
        ElasticKeyLifecycle {
            store,
            intermediate,
            cache,
            transition_locks: KeyedLocks::new(),
        }
    }

    /// Tenant scoped lookup. Runs before any key material is touched.
    pub async fn get(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        let key = self
            .store
            .get_elastic_key(tenant_id, id)
            .await?
            .ok_or_else(|| BarrierError::NotFound(format!("elastic key {}", id)))?;
        if key.tenant_id != tenant_id {
            return Err(BarrierError::TenantMismatch);
        }
        Ok(key)
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        status: Option<ElasticKeyStatus>,
    ) -> Result<Vec<ElasticKey>, BarrierError> {
        self.store.list_elastic_keys(tenant_id, status).await
    }

    /// Insert a `Creating` record and immediately generate version 1. If
    /// generation fails the key stays `Creating` and [`Self::activate`] retries it.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<ElasticKey, BarrierError> {
        let now = Utc::now();
        let key = ElasticKey {
            id: ElasticKeyId::new(),
            tenant_id,
            name: name.to_string(),
            description: description.to_string(),
            algorithm,
            status: ElasticKeyStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_elastic_key(&key).await?;
        info!(
            "Created elastic key {} ({}, {}) for tenant {}",
            key.id, key.name, algorithm, tenant_id
        );
        self.activate(tenant_id, key.id).await
    }

    pub async fn activate(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        let _guard = self.transition_locks.write(id).await;
        let key = self.get(tenant_id, id).await?;
        if key.status != ElasticKeyStatus::Creating {
            return Err(BarrierError::InvalidStateTransition(format!(
                "activate while {}",
                key.status
            )));
        }

        let first = self.generate_version(&key, 1).await?;
        self.store
            .activate_with_first_version(tenant_id, id, &first)
            .await?;
        info!("Activated elastic key {} with version 1", id);
        self.get(tenant_id, id).await
    }

    /// Rotate relative to the active version observed on entry. A caller that
    /// loses a race with another rotation gets `ConcurrentModification`.
    pub async fn rotate(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKeyVersion, BarrierError> {
        let key = self.get(tenant_id, id).await?;
        key.status.permits(Operation::Rotate, id)?;
        let observed = self.active_version(tenant_id, id).await?;
        self.rotate_from(tenant_id, id, observed.version).await
    }

    /// Generate version `expected_active + 1`, activate it and retire `expected_active`.
    pub async fn rotate_from(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected_active: u32,
    ) -> Result<ElasticKeyVersion, BarrierError> {
        let _guard = self.transition_locks.write(id).await;
        let key = self.get(tenant_id, id).await?;
        key.status.permits(Operation::Rotate, id)?;
        let current = self.active_version(tenant_id, id).await?;
        if current.version != expected_active {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} was rotated to version {}",
                id, current.version
            )));
        }

        let next = self.generate_version(&key, expected_active + 1).await?;
        let store = self.store.clone();
        let cache = self.cache.clone();
        let staged = next.clone();
        commit_then_purge(
            async move {
                store
                    .rotate_version(tenant_id, id, expected_active, &staged)
                    .await
            },
            move || cache.invalidate_version(id, expected_active),
        )
        .await?;
        info!(
            "Rotated elastic key {} from version {} to {}",
            id, expected_active, next.version
        );
        self.version(tenant_id, id, next.version).await
    }

    pub async fn disable(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        self.set_status(tenant_id, id, ElasticKeyStatus::Disabled).await
    }

    /// Back to `Active` with the same active version.
    pub async fn enable(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        self.set_status(tenant_id, id, ElasticKeyStatus::Active).await
    }

    async fn set_status(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        next: ElasticKeyStatus,
    ) -> Result<ElasticKey, BarrierError> {
        let _guard = self.transition_locks.write(id).await;
        let key = self.get(tenant_id, id).await?;
        key.status.transition(next)?;
        let updated = self
            .store
            .update_elastic_key_status(tenant_id, id, key.status, next)
            .await?;
        info!("Elastic key {} {} -> {}", id, key.status, next);
        Ok(updated)
    }

    /// `Disabled -> PendingDestroy`. Every version is retired, decrypt and
    /// verify keep working until [`Self::destroy`].
    pub async fn schedule_destroy(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, BarrierError> {
        let _guard = self.transition_locks.write(id).await;
        let key = self.get(tenant_id, id).await?;
        key.status.transition(ElasticKeyStatus::PendingDestroy)?;
        let store = self.store.clone();
        let cache = self.cache.clone();
        commit_then_purge(
            async move { store.begin_destroy(tenant_id, id).await },
            move || cache.purge_elastic_key(id),
        )
        .await?;
        info!("Elastic key {} scheduled for destruction", id);
        self.get(tenant_id, id).await
    }

    /// `PendingDestroy -> Destroyed`. Deletes all wrapped material. Irreversible.
    pub async fn destroy(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        let _guard = self.transition_locks.write(id).await;
        let key = self.get(tenant_id, id).await?;
        key.status.transition(ElasticKeyStatus::Destroyed)?;
        let versions = self.store.list_versions(tenant_id, id).await?.len();
        let store = self.store.clone();
        let cache = self.cache.clone();
        commit_then_purge(
            async move { store.shred(tenant_id, id).await },
            move || cache.purge_elastic_key(id),
        )
        .await?;
        warn!(
            "Crypto-shredded elastic key {} of tenant {} ({} versions)",
            id, tenant_id, versions
        );
        self.get(tenant_id, id).await
    }

    pub async fn update_description(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        description: &str,
    ) -> Result<ElasticKey, BarrierError> {
        let _guard = self.transition_locks.write(id).await;
        let key = self.get(tenant_id, id).await?;
        if key.status == ElasticKeyStatus::Destroyed {
            return Err(BarrierError::InvalidStateTransition(format!(
                "update description while {}",
                key.status
            )));
        }
        self.store
            .update_elastic_key_description(tenant_id, id, description)
            .await
    }

    pub async fn active_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<ElasticKeyVersion, BarrierError> {
        self.store
            .get_active_version(tenant_id, id)
            .await?
            .ok_or_else(|| BarrierError::NotFound(format!("active version of {}", id)))
    }

    pub async fn version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        version: u32,
    ) -> Result<ElasticKeyVersion, BarrierError> {
        self.store
            .get_version(tenant_id, id, version)
            .await?
            .ok_or_else(|| BarrierError::NotFound(format!("version {} of {}", version, id)))
    }

    pub async fn list_versions(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Vec<ElasticKeyVersion>, BarrierError> {
        self.get(tenant_id, id).await?;
        self.store.list_versions(tenant_id, id).await
    }

    async fn generate_version(
        &self,
        key: &ElasticKey,
        version: u32,
    ) -> Result<ElasticKeyVersion, BarrierError> {
        let material = ContentKeyCustodian::generate_material(key.algorithm);
        let public_key = ContentKeyCustodian::new(&material, key.algorithm)?.public_key();
        let locked = self
            .intermediate
            .lock_content_key(
                key.tenant_id,
                &VersionScopedSecret {
                    elastic_key_id: key.id,
                    version,
                    secret: material,
                },
            )
            .await?;
        Ok(ElasticKeyVersion {
            elastic_key_id: key.id,
            tenant_id: key.tenant_id,
            version,
            intermediate_key_id: locked.intermediate_key_id,
            envelope: Some(locked.envelope),
            public_key,
            status: VersionStatus::Generating,
            created_at: Utc::now(),
            retired_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strongroom_core::tokio;
    use strongroom_encryption::{RootKeyCustodian, SecretKey, WrapAlgorithm, KEY_LEN};

    use crate::{store::InMemoryStore, CacheConfig, CacheKey, RootKeyManager};

    struct Harness {
        store: Arc<InMemoryStore>,
        cache: Arc<UnwrappedKeyCache>,
        lifecycle: Arc<ElasticKeyLifecycle>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let root = Arc::new(RootKeyManager::new());
        root.install(
            RootKeyCustodian::new(SecretKey::generate(KEY_LEN), WrapAlgorithm::default())
                .expect("Invalid RootKeyCustodian"),
        );
        let intermediate = Arc::new(IntermediateKeyManager::new(
            store.clone(),
            root,
            WrapAlgorithm::default(),
        ));
        let cache = Arc::new(UnwrappedKeyCache::new(&CacheConfig::default()));
        let lifecycle = Arc::new(ElasticKeyLifecycle::new(
            store.clone(),
            intermediate,
            cache.clone(),
        ));
        Harness {
            store,
            cache,
            lifecycle,
        }
    }

    async fn warm(cache: &UnwrappedKeyCache, id: ElasticKeyId, version: u32) {
        cache
            .with_material(
                CacheKey {
                    elastic_key_id: id,
                    version,
                },
                || async {
                    Ok((
                        SecretKey::generate(KEY_LEN),
                        strongroom_core::IntermediateKeyId::new(),
                    ))
                },
                |_| Ok(()),
            )
            .await
            .expect("Invalid with_material");
    }

    #[tokio::test]
    async fn test_create_activates_version_one() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "payments", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");
        assert_eq!(key.status, ElasticKeyStatus::Active);

        let versions = h
            .lifecycle
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].status, VersionStatus::Active);
        assert!(versions[0].public_key.is_none());

        assert!(matches!(
            h.lifecycle
                .create(tenant_id, "payments", "", KeyAlgorithm::Aes256GcmSiv)
                .await,
            Err(BarrierError::AlreadyExists(_))
        ));
        assert!(matches!(
            h.lifecycle.activate(tenant_id, key.id).await,
            Err(BarrierError::InvalidStateTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_signing_key_has_public_key() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "invoice-signing", "", KeyAlgorithm::Ed25519)
            .await
            .expect("Invalid create");
        let active = h
            .lifecycle
            .active_version(tenant_id, key.id)
            .await
            .expect("Invalid active_version");
        assert_eq!(active.public_key.map(|k| k.len()), Some(32));
    }

    #[tokio::test]
    async fn test_rotation_sequence() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "rotating", "", KeyAlgorithm::ChaCha20Poly1305)
            .await
            .expect("Invalid create");

        warm(&h.cache, key.id, 1).await;
        let v2 = h
            .lifecycle
            .rotate(tenant_id, key.id)
            .await
            .expect("Invalid rotate");
        assert_eq!(v2.version, 2);
        assert_eq!(v2.status, VersionStatus::Active);
        assert_eq!(h.cache.count_for(&key.id), 0);

        // stale expectation
        assert!(matches!(
            h.lifecycle.rotate_from(tenant_id, key.id, 1).await,
            Err(BarrierError::ConcurrentModification(_))
        ));

        for _ in 0..3 {
            h.lifecycle
                .rotate(tenant_id, key.id)
                .await
                .expect("Invalid rotate");
        }
        let versions = h
            .lifecycle
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(
            versions
                .iter()
                .filter(|v| v.status == VersionStatus::Active)
                .count(),
            1
        );
        assert!(versions[..4]
            .iter()
            .all(|v| v.status == VersionStatus::Retired && v.retired_at.is_some()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotations() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "contended", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = h.lifecycle.clone();
                tokio::spawn(async move { lifecycle.rotate_from(tenant_id, key.id, 1).await })
            })
            .collect();
        let mut won = 0;
        for task in tasks {
            match task.await.expect("Invalid join") {
                Ok(version) => {
                    assert_eq!(version.version, 2);
                    won += 1;
                }
                Err(err) => assert!(matches!(err, BarrierError::ConcurrentModification(_))),
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test]
    async fn test_disable_enable() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "toggle", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");

        let disabled = h
            .lifecycle
            .disable(tenant_id, key.id)
            .await
            .expect("Invalid disable");
        assert_eq!(disabled.status, ElasticKeyStatus::Disabled);
        assert!(matches!(
            h.lifecycle.rotate(tenant_id, key.id).await,
            Err(BarrierError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            h.lifecycle.disable(tenant_id, key.id).await,
            Err(BarrierError::InvalidStateTransition(_))
        ));

        let enabled = h
            .lifecycle
            .enable(tenant_id, key.id)
            .await
            .expect("Invalid enable");
        assert_eq!(enabled.status, ElasticKeyStatus::Active);
        let active = h
            .lifecycle
            .active_version(tenant_id, key.id)
            .await
            .expect("Invalid active_version");
        assert_eq!(active.version, 1);
    }

    #[tokio::test]
    async fn test_destroy() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "doomed", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");
        h.lifecycle
            .rotate(tenant_id, key.id)
            .await
            .expect("Invalid rotate");

        // destroy requires the full Disabled -> PendingDestroy -> Destroyed path
        assert!(matches!(
            h.lifecycle.schedule_destroy(tenant_id, key.id).await,
            Err(BarrierError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            h.lifecycle.destroy(tenant_id, key.id).await,
            Err(BarrierError::InvalidStateTransition(_))
        ));

        h.lifecycle
            .disable(tenant_id, key.id)
            .await
            .expect("Invalid disable");
        warm(&h.cache, key.id, 2).await;
        let pending = h
            .lifecycle
            .schedule_destroy(tenant_id, key.id)
            .await
            .expect("Invalid schedule_destroy");
        assert_eq!(pending.status, ElasticKeyStatus::PendingDestroy);
        assert_eq!(h.cache.count_for(&key.id), 0);
        assert!(matches!(
            h.lifecycle.enable(tenant_id, key.id).await,
            Err(BarrierError::InvalidStateTransition(_))
        ));
        let versions = h
            .lifecycle
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert!(versions.iter().all(|v| v.status == VersionStatus::Retired));
        assert!(versions.iter().all(|v| v.envelope.is_some()));

        let destroyed = h
            .lifecycle
            .destroy(tenant_id, key.id)
            .await
            .expect("Invalid destroy");
        assert_eq!(destroyed.status, ElasticKeyStatus::Destroyed);
        let versions = h
            .lifecycle
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().all(|v| v.envelope.is_none()));

        for next in [ElasticKeyStatus::Active, ElasticKeyStatus::Disabled] {
            assert!(matches!(
                h.lifecycle.set_status(tenant_id, key.id, next).await,
                Err(BarrierError::InvalidStateTransition(_))
            ));
        }
        assert!(matches!(
            h.lifecycle
                .update_description(tenant_id, key.id, "resurrected")
                .await,
            Err(BarrierError::InvalidStateTransition(_))
        ));
        assert_eq!(h.lifecycle.transition_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_rotation_still_purges() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "impatient", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");
        warm(&h.cache, key.id, 1).await;

        h.store.set_commit_delay(Some(Duration::from_millis(200)));
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            h.lifecycle.rotate(tenant_id, key.id),
        )
        .await;
        assert!(res.is_err());
        h.store.set_commit_delay(None);

        // the detached commit finishes and purges on its own
        tokio::time::sleep(Duration::from_millis(400)).await;
        let active = h
            .lifecycle
            .active_version(tenant_id, key.id)
            .await
            .expect("Invalid active_version");
        assert_eq!(active.version, 2);
        assert!(!h.cache.contains(&CacheKey {
            elastic_key_id: key.id,
            version: 1,
        }));
        assert_eq!(h.lifecycle.transition_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let h = harness();
        let owner = TenantId::new();
        let key = h
            .lifecycle
            .create(owner, "private", "owned", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");
        let intruder = TenantId::new();
        assert!(matches!(
            h.lifecycle.get(intruder, key.id).await,
            Err(BarrierError::NotFound(_))
        ));
        assert!(matches!(
            h.lifecycle.disable(intruder, key.id).await,
            Err(BarrierError::NotFound(_))
        ));
        assert!(h
            .lifecycle
            .list(intruder, None)
            .await
            .expect("Invalid list")
            .is_empty());

        let updated = h
            .lifecycle
            .update_description(owner, key.id, "rewritten")
            .await
            .expect("Invalid update_description");
        assert_eq!(updated.description, "rewritten");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state() {
        let h = harness();
        let tenant_id = TenantId::new();
        let key = h
            .lifecycle
            .create(tenant_id, "flaky", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid create");

        h.store.set_fail_writes(true);
        assert!(matches!(
            h.lifecycle.rotate(tenant_id, key.id).await,
            Err(BarrierError::StoreUnavailable(_))
        ));
        assert!(matches!(
            h.lifecycle.disable(tenant_id, key.id).await,
            Err(BarrierError::StoreUnavailable(_))
        ));
        h.store.set_fail_writes(false);

        let key = h.lifecycle.get(tenant_id, key.id).await.expect("Invalid get");
        assert_eq!(key.status, ElasticKeyStatus::Active);
        let versions = h
            .lifecycle
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert_eq!(versions.len(), 1);
    }
}
