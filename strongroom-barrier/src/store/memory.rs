use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use strongroom_core::{
    async_trait, chrono, parking_lot, tokio, ElasticKeyId, IntermediateKeyId, TenantId,
};

use super::{ElasticKeyStore, ElasticKeyVersionStore, IntermediateKeyStore, RootKeyStore};
use crate::{
    BarrierError, ElasticKey, ElasticKeyStatus, ElasticKeyVersion, IntermediateKey,
    IntermediateKeyStatus, SealedRootKey, VersionStatus,
};

#[derive(Default)]
struct Tables {
    root_key: Option<SealedRootKey>,
    intermediate_keys: HashMap<IntermediateKeyId, IntermediateKey>,
    elastic_keys: HashMap<ElasticKeyId, ElasticKey>,
    versions: BTreeMap<(ElasticKeyId, u32), ElasticKeyVersion>,
}

impl Tables {
    fn elastic_key_mut(
        &mut self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<&mut ElasticKey, BarrierError> {
        self.elastic_keys
            .get_mut(&id)
            .filter(|k| k.tenant_id == tenant_id)
            .ok_or_else(|| BarrierError::NotFound(format!("elastic key {}", id)))
    }

    fn versions_of(&self, id: ElasticKeyId) -> impl Iterator<Item = &ElasticKeyVersion> {
        self.versions
            .range((id, 0)..=(id, u32::MAX))
            .map(|(_, v)| v)
    }
}

/// Map backed store for tests and single process deployments. Each atomic
/// primitive runs under one write lock acquisition.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    /// Every call fails with [`BarrierError::StoreUnavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reads succeed but every mutation fails with [`BarrierError::StoreUnavailable`] while set.
    pub fn set_fail_writes(&self, fail_writes: bool) {
        self.fail_writes.store(fail_writes, Ordering::SeqCst);
    }

    /// Stall rotation and destruction commits, to simulate a slow backend.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *self.commit_delay.lock() = delay;
    }

    async fn delay_commit(&self) {
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_read(&self) -> Result<(), BarrierError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BarrierError::StoreUnavailable(
                "in-memory store offline".to_string(),
            ));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), BarrierError> {
        self.check_read()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BarrierError::StoreUnavailable(
                "in-memory store rejected write".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RootKeyStore for InMemoryStore {
    async fn load_root_key(&self) -> Result<Option<SealedRootKey>, BarrierError> {
        self.check_read()?;
        Ok(self.tables.read().root_key.clone())
    }

    async fn save_root_key(&self, sealed: &SealedRootKey) -> Result<(), BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        if tables.root_key.is_some() {
            return Err(BarrierError::AlreadyInitialized);
        }
        tables.root_key = Some(sealed.clone());
        Ok(())
    }
}

#[async_trait]
impl IntermediateKeyStore for InMemoryStore {
    async fn create_intermediate_key(&self, key: &IntermediateKey) -> Result<(), BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        if tables
            .intermediate_keys
            .values()
            .any(|k| k.tenant_id == key.tenant_id && k.status == IntermediateKeyStatus::Active)
        {
            return Err(BarrierError::ConcurrentModification(format!(
                "tenant {} already has an active intermediate key",
                key.tenant_id
            )));
        }
        tables.intermediate_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_intermediate_key(
        &self,
        tenant_id: TenantId,
        id: IntermediateKeyId,
    ) -> Result<Option<IntermediateKey>, BarrierError> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .intermediate_keys
            .get(&id)
            .filter(|k| k.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_active_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .intermediate_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id && k.status == IntermediateKeyStatus::Active)
            .cloned()
            .collect())
    }

    async fn list_retired_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError> {
        self.check_read()?;
        let mut retired: Vec<IntermediateKey> = self
            .tables
            .read()
            .intermediate_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id && k.status == IntermediateKeyStatus::Retired)
            .cloned()
            .collect();
        retired.sort_by_key(|k| k.created_at);
        Ok(retired)
    }

    async fn rotate_intermediate_key(
        &self,
        tenant_id: TenantId,
        expected_active: IntermediateKeyId,
        next: &IntermediateKey,
    ) -> Result<(), BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        let current = tables
            .intermediate_keys
            .get_mut(&expected_active)
            .filter(|k| k.tenant_id == tenant_id && k.status == IntermediateKeyStatus::Active)
            .ok_or_else(|| {
                BarrierError::ConcurrentModification(format!(
                    "intermediate key {} is no longer active",
                    expected_active
                ))
            })?;
        current.status = IntermediateKeyStatus::Retired;
        current.retired_at = Some(Utc::now());
        tables.intermediate_keys.insert(next.id, next.clone());
        Ok(())
    }
}

#[async_trait]
impl ElasticKeyStore for InMemoryStore {
    async fn insert_elastic_key(&self, key: &ElasticKey) -> Result<(), BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        if tables
            .elastic_keys
            .values()
            .any(|k| k.tenant_id == key.tenant_id && k.name == key.name)
        {
            return Err(BarrierError::AlreadyExists(format!(
                "elastic key named {}",
                key.name
            )));
        }
        tables.elastic_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_elastic_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Option<ElasticKey>, BarrierError> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .elastic_keys
            .get(&id)
            .filter(|k| k.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_elastic_keys(
        &self,
        tenant_id: TenantId,
        status: Option<ElasticKeyStatus>,
    ) -> Result<Vec<ElasticKey>, BarrierError> {
        self.check_read()?;
        let mut keys: Vec<ElasticKey> = self
            .tables
            .read()
            .elastic_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .filter(|k| status.map_or(true, |s| k.status == s))
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn update_elastic_key_status(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected: ElasticKeyStatus,
        next: ElasticKeyStatus,
    ) -> Result<ElasticKey, BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        let key = tables.elastic_key_mut(tenant_id, id)?;
        if key.status != expected {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is {} not {}",
                id, key.status, expected
            )));
        }
        key.status = next;
        key.updated_at = Utc::now();
        Ok(key.clone())
    }

    async fn update_elastic_key_description(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        description: &str,
    ) -> Result<ElasticKey, BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        let key = tables.elastic_key_mut(tenant_id, id)?;
        key.description = description.to_string();
        key.updated_at = Utc::now();
        Ok(key.clone())
    }
}

#[async_trait]
impl ElasticKeyVersionStore for InMemoryStore {
    async fn activate_with_first_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        first: &ElasticKeyVersion,
    ) -> Result<(), BarrierError> {
        self.check_write()?;
        let mut tables = self.tables.write();
        let status = tables.elastic_key_mut(tenant_id, id)?.status;
        if status != ElasticKeyStatus::Creating {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is {}",
                id, status
            )));
        }
        if tables.versions_of(id).next().is_some() || first.version != 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} already has versions",
                id
            )));
        }
        let mut first = first.clone();
        first.status = first.status.transition(VersionStatus::Active)?;

        // nothing below can fail
        let key = tables.elastic_key_mut(tenant_id, id)?;
        key.status = ElasticKeyStatus::Active;
        key.updated_at = Utc::now();
        tables.versions.insert((id, 1), first);
        Ok(())
    }

    async fn rotate_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected_active: u32,
        next: &ElasticKeyVersion,
    ) -> Result<(), BarrierError> {
        self.delay_commit().await;
        self.check_write()?;
        let mut tables = self.tables.write();
        let status = tables.elastic_key_mut(tenant_id, id)?.status;
        if status != ElasticKeyStatus::Active {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is {}",
                id, status
            )));
        }
        let active = tables
            .versions_of(id)
            .find(|v| v.status == VersionStatus::Active)
            .map(|v| v.version);
        let latest = tables.versions_of(id).map(|v| v.version).max();
        if active != Some(expected_active) || latest != Some(expected_active) {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} active version moved past {}",
                id, expected_active
            )));
        }
        if next.version != expected_active + 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} next version must be {}",
                id,
                expected_active + 1
            )));
        }
        let mut next = next.clone();
        next.status = next.status.transition(VersionStatus::Active)?;

        let now = Utc::now();
        if let Some(previous) = tables.versions.get_mut(&(id, expected_active)) {
            previous.status = VersionStatus::Retired;
            previous.retired_at = Some(now);
        }
        tables.versions.insert((id, next.version), next);
        let key = tables.elastic_key_mut(tenant_id, id)?;
        key.updated_at = now;
        Ok(())
    }

    async fn begin_destroy(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<(), BarrierError> {
        self.delay_commit().await;
        self.check_write()?;
        let mut tables = self.tables.write();
        let key = tables.elastic_key_mut(tenant_id, id)?;
        if key.status != ElasticKeyStatus::Disabled {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is {}",
                id, key.status
            )));
        }
        let now = Utc::now();
        key.status = ElasticKeyStatus::PendingDestroy;
        key.updated_at = now;
        for (_, version) in tables.versions.range_mut((id, 0)..=(id, u32::MAX)) {
            if version.status != VersionStatus::Retired {
                version.status = VersionStatus::Retired;
                version.retired_at = Some(now);
            }
        }
        Ok(())
    }

    async fn shred(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<(), BarrierError> {
        self.delay_commit().await;
        self.check_write()?;
        let mut tables = self.tables.write();
        let key = tables.elastic_key_mut(tenant_id, id)?;
        if key.status != ElasticKeyStatus::PendingDestroy {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is {}",
                id, key.status
            )));
        }
        key.status = ElasticKeyStatus::Destroyed;
        key.updated_at = Utc::now();
        for (_, version) in tables.versions.range_mut((id, 0)..=(id, u32::MAX)) {
            version.envelope = None;
        }
        Ok(())
    }

    async fn get_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        version: u32,
    ) -> Result<Option<ElasticKeyVersion>, BarrierError> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .versions
            .get(&(id, version))
            .filter(|v| v.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_active_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Option<ElasticKeyVersion>, BarrierError> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .versions_of(id)
            .find(|v| v.tenant_id == tenant_id && v.status == VersionStatus::Active)
            .cloned())
    }

    async fn list_versions(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Vec<ElasticKeyVersion>, BarrierError> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .versions_of(id)
            .filter(|v| v.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongroom_core::tokio;
    use strongroom_encryption::KeyAlgorithm;

    fn elastic_key(tenant_id: TenantId, name: &str) -> ElasticKey {
        ElasticKey {
            id: ElasticKeyId::new(),
            tenant_id,
            name: name.to_string(),
            description: String::new(),
            algorithm: KeyAlgorithm::Aes256GcmSiv,
            status: ElasticKeyStatus::Creating,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn version(key: &ElasticKey, version: u32) -> ElasticKeyVersion {
        ElasticKeyVersion {
            elastic_key_id: key.id,
            tenant_id: key.tenant_id,
            version,
            intermediate_key_id: IntermediateKeyId::new(),
            envelope: None,
            public_key: None,
            status: VersionStatus::Generating,
            created_at: Utc::now(),
            retired_at: None,
        }
    }

    #[tokio::test]
    async fn test_names_are_unique_per_tenant() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new();
        store
            .insert_elastic_key(&elastic_key(tenant, "payments"))
            .await
            .expect("Invalid insert");
        assert!(matches!(
            store.insert_elastic_key(&elastic_key(tenant, "payments")).await,
            Err(BarrierError::AlreadyExists(_))
        ));
        store
            .insert_elastic_key(&elastic_key(TenantId::new(), "payments"))
            .await
            .expect("Invalid insert");
    }

    #[tokio::test]
    async fn test_rotate_version_compare_and_set() {
        let store = InMemoryStore::new();
        let key = elastic_key(TenantId::new(), "payments");
        store.insert_elastic_key(&key).await.expect("Invalid insert");
        store
            .activate_with_first_version(key.tenant_id, key.id, &version(&key, 1))
            .await
            .expect("Invalid activate");

        store
            .rotate_version(key.tenant_id, key.id, 1, &version(&key, 2))
            .await
            .expect("Invalid rotate");
        assert!(matches!(
            store
                .rotate_version(key.tenant_id, key.id, 1, &version(&key, 2))
                .await,
            Err(BarrierError::ConcurrentModification(_))
        ));

        let versions = store
            .list_versions(key.tenant_id, key.id)
            .await
            .expect("Invalid versions");
        assert_eq!(
            versions.iter().map(|v| (v.version, v.status)).collect::<Vec<_>>(),
            vec![(1, VersionStatus::Retired), (2, VersionStatus::Active)]
        );
    }

    #[tokio::test]
    async fn test_queries_are_tenant_scoped() {
        let store = InMemoryStore::new();
        let key = elastic_key(TenantId::new(), "payments");
        store.insert_elastic_key(&key).await.expect("Invalid insert");
        let other = TenantId::new();
        assert_eq!(
            store.get_elastic_key(other, key.id).await.expect("Invalid get"),
            None
        );
        assert!(matches!(
            store
                .update_elastic_key_status(other, key.id, ElasticKeyStatus::Creating, ElasticKeyStatus::Active)
                .await,
            Err(BarrierError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.load_root_key().await,
            Err(BarrierError::StoreUnavailable(_))
        ));
        store.set_unavailable(false);
        store.set_fail_writes(true);
        assert_eq!(store.load_root_key().await, Ok(None));
        assert!(matches!(
            store
                .insert_elastic_key(&elastic_key(TenantId::new(), "payments"))
                .await,
            Err(BarrierError::StoreUnavailable(_))
        ));
    }
}
