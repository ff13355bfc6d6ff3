//! Persistence seams. Every query is scoped to a tenant except the single
//! deployment wide root key record.

use async_trait::async_trait;

use strongroom_core::{async_trait, ElasticKeyId, IntermediateKeyId, TenantId};

use crate::{
    BarrierError, ElasticKey, ElasticKeyStatus, ElasticKeyVersion, IntermediateKey, SealedRootKey,
};

mod memory;
#[cfg(feature = "sql")]
mod sql;

pub use memory::InMemoryStore;
#[cfg(feature = "sql")]
pub use sql::SeaOrmStore;

#[async_trait]
pub trait RootKeyStore: Send + Sync {
    async fn load_root_key(&self) -> Result<Option<SealedRootKey>, BarrierError>;

    /// Write once. A second save fails with [`BarrierError::AlreadyInitialized`].
    async fn save_root_key(&self, sealed: &SealedRootKey) -> Result<(), BarrierError>;
}

#[async_trait]
pub trait IntermediateKeyStore: Send + Sync {
    /// Insert the first active key of a tenant. Fails with
    /// [`BarrierError::ConcurrentModification`] if the tenant already has one.
    async fn create_intermediate_key(&self, key: &IntermediateKey) -> Result<(), BarrierError>;

    async fn get_intermediate_key(
        &self,
        tenant_id: TenantId,
        id: IntermediateKeyId,
    ) -> Result<Option<IntermediateKey>, BarrierError>;

    async fn list_active_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError>;

    async fn list_retired_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError>;

    /// Atomically retire `expected_active` and insert `next` as the active key.
    async fn rotate_intermediate_key(
        &self,
        tenant_id: TenantId,
        expected_active: IntermediateKeyId,
        next: &IntermediateKey,
    ) -> Result<(), BarrierError>;
}

#[async_trait]
pub trait ElasticKeyStore: Send + Sync {
    /// Fails with [`BarrierError::AlreadyExists`] when the tenant already has a key of that name.
    async fn insert_elastic_key(&self, key: &ElasticKey) -> Result<(), BarrierError>;

    async fn get_elastic_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Option<ElasticKey>, BarrierError>;

    async fn list_elastic_keys(
        &self,
        tenant_id: TenantId,
        status: Option<ElasticKeyStatus>,
    ) -> Result<Vec<ElasticKey>, BarrierError>;

    /// Compare and set on the status column.
    async fn update_elastic_key_status(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected: ElasticKeyStatus,
        next: ElasticKeyStatus,
    ) -> Result<ElasticKey, BarrierError>;

    async fn update_elastic_key_description(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        description: &str,
    ) -> Result<ElasticKey, BarrierError>;
}

#[async_trait]
pub trait ElasticKeyVersionStore: Send + Sync {
    /// In one transaction: require the key to be `Creating` with no versions,
    /// insert `first` as `Active` and move the key to `Active`.
    async fn activate_with_first_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        first: &ElasticKeyVersion,
    ) -> Result<(), BarrierError>;

    /// In one transaction: require the key to be `Active` with `expected_active`
    /// as its active version, retire it and insert `next` as `Active`.
    async fn rotate_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected_active: u32,
        next: &ElasticKeyVersion,
    ) -> Result<(), BarrierError>;

    /// In one transaction: `Disabled -> PendingDestroy` and retire every version.
    async fn begin_destroy(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<(), BarrierError>;

    /// In one transaction: `PendingDestroy -> Destroyed` and delete all wrapped material.
    async fn shred(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<(), BarrierError>;

    async fn get_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        version: u32,
    ) -> Result<Option<ElasticKeyVersion>, BarrierError>;

    async fn get_active_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Option<ElasticKeyVersion>, BarrierError>;

    /// Ordered by version number.
    async fn list_versions(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Vec<ElasticKeyVersion>, BarrierError>;
}

/// Everything the barrier needs from persistence.
pub trait BarrierStore:
    RootKeyStore + IntermediateKeyStore + ElasticKeyStore + ElasticKeyVersionStore
{
}

impl<T> BarrierStore for T where
    T: RootKeyStore + IntermediateKeyStore + ElasticKeyStore + ElasticKeyVersionStore
{
}
