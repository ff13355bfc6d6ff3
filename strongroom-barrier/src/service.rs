use std::{fmt, sync::Arc};

use log::{debug, warn};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use strongroom_core::{log, tokio, ElasticKeyId, IntermediateKeyId, TenantId};
use strongroom_encryption::{ContentKeyCustodian, KeyAlgorithm, SecretKey, UnsealShare, KEY_LEN};

use crate::{
    message::{content_aad, signing_input},
    store::BarrierStore, BarrierConfig, BarrierError, CacheKey,
    Ciphertext, ElasticKey, ElasticKeyLifecycle, ElasticKeyStatus, ElasticKeyVersion,
    IntermediateKey, IntermediateKeyManager, IntermediateKeyRotation, Operation,
    RootKeyManager, SealStatus, SignatureBlob, UnsealCoordinator, UnwrappedKeyCache,
    VersionStatus,
};

/// A fresh data key, in plaintext for immediate use and encrypted under the
/// elastic key for storage next to the data.
pub struct DataKey {
    pub plaintext: SecretKey,
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DataKey({} byte ciphertext)", self.ciphertext.len())
    }
}

/// Tenant scoped entry point to the barrier. Every operation is gated on
/// unseal, then tenant ownership, then lifecycle state, before any key
/// material is resolved.
pub struct BarrierService {
    config: BarrierConfig,
    root: Arc<RootKeyManager>,
    unseal: UnsealCoordinator,
    intermediate: Arc<IntermediateKeyManager>,
    cache: Arc<UnwrappedKeyCache>,
    lifecycle: ElasticKeyLifecycle,
}

impl BarrierService {
    /// Builds a sealed service. Nothing touches the store until the first call.
    pub fn new(config: BarrierConfig, store: Arc<dyn BarrierStore>) -> Result<Self, BarrierError> {
        config.validate()?;
        let root = Arc::new(RootKeyManager::new());
        let unseal = UnsealCoordinator::new(
            store.clone(),
            root.clone(),
            config.unseal.clone(),
            config.default_wrap_algorithm,
        );
        let intermediate = Arc::new(IntermediateKeyManager::new(
            store.clone(),
            root.clone(),
            config.default_wrap_algorithm,
        ));
        let cache = Arc::new(UnwrappedKeyCache::new(&config.cache));
        let lifecycle = ElasticKeyLifecycle::new(store, intermediate.clone(), cache.clone());
        Ok(BarrierService {
            config,
            root,
            unseal,
            intermediate,
            cache,
            lifecycle,
        })
    }

    pub fn config(&self) -> &BarrierConfig {
        &self.config
    }

    pub fn unseal_coordinator(&self) -> &UnsealCoordinator {
        &self.unseal
    }

    pub fn cache(&self) -> &UnwrappedKeyCache {
        &self.cache
    }

    pub async fn seal_status(&self) -> SealStatus {
        self.unseal.status().await
    }

    pub async fn initialize(&self) -> Result<Vec<UnsealShare>, BarrierError> {
        self.unseal.initialize().await
    }

    pub async fn submit_share(&self, index: u8, value: &[u8]) -> Result<SealStatus, BarrierError> {
        self.unseal.submit_share(index, value).await
    }

    pub async fn submit_encoded_share(&self, encoded: &str) -> Result<SealStatus, BarrierError> {
        self.unseal.submit_encoded_share(encoded).await
    }

    /// Periodic idle eviction, at the configured interval.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.cache
            .clone()
            .spawn_sweeper(self.config.cache.sweep_interval())
    }

    fn ensure_unsealed(&self) -> Result<(), BarrierError> {
        if !self.root.is_unsealed() {
            return Err(BarrierError::ServiceSealed);
        }
        Ok(())
    }

    async fn authorize(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        op: Operation,
    ) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        let key = self.lifecycle.get(tenant_id, id).await?;
        key.status.permits(op, id)?;
        Ok(key)
    }

    fn require(key: &ElasticKey, supported: bool, operation: &str) -> Result<(), BarrierError> {
        if !supported {
            return Err(BarrierError::UnsupportedOperation(format!(
                "{} with {} key {}",
                operation, key.algorithm, key.id
            )));
        }
        Ok(())
    }

    /// Lend the unwrapped material of `version` to `op`. On a cache miss the
    /// version row is read again after the cache generation was taken, so a
    /// destroy or rotation committed since resolution is seen before unwrap.
    async fn with_content_key<T, F>(
        &self,
        key: &ElasticKey,
        version: &ElasticKeyVersion,
        require_active: bool,
        op: F,
    ) -> Result<T, BarrierError>
    where
        F: FnOnce(&ContentKeyCustodian) -> Result<T, BarrierError>,
    {
        if version.envelope.is_none() {
            return Err(BarrierError::InvalidStateTransition(format!(
                "version {} of {} was destroyed",
                version.version, key.id
            )));
        }
        let intermediate = &self.intermediate;
        let lifecycle = &self.lifecycle;
        let tenant_id = key.tenant_id;
        let id = key.id;
        let number = version.version;
        let algorithm = key.algorithm;
        self.cache
            .with_material(
                CacheKey {
                    elastic_key_id: id,
                    version: number,
                },
                move || async move {
                    let current = lifecycle.version(tenant_id, id, number).await?;
                    if require_active && current.status != VersionStatus::Active {
                        return Err(BarrierError::ConcurrentModification(format!(
                            "version {} of {} was retired",
                            number, id
                        )));
                    }
                    let locked = current.locked_key().ok_or_else(|| {
                        BarrierError::InvalidStateTransition(format!(
                            "version {} of {} was destroyed",
                            number, id
                        ))
                    })?;
                    let unlocked = intermediate.unlock_content_key(tenant_id, &locked).await?;
                    Ok((unlocked.secret, locked.intermediate_key_id))
                },
                |material| {
                    let custodian = ContentKeyCustodian::new(material, algorithm)?;
                    op(&custodian)
                },
            )
            .await
    }

    /// Create an elastic key and its first version.
    pub async fn generate(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle
            .create(tenant_id, name, description, algorithm)
            .await
    }

    /// Retry version 1 generation for a key left in `Creating`.
    pub async fn activate(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.activate(tenant_id, id).await
    }

    pub async fn encrypt(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        self.encrypt_with_context(tenant_id, id, plaintext, &[]).await
    }

    /// Encrypt under the active version. `context` must be presented again to decrypt.
    pub async fn encrypt_with_context(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        plaintext: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        let key = self.authorize(tenant_id, id, Operation::Encrypt).await?;
        Self::require(&key, key.algorithm.can_encrypt(), "encrypt")?;
        self.seal_content(&key, plaintext, context).await
    }

    async fn seal_content(
        &self,
        key: &ElasticKey,
        plaintext: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        let version = self.lifecycle.active_version(key.tenant_id, key.id).await?;
        let aad = content_aad(&key.id, version.version, context);
        let envelope = self
            .with_content_key(key, &version, true, |ck| Ok(ck.encrypt(plaintext, &aad)?))
            .await?;
        Ciphertext {
            elastic_key_id: key.id,
            version: version.version,
            envelope,
        }
        .to_bytes()
    }

    pub async fn decrypt(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, BarrierError> {
        self.decrypt_with_context(tenant_id, id, ciphertext, &[]).await
    }

    /// Decrypt with whichever version produced the ciphertext, active or retired.
    pub async fn decrypt_with_context(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        ciphertext: &[u8],
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, BarrierError> {
        let key = self.authorize(tenant_id, id, Operation::Decrypt).await?;
        Self::require(&key, key.algorithm.can_encrypt(), "decrypt")?;
        let blob = Ciphertext::from_bytes(ciphertext)?;
        blob.expect_key(id)?;
        let version = self.lifecycle.version(tenant_id, id, blob.version).await?;
        let aad = content_aad(&id, blob.version, context);
        self.with_content_key(&key, &version, false, |ck| Ok(ck.decrypt(&blob.envelope, &aad)?))
            .await
            .map_err(|err| {
                if err == BarrierError::AuthenticationFailure {
                    warn!("Ciphertext for {} v{} failed authentication", id, blob.version);
                }
                err
            })
    }

    /// Sign with the active version. The returned blob names that version.
    pub async fn sign(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        message: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        let key = self.authorize(tenant_id, id, Operation::Sign).await?;
        Self::require(&key, key.algorithm.can_sign(), "sign")?;
        let version = self.lifecycle.active_version(tenant_id, id).await?;
        let input = signing_input(&id, version.version, message);
        let signature = self
            .with_content_key(&key, &version, true, |ck| Ok(ck.sign(&input)?))
            .await?;
        SignatureBlob {
            elastic_key_id: id,
            version: version.version,
            signature,
        }
        .to_bytes()
    }

    /// `Ok(false)` for a well formed signature that does not match.
    pub async fn verify(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, BarrierError> {
        let key = self.authorize(tenant_id, id, Operation::Verify).await?;
        Self::require(&key, key.algorithm.can_sign(), "verify")?;
        let blob = SignatureBlob::from_bytes(signature)?;
        blob.expect_key(id)?;
        let version = self.lifecycle.version(tenant_id, id, blob.version).await?;
        let input = signing_input(&id, blob.version, message);
        self.with_content_key(&key, &version, false, |ck| Ok(ck.verify(&input, &blob.signature)?))
            .await
    }

    pub async fn generate_data_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<DataKey, BarrierError> {
        let key = self.authorize(tenant_id, id, Operation::GenerateDataKey).await?;
        Self::require(&key, key.algorithm.can_encrypt(), "generate a data key")?;
        let plaintext = SecretKey::generate(KEY_LEN);
        let ciphertext = self.seal_content(&key, plaintext.expose(), &[]).await?;
        debug!("Generated data key under {}", id);
        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    /// Verifying key of an asymmetric signing key, for the active version when
    /// `version` is `None`.
    pub async fn public_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        version: Option<u32>,
    ) -> Result<Vec<u8>, BarrierError> {
        let key = self.authorize(tenant_id, id, Operation::PublicKey).await?;
        Self::require(&key, key.algorithm == KeyAlgorithm::Ed25519, "export a public key")?;
        let version = match version {
            Some(version) => self.lifecycle.version(tenant_id, id, version).await?,
            None => self.lifecycle.active_version(tenant_id, id).await?,
        };
        version.public_key.ok_or_else(|| {
            BarrierError::NotFound(format!("public key of {} v{}", id, version.version))
        })
    }

    pub async fn rotate(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKeyVersion, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.rotate(tenant_id, id).await
    }

    pub async fn disable(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.disable(tenant_id, id).await
    }

    pub async fn enable(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.enable(tenant_id, id).await
    }

    pub async fn schedule_destroy(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.schedule_destroy(tenant_id, id).await
    }

    pub async fn destroy(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.destroy(tenant_id, id).await
    }

    pub async fn get_elastic_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, BarrierError> {
        self.authorize(tenant_id, id, Operation::Read).await
    }

    pub async fn list_elastic_keys(
        &self,
        tenant_id: TenantId,
        status: Option<ElasticKeyStatus>,
    ) -> Result<Vec<ElasticKey>, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.list(tenant_id, status).await
    }

    pub async fn list_versions(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Vec<ElasticKeyVersion>, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle.list_versions(tenant_id, id).await
    }

    pub async fn update_description(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        description: &str,
    ) -> Result<ElasticKey, BarrierError> {
        self.ensure_unsealed()?;
        self.lifecycle
            .update_description(tenant_id, id, description)
            .await
    }

    /// New active intermediate key for the tenant. Cached material unwrapped
    /// through the retired key is purged and unwraps through it again on next use.
    pub async fn rotate_intermediate_key(
        &self,
        tenant_id: TenantId,
    ) -> Result<IntermediateKeyRotation, BarrierError> {
        self.ensure_unsealed()?;
        let rotation = self.intermediate.rotate(tenant_id).await?;
        if let Some(retired) = rotation.retired {
            self.cache.purge_intermediate_key(retired);
        }
        Ok(rotation)
    }

    pub async fn active_intermediate_key_id(
        &self,
        tenant_id: TenantId,
    ) -> Result<IntermediateKeyId, BarrierError> {
        self.ensure_unsealed()?;
        Ok(self.intermediate.active(tenant_id).await?.id)
    }

    pub async fn retired_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError> {
        self.ensure_unsealed()?;
        self.intermediate.list_retired(tenant_id).await
    }
}
