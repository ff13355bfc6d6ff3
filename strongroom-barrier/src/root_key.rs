use log::info;
use parking_lot::RwLock;

use strongroom_core::{log, parking_lot, Hash};
use strongroom_encryption::{
    KeyCustodian, LockedIntermediateKey, RootKeyCustodian, SecretKey, TenantScopedSecret,
};

use crate::BarrierError;

/// Sole owner of the in-memory root key. Empty until unseal completes.
#[derive(Default)]
pub struct RootKeyManager {
    custodian: RwLock<Option<RootKeyCustodian>>,
}

impl RootKeyManager {
    pub fn new() -> Self {
        RootKeyManager::default()
    }

    pub fn is_unsealed(&self) -> bool {
        self.custodian.read().is_some()
    }

    /// Installs the root key. A second install is ignored so the key cannot be swapped.
    pub(crate) fn install(&self, custodian: RootKeyCustodian) -> bool {
        let mut slot = self.custodian.write();
        if slot.is_some() {
            return false;
        }
        info!("Root key {} installed", custodian.fingerprint());
        *slot = Some(custodian);
        true
    }

    pub fn fingerprint(&self) -> Result<Hash, BarrierError> {
        self.with_custodian(|c| Ok(c.fingerprint()))
    }

    pub(crate) fn lock_intermediate(
        &self,
        secret: &TenantScopedSecret,
    ) -> Result<LockedIntermediateKey, BarrierError> {
        self.with_custodian(|c| Ok(c.lock(secret)?))
    }

    pub(crate) fn unlock_intermediate(
        &self,
        locked: &LockedIntermediateKey,
    ) -> Result<TenantScopedSecret, BarrierError> {
        self.with_custodian(|c| Ok(c.unlock(locked)?))
    }

    pub(crate) fn gen_intermediate_secret(&self) -> Result<SecretKey, BarrierError> {
        self.with_custodian(|c| Ok(c.gen_secret()))
    }

    fn with_custodian<T>(
        &self,
        f: impl FnOnce(&RootKeyCustodian) -> Result<T, BarrierError>,
    ) -> Result<T, BarrierError> {
        match self.custodian.read().as_ref() {
            Some(custodian) => f(custodian),
            None => Err(BarrierError::ServiceSealed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongroom_core::{IntermediateKeyId, TenantId};
    use strongroom_encryption::{WrapAlgorithm, KEY_LEN};

    #[test]
    fn test_sealed_until_installed() {
        let manager = RootKeyManager::new();
        assert!(!manager.is_unsealed());
        assert_eq!(manager.fingerprint(), Err(BarrierError::ServiceSealed));

        let custodian = RootKeyCustodian::new(SecretKey::generate(KEY_LEN), WrapAlgorithm::default())
            .expect("Invalid RootKeyCustodian");
        let fingerprint = custodian.fingerprint();
        assert!(manager.install(custodian));
        assert_eq!(manager.fingerprint(), Ok(fingerprint.clone()));

        let other = RootKeyCustodian::new(SecretKey::generate(KEY_LEN), WrapAlgorithm::default())
            .expect("Invalid RootKeyCustodian");
        assert!(!manager.install(other));
        assert_eq!(manager.fingerprint(), Ok(fingerprint));

        let scoped = TenantScopedSecret {
            tenant_id: TenantId::new(),
            key_id: IntermediateKeyId::new(),
            secret: SecretKey::generate(KEY_LEN),
        };
        let locked = manager.lock_intermediate(&scoped).expect("Invalid lock");
        let unlocked = manager.unlock_intermediate(&locked).expect("Invalid unlock");
        assert_eq!(unlocked.secret.expose(), scoped.secret.expose());
    }
}
