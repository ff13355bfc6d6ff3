use std::fmt;

use serde::{Deserialize, Serialize};

use strongroom_core::{serde, Hash, IntermediateKeyId, TenantId};

use crate::{
    binding, unwrap_with, wrap_with, EncryptionError, Envelope, KeyCustodian, SecretKey,
    WrapAlgorithm, KEY_LEN,
};

const FINGERPRINT_DOMAIN: &[u8] = b"strongroom-root-key-fingerprint-v1";
const INTERMEDIATE_KEY_LABEL: &[u8] = b"strongroom/intermediate-key";

pub struct TenantScopedSecret {
    pub tenant_id: TenantId,
    pub key_id: IntermediateKeyId,
    pub secret: SecretKey,
}

impl fmt::Debug for TenantScopedSecret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TenantScopedSecret({}, {})", self.tenant_id, self.key_id)
    }
}

/// An intermediate key wrapped under the root key. The envelope is bound to
/// the tenant and key id, so moving it to another row fails authentication.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct LockedIntermediateKey {
    pub tenant_id: TenantId,
    pub key_id: IntermediateKeyId,
    pub root_key_fingerprint: Hash,
    pub envelope: Envelope,
}

pub struct RootKeyCustodian {
    root_key: SecretKey,
    fingerprint: Hash,
    algorithm: WrapAlgorithm,
}

impl RootKeyCustodian {
    pub fn new(root_key: SecretKey, algorithm: WrapAlgorithm) -> Result<Self, EncryptionError> {
        if root_key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: root_key.len(),
            });
        }
        let fingerprint = RootKeyCustodian::fingerprint_of(&root_key);
        Ok(RootKeyCustodian {
            root_key,
            fingerprint,
            algorithm,
        })
    }

    /// Public identifier of a root key, safe to persist and log.
    pub fn fingerprint_of(root_key: &SecretKey) -> Hash {
        Hash::digest(&[FINGERPRINT_DOMAIN, root_key.expose()])
    }

    pub fn fingerprint(&self) -> Hash {
        self.fingerprint.clone()
    }

    pub fn algorithm(&self) -> WrapAlgorithm {
        self.algorithm
    }
}

fn aad(tenant_id: &TenantId, key_id: &IntermediateKeyId) -> zeroize::Zeroizing<Vec<u8>> {
    binding(
        INTERMEDIATE_KEY_LABEL,
        &[tenant_id.as_bytes(), key_id.as_bytes()],
    )
}

impl KeyCustodian for RootKeyCustodian {
    type Secret = TenantScopedSecret;
    type LockedKey = LockedIntermediateKey;

    fn lock(&self, scoped: &TenantScopedSecret) -> Result<LockedIntermediateKey, EncryptionError> {
        let envelope = wrap_with(
            self.algorithm,
            &self.root_key,
            scoped.secret.expose(),
            &aad(&scoped.tenant_id, &scoped.key_id),
        )?;
        Ok(LockedIntermediateKey {
            tenant_id: scoped.tenant_id,
            key_id: scoped.key_id,
            root_key_fingerprint: self.fingerprint(),
            envelope,
        })
    }

    fn unlock(&self, locked_key: &LockedIntermediateKey) -> Result<TenantScopedSecret, EncryptionError> {
        if locked_key.root_key_fingerprint != self.fingerprint {
            return Err(EncryptionError::AuthenticationFailure);
        }
        let secret = unwrap_with(
            &self.root_key,
            &locked_key.envelope,
            &aad(&locked_key.tenant_id, &locked_key.key_id),
        )?;
        Ok(TenantScopedSecret {
            tenant_id: locked_key.tenant_id,
            key_id: locked_key.key_id,
            secret: SecretKey::from(secret),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_key_custodian() {
        let root_key = SecretKey::from_bytes(b"an example very very secret key.".to_vec());
        let custodian = RootKeyCustodian::new(root_key, WrapAlgorithm::Aes256GcmSiv)
            .expect("Invalid RootKeyCustodian");

        let tenant_id = TenantId::new();
        let key_id = IntermediateKeyId::new();
        let scoped = TenantScopedSecret {
            tenant_id,
            key_id,
            secret: SecretKey::from_bytes(b"BTH a very very very secret key.".to_vec()),
        };
        let locked = custodian.lock(&scoped).expect("Invalid LockedIntermediateKey");
        assert_eq!(locked.root_key_fingerprint, custodian.fingerprint());
        assert_eq!(
            format!("{:?}", scoped),
            format!("TenantScopedSecret({}, {})", tenant_id, key_id)
        );

        let unlocked = custodian.unlock(&locked).expect("Invalid TenantScopedSecret");
        assert_eq!(unlocked.tenant_id, tenant_id);
        assert_eq!(unlocked.secret.expose(), b"BTH a very very very secret key.");
    }

    #[test]
    fn test_locked_key_is_bound_to_tenant() {
        let custodian = RootKeyCustodian::new(SecretKey::generate(KEY_LEN), WrapAlgorithm::default())
            .expect("Invalid RootKeyCustodian");
        let scoped = TenantScopedSecret {
            tenant_id: TenantId::new(),
            key_id: IntermediateKeyId::new(),
            secret: custodian.gen_secret(),
        };
        let mut locked = custodian.lock(&scoped).expect("Invalid LockedIntermediateKey");
        locked.tenant_id = TenantId::new();
        assert_eq!(
            custodian.unlock(&locked).err(),
            Some(EncryptionError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_fingerprint_mismatch() {
        let a = RootKeyCustodian::new(SecretKey::generate(KEY_LEN), WrapAlgorithm::default())
            .expect("Invalid RootKeyCustodian");
        let b = RootKeyCustodian::new(SecretKey::generate(KEY_LEN), WrapAlgorithm::default())
            .expect("Invalid RootKeyCustodian");
        assert_ne!(a.fingerprint(), b.fingerprint());
        let locked = a
            .lock(&TenantScopedSecret {
                tenant_id: TenantId::new(),
                key_id: IntermediateKeyId::new(),
                secret: a.gen_secret(),
            })
            .expect("Invalid LockedIntermediateKey");
        assert_eq!(
            b.unlock(&locked).err(),
            Some(EncryptionError::AuthenticationFailure)
        );
        assert!(RootKeyCustodian::new(SecretKey::generate(16), WrapAlgorithm::default()).is_err());
    }
}
