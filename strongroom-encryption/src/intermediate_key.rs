use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use strongroom_core::{serde, ElasticKeyId, IntermediateKeyId};

use crate::{
    binding, unwrap_with, wrap_with, EncryptionError, Envelope, KeyCustodian, SecretKey,
    WrapAlgorithm, KEY_LEN,
};

const CONTENT_KEY_LABEL: &[u8] = b"strongroom/content-key";

pub struct VersionScopedSecret {
    pub elastic_key_id: ElasticKeyId,
    pub version: u32,
    pub secret: SecretKey,
}

impl fmt::Debug for VersionScopedSecret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "VersionScopedSecret({}, v{})",
            self.elastic_key_id, self.version
        )
    }
}

/// Content key material wrapped under a tenant's intermediate key.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct LockedContentKey {
    pub elastic_key_id: ElasticKeyId,
    pub version: u32,
    pub intermediate_key_id: IntermediateKeyId,
    pub envelope: Envelope,
}

pub struct IntermediateKeyCustodian {
    key_id: IntermediateKeyId,
    key: SecretKey,
    algorithm: WrapAlgorithm,
}

impl IntermediateKeyCustodian {
    pub fn new(
        key_id: IntermediateKeyId,
        key: SecretKey,
        algorithm: WrapAlgorithm,
    ) -> Result<Self, EncryptionError> {
        if key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        Ok(IntermediateKeyCustodian {
            key_id,
            key,
            algorithm,
        })
    }

    pub fn id(&self) -> IntermediateKeyId {
        self.key_id
    }

    fn aad(&self, elastic_key_id: &ElasticKeyId, version: u32) -> Zeroizing<Vec<u8>> {
        binding(
            CONTENT_KEY_LABEL,
            &[
                self.key_id.as_bytes(),
                elastic_key_id.as_bytes(),
                &version.to_be_bytes(),
            ],
        )
    }
}

impl fmt::Debug for IntermediateKeyCustodian {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IntermediateKeyCustodian({})", self.key_id)
    }
}

impl KeyCustodian for IntermediateKeyCustodian {
    type Secret = VersionScopedSecret;
    type LockedKey = LockedContentKey;

    fn lock(&self, scoped: &VersionScopedSecret) -> Result<LockedContentKey, EncryptionError> {
        let envelope = wrap_with(
            self.algorithm,
            &self.key,
            scoped.secret.expose(),
            &self.aad(&scoped.elastic_key_id, scoped.version),
        )?;
        Ok(LockedContentKey {
            elastic_key_id: scoped.elastic_key_id,
            version: scoped.version,
            intermediate_key_id: self.key_id,
            envelope,
        })
    }

    fn unlock(&self, locked_key: &LockedContentKey) -> Result<VersionScopedSecret, EncryptionError> {
        if locked_key.intermediate_key_id != self.key_id {
            return Err(EncryptionError::AuthenticationFailure);
        }
        let secret = unwrap_with(
            &self.key,
            &locked_key.envelope,
            &self.aad(&locked_key.elastic_key_id, locked_key.version),
        )?;
        Ok(VersionScopedSecret {
            elastic_key_id: locked_key.elastic_key_id,
            version: locked_key.version,
            secret: SecretKey::from(secret),
        })
    }
}
