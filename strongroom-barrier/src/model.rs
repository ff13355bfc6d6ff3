use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strongroom_core::{chrono, serde, ElasticKeyId, Hash, IntermediateKeyId, TenantId};
use strongroom_encryption::{Envelope, KeyAlgorithm, LockedContentKey, LockedIntermediateKey};

use crate::BarrierError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub enum ElasticKeyStatus {
    Creating,
    Active,
    Disabled,
    PendingDestroy,
    Destroyed,
}

/// Requests gated by the lifecycle of an elastic key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    GenerateDataKey,
    PublicKey,
    Rotate,
    Read,
}

impl ElasticKeyStatus {
    /// Validate `self -> next`. Every other move is rejected.
    pub fn transition(self, next: ElasticKeyStatus) -> Result<ElasticKeyStatus, BarrierError> {
        use ElasticKeyStatus::*;
        match (self, next) {
            (Creating, Active)
            | (Active, Disabled)
            | (Disabled, Active)
            | (Disabled, PendingDestroy)
            | (PendingDestroy, Destroyed) => Ok(next),
            (from, to) => Err(BarrierError::InvalidStateTransition(format!(
                "{} -> {}",
                from, to
            ))),
        }
    }

    /// Whether a key in this state may serve `op`.
    pub fn permits(self, op: Operation, id: ElasticKeyId) -> Result<(), BarrierError> {
        use ElasticKeyStatus::*;
        use Operation::*;
        match (op, self) {
            (Read, _) => Ok(()),
            (Encrypt | Sign | GenerateDataKey | Rotate, Active) => Ok(()),
            (Encrypt | Sign | GenerateDataKey, Disabled) => Err(BarrierError::KeyDisabled(id)),
            (Decrypt | Verify | PublicKey, Active | Disabled | PendingDestroy) => Ok(()),
            (op, status) => Err(BarrierError::InvalidStateTransition(format!(
                "{:?} not permitted while {}",
                op, status
            ))),
        }
    }
}

impl fmt::Display for ElasticKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub enum VersionStatus {
    Generating,
    Active,
    Retired,
}

impl VersionStatus {
    pub fn transition(self, next: VersionStatus) -> Result<VersionStatus, BarrierError> {
        match (self, next) {
            (VersionStatus::Generating, VersionStatus::Active)
            | (VersionStatus::Active, VersionStatus::Retired) => Ok(next),
            (from, to) => Err(BarrierError::InvalidStateTransition(format!(
                "version {:?} -> {:?}",
                from, to
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub enum IntermediateKeyStatus {
    Active,
    Retired,
}

/// Tenant facing logical key.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct ElasticKey {
    pub id: ElasticKeyId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub algorithm: KeyAlgorithm,
    pub status: ElasticKeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One generation of key material. The wrapping intermediate key is recorded
/// at generation and never rebound.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct ElasticKeyVersion {
    pub elastic_key_id: ElasticKeyId,
    pub tenant_id: TenantId,
    pub version: u32,
    pub intermediate_key_id: IntermediateKeyId,
    /// `None` once crypto-shredded.
    pub envelope: Option<Envelope>,
    pub public_key: Option<Vec<u8>>,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl ElasticKeyVersion {
    pub fn locked_key(&self) -> Option<LockedContentKey> {
        self.envelope.as_ref().map(|envelope| LockedContentKey {
            elastic_key_id: self.elastic_key_id,
            version: self.version,
            intermediate_key_id: self.intermediate_key_id,
            envelope: envelope.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct IntermediateKey {
    pub id: IntermediateKeyId,
    pub tenant_id: TenantId,
    pub envelope: Envelope,
    pub root_key_fingerprint: Hash,
    pub status: IntermediateKeyStatus,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl IntermediateKey {
    pub fn from_locked(locked: LockedIntermediateKey) -> Self {
        IntermediateKey {
            id: locked.key_id,
            tenant_id: locked.tenant_id,
            envelope: locked.envelope,
            root_key_fingerprint: locked.root_key_fingerprint,
            status: IntermediateKeyStatus::Active,
            created_at: Utc::now(),
            retired_at: None,
        }
    }

    pub fn locked_key(&self) -> LockedIntermediateKey {
        LockedIntermediateKey {
            tenant_id: self.tenant_id,
            key_id: self.id,
            root_key_fingerprint: self.root_key_fingerprint.clone(),
            envelope: self.envelope.clone(),
        }
    }
}

/// The root key wrapped once per threshold sized subset of unseal shares.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct SubsetEnvelope {
    pub indices: Vec<u8>,
    pub envelope: Envelope,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct SealedRootKey {
    pub threshold: u8,
    pub shares: u8,
    /// Indexed by `share index - 1`.
    pub share_commitments: Vec<Hash>,
    pub envelopes: Vec<SubsetEnvelope>,
    pub fingerprint: Hash,
    pub created_at: DateTime<Utc>,
}

impl SealedRootKey {
    pub fn envelope_for(&self, indices: &[u8]) -> Option<&Envelope> {
        self.envelopes
            .iter()
            .find(|e| e.indices == indices)
            .map(|e| &e.envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ElasticKeyStatus; 5] = [
        ElasticKeyStatus::Creating,
        ElasticKeyStatus::Active,
        ElasticKeyStatus::Disabled,
        ElasticKeyStatus::PendingDestroy,
        ElasticKeyStatus::Destroyed,
    ];

    #[test]
    fn test_elastic_key_transitions() {
        let allowed = [
            (ElasticKeyStatus::Creating, ElasticKeyStatus::Active),
            (ElasticKeyStatus::Active, ElasticKeyStatus::Disabled),
            (ElasticKeyStatus::Disabled, ElasticKeyStatus::Active),
            (ElasticKeyStatus::Disabled, ElasticKeyStatus::PendingDestroy),
            (ElasticKeyStatus::PendingDestroy, ElasticKeyStatus::Destroyed),
        ];
        for from in ALL {
            for to in ALL {
                let res = from.transition(to);
                if allowed.contains(&(from, to)) {
                    assert_eq!(res, Ok(to));
                } else {
                    assert!(matches!(res, Err(BarrierError::InvalidStateTransition(_))));
                }
            }
        }
    }

    #[test]
    fn test_permits() {
        let id = ElasticKeyId::new();
        assert_eq!(ElasticKeyStatus::Active.permits(Operation::Encrypt, id), Ok(()));
        assert_eq!(
            ElasticKeyStatus::Disabled.permits(Operation::Encrypt, id),
            Err(BarrierError::KeyDisabled(id))
        );
        assert_eq!(ElasticKeyStatus::Disabled.permits(Operation::Decrypt, id), Ok(()));
        assert_eq!(
            ElasticKeyStatus::PendingDestroy.permits(Operation::Decrypt, id),
            Ok(())
        );
        assert!(matches!(
            ElasticKeyStatus::Disabled.permits(Operation::Rotate, id),
            Err(BarrierError::InvalidStateTransition(_))
        ));
        for op in [
            Operation::Encrypt,
            Operation::Decrypt,
            Operation::Sign,
            Operation::Verify,
            Operation::Rotate,
        ] {
            assert!(matches!(
                ElasticKeyStatus::Destroyed.permits(op, id),
                Err(BarrierError::InvalidStateTransition(_))
            ));
            assert!(matches!(
                ElasticKeyStatus::Creating.permits(op, id),
                Err(BarrierError::InvalidStateTransition(_))
            ));
        }
        assert_eq!(ElasticKeyStatus::Destroyed.permits(Operation::Read, id), Ok(()));
    }

    #[test]
    fn test_version_transitions() {
        assert_eq!(
            VersionStatus::Generating.transition(VersionStatus::Active),
            Ok(VersionStatus::Active)
        );
        assert_eq!(
            VersionStatus::Active.transition(VersionStatus::Retired),
            Ok(VersionStatus::Retired)
        );
        assert!(VersionStatus::Retired.transition(VersionStatus::Active).is_err());
        assert!(VersionStatus::Generating.transition(VersionStatus::Retired).is_err());
    }
}
