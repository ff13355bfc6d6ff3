use std::{fmt, str::FromStr};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha3::Sha3_256;
use zeroize::Zeroizing;

use strongroom_core::{anyhow, ed25519_dalek, hmac, serde, sha3};

use crate::{unwrap_with, wrap_with, EncryptionError, Envelope, SecretKey, WrapAlgorithm, KEY_LEN};

type HmacSha3 = Hmac<Sha3_256>;

/// What a version's content key material is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub enum KeyAlgorithm {
    #[serde(rename = "aes256-gcm-siv")]
    Aes256GcmSiv,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "hmac-sha3-256")]
    HmacSha3_256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgorithmFamily {
    AeadSymmetric,
    SigningAsymmetric,
    SigningSymmetric,
}

impl KeyAlgorithm {
    pub fn family(self) -> AlgorithmFamily {
        match self {
            KeyAlgorithm::Aes256GcmSiv | KeyAlgorithm::ChaCha20Poly1305 => {
                AlgorithmFamily::AeadSymmetric
            }
            KeyAlgorithm::Ed25519 => AlgorithmFamily::SigningAsymmetric,
            KeyAlgorithm::HmacSha3_256 => AlgorithmFamily::SigningSymmetric,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Aes256GcmSiv => "aes256-gcm-siv",
            KeyAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::HmacSha3_256 => "hmac-sha3-256",
        }
    }

    pub fn can_encrypt(self) -> bool {
        self.family() == AlgorithmFamily::AeadSymmetric
    }

    pub fn can_sign(self) -> bool {
        self.family() != AlgorithmFamily::AeadSymmetric
    }

    fn wrap_algorithm(self) -> Option<WrapAlgorithm> {
        match self {
            KeyAlgorithm::Aes256GcmSiv => Some(WrapAlgorithm::Aes256GcmSiv),
            KeyAlgorithm::ChaCha20Poly1305 => Some(WrapAlgorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = anyhow::Error;
    fn from_str(val: &str) -> anyhow::Result<KeyAlgorithm> {
        match val {
            "aes256-gcm-siv" => Ok(KeyAlgorithm::Aes256GcmSiv),
            "chacha20-poly1305" => Ok(KeyAlgorithm::ChaCha20Poly1305),
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            "hmac-sha3-256" => Ok(KeyAlgorithm::HmacSha3_256),
            other => Err(anyhow::anyhow!("Unknown KeyAlgorithm {}", other)),
        }
    }
}

/// Performs content operations with the plaintext material of one elastic key version.
pub struct ContentKeyCustodian<'a> {
    material: &'a SecretKey,
    algorithm: KeyAlgorithm,
}

impl<'a> ContentKeyCustodian<'a> {
    pub fn new(material: &'a SecretKey, algorithm: KeyAlgorithm) -> Result<Self, EncryptionError> {
        if material.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: material.len(),
            });
        }
        Ok(ContentKeyCustodian {
            material,
            algorithm,
        })
    }

    /// Fresh material for a new version. Ed25519 material is the 32 byte seed.
    pub fn generate_material(_algorithm: KeyAlgorithm) -> SecretKey {
        SecretKey::generate(KEY_LEN)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Envelope, EncryptionError> {
        let wrap = self.aead("encrypt")?;
        wrap_with(wrap, self.material, plaintext, aad)
    }

    pub fn decrypt(
        &self,
        envelope: &Envelope,
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
        let wrap = self.aead("decrypt")?;
        if envelope.algorithm_id != wrap.id() {
            return Err(EncryptionError::AuthenticationFailure);
        }
        unwrap_with(self.material, envelope, aad)
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => {
                let signing_key = self.signing_key()?;
                Ok(signing_key.sign(message).to_bytes().to_vec())
            }
            KeyAlgorithm::HmacSha3_256 => {
                let mut mac = self.mac()?;
                mac.update(message);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            algorithm => Err(EncryptionError::UnsupportedOperation {
                operation: "sign",
                algorithm,
            }),
        }
    }

    /// A malformed signature is a failed verification, not an error.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, EncryptionError> {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => {
                let verifying_key = self.signing_key()?.verifying_key();
                let signature = match Signature::from_slice(signature) {
                    Ok(signature) => signature,
                    Err(_) => return Ok(false),
                };
                Ok(verifying_key.verify(message, &signature).is_ok())
            }
            KeyAlgorithm::HmacSha3_256 => {
                let mut mac = self.mac()?;
                mac.update(message);
                Ok(mac.verify_slice(signature).is_ok())
            }
            algorithm => Err(EncryptionError::UnsupportedOperation {
                operation: "verify",
                algorithm,
            }),
        }
    }

    /// Only asymmetric keys have a public half.
    pub fn public_key(&self) -> Option<Vec<u8>> {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => self
                .signing_key()
                .ok()
                .map(|k| k.verifying_key().to_bytes().to_vec()),
            _ => None,
        }
    }

    fn aead(&self, operation: &'static str) -> Result<WrapAlgorithm, EncryptionError> {
        self.algorithm
            .wrap_algorithm()
            .ok_or(EncryptionError::UnsupportedOperation {
                operation,
                algorithm: self.algorithm,
            })
    }

    fn signing_key(&self) -> Result<SigningKey, EncryptionError> {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        seed.copy_from_slice(self.material.expose());
        Ok(SigningKey::from_bytes(&seed))
    }

    fn mac(&self) -> Result<HmacSha3, EncryptionError> {
        <HmacSha3 as Mac>::new_from_slice(self.material.expose()).map_err(|_| {
            EncryptionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: self.material.len(),
            }
        })
    }
}

/// Verify an Ed25519 signature against an exported public key.
pub fn verify_with_public_key(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, EncryptionError> {
    let bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| EncryptionError::Malformed("public key"))?;
    let verifying_key =
        VerifyingKey::from_bytes(&bytes).map_err(|_| EncryptionError::Malformed("public key"))?;
    match Signature::from_slice(signature) {
        Ok(signature) => Ok(verifying_key.verify(message, &signature).is_ok()),
        Err(_) => Ok(false),
    }
}
