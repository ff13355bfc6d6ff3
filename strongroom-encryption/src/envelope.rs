use std::fmt;

use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use strongroom_core::{aes_gcm_siv, chacha20poly1305, rand, rmp_serde, serde};

use crate::{EncryptionError, SecretKey, KEY_LEN};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// AEAD used to produce an [`Envelope`]. The numeric id is persisted with every
/// envelope so that old envelopes stay readable after the default changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub enum WrapAlgorithm {
    #[serde(rename = "aes256-gcm-siv")]
    Aes256GcmSiv,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl WrapAlgorithm {
    pub fn id(self) -> u16 {
        match self {
            WrapAlgorithm::Aes256GcmSiv => 1,
            WrapAlgorithm::ChaCha20Poly1305 => 2,
        }
    }

    pub fn from_id(id: u16) -> Result<Self, EncryptionError> {
        match id {
            1 => Ok(WrapAlgorithm::Aes256GcmSiv),
            2 => Ok(WrapAlgorithm::ChaCha20Poly1305),
            other => Err(EncryptionError::UnsupportedAlgorithm(other)),
        }
    }
}

impl Default for WrapAlgorithm {
    fn default() -> Self {
        WrapAlgorithm::Aes256GcmSiv
    }
}

impl fmt::Display for WrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WrapAlgorithm::Aes256GcmSiv => write!(f, "aes256-gcm-siv"),
            WrapAlgorithm::ChaCha20Poly1305 => write!(f, "chacha20-poly1305"),
        }
    }
}

/// `{algorithm_id, nonce, ciphertext, tag}`, the only persisted wire format.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde")]
pub struct Envelope {
    pub algorithm_id: u16,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl Envelope {
    pub fn algorithm(&self) -> Result<WrapAlgorithm, EncryptionError> {
        WrapAlgorithm::from_id(self.algorithm_id)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncryptionError> {
        rmp_serde::to_vec(self).map_err(|_| EncryptionError::Malformed("envelope"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncryptionError> {
        rmp_serde::from_slice(bytes).map_err(|_| EncryptionError::Malformed("envelope"))
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Envelope(alg={}, {} bytes)",
            self.algorithm_id,
            self.ciphertext.len()
        )
    }
}

/// Wrap `plaintext` under `kek` with the default algorithm and no associated data.
pub fn wrap(kek: &SecretKey, plaintext: &[u8]) -> Result<Envelope, EncryptionError> {
    wrap_with(WrapAlgorithm::default(), kek, plaintext, &[])
}

/// Inverse of [`wrap`].
pub fn unwrap(kek: &SecretKey, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    unwrap_with(kek, envelope, &[])
}

pub fn wrap_with(
    algorithm: WrapAlgorithm,
    kek: &SecretKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Envelope, EncryptionError> {
    check_key_len(kek)?;

    let mut n_raw = vec![0u8; NONCE_LEN];
    thread_rng().fill_bytes(&mut n_raw);

    let mut sealed = match algorithm {
        WrapAlgorithm::Aes256GcmSiv => {
            use aes_gcm_siv::{
                aead::{Aead, KeyInit, Payload},
                Aes256GcmSiv, Key, Nonce,
            };

            let key = Key::<Aes256GcmSiv>::from_slice(kek.expose());
            let cipher = Aes256GcmSiv::new(key);
            cipher
                .encrypt(
                    Nonce::from_slice(&n_raw),
                    Payload {
                        msg: plaintext,
                        aad,
                    },
                )
                .map_err(|_| EncryptionError::Malformed("plaintext"))?
        }
        WrapAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::{
                aead::{Aead, KeyInit, Payload},
                ChaCha20Poly1305, Key, Nonce,
            };

            let key = Key::from_slice(kek.expose());
            let cipher = ChaCha20Poly1305::new(key);
            cipher
                .encrypt(
                    Nonce::from_slice(&n_raw),
                    Payload {
                        msg: plaintext,
                        aad,
                    },
                )
                .map_err(|_| EncryptionError::Malformed("plaintext"))?
        }
    };

    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    Ok(Envelope {
        algorithm_id: algorithm.id(),
        nonce: n_raw,
        ciphertext: sealed,
        tag,
    })
}

/// Never returns partial plaintext: any tag, nonce or layout problem is an
/// [`EncryptionError::AuthenticationFailure`].
pub fn unwrap_with(
    kek: &SecretKey,
    envelope: &Envelope,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    check_key_len(kek)?;
    let algorithm = envelope.algorithm()?;
    if envelope.nonce.len() != NONCE_LEN || envelope.tag.len() != TAG_LEN {
        return Err(EncryptionError::AuthenticationFailure);
    }

    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.tag);

    let plaintext = match algorithm {
        WrapAlgorithm::Aes256GcmSiv => {
            use aes_gcm_siv::{
                aead::{Aead, KeyInit, Payload},
                Aes256GcmSiv, Key, Nonce,
            };

            let key = Key::<Aes256GcmSiv>::from_slice(kek.expose());
            let cipher = Aes256GcmSiv::new(key);
            cipher.decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &sealed,
                    aad,
                },
            )
        }
        WrapAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::{
                aead::{Aead, KeyInit, Payload},
                ChaCha20Poly1305, Key, Nonce,
            };

            let key = Key::from_slice(kek.expose());
            let cipher = ChaCha20Poly1305::new(key);
            cipher.decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &sealed,
                    aad,
                },
            )
        }
    };

    plaintext
        .map(Zeroizing::new)
        .map_err(|_| EncryptionError::AuthenticationFailure)
}

fn check_key_len(key: &SecretKey) -> Result<(), EncryptionError> {
    if key.len() != KEY_LEN {
        return Err(EncryptionError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGORITHMS: [WrapAlgorithm; 2] =
        [WrapAlgorithm::Aes256GcmSiv, WrapAlgorithm::ChaCha20Poly1305];

    fn kek() -> SecretKey {
        SecretKey::from_bytes(b"an example very very secret key.".to_vec())
    }

    #[test]
    fn test_wrap_unwrap() {
        let kek = kek();
        for algorithm in ALGORITHMS {
            for plaintext in [&b""[..], &b"x"[..], &b"BTH a very very very secret key."[..]] {
                let envelope = wrap_with(algorithm, &kek, plaintext, b"ctx").expect("Invalid wrap");
                assert_eq!(envelope.algorithm_id, algorithm.id());
                assert_eq!(envelope.nonce.len(), NONCE_LEN);
                assert_eq!(envelope.tag.len(), TAG_LEN);
                let unwrapped = unwrap_with(&kek, &envelope, b"ctx").expect("Invalid unwrap");
                assert_eq!(&unwrapped[..], plaintext);
            }
        }
    }

    #[test]
    fn test_tamper_detection() {
        let kek = kek();
        for algorithm in ALGORITHMS {
            let envelope = wrap_with(algorithm, &kek, b"BTH a very very very secret key.", &[])
                .expect("Invalid wrap");
            for byte in 0..envelope.ciphertext.len() {
                for bit in 0..8 {
                    let mut tampered = envelope.clone();
                    tampered.ciphertext[byte] ^= 1 << bit;
                    assert_eq!(
                        unwrap(&kek, &tampered).err(),
                        Some(EncryptionError::AuthenticationFailure)
                    );
                }
            }
            for byte in 0..TAG_LEN {
                for bit in 0..8 {
                    let mut tampered = envelope.clone();
                    tampered.tag[byte] ^= 1 << bit;
                    assert_eq!(
                        unwrap(&kek, &tampered).err(),
                        Some(EncryptionError::AuthenticationFailure)
                    );
                }
            }
        }
    }

    #[test]
    fn test_wrong_kek_and_aad_fail() {
        let envelope = wrap_with(WrapAlgorithm::default(), &kek(), b"secret", b"tenant-a")
            .expect("Invalid wrap");
        let other = SecretKey::generate(KEY_LEN);
        assert_eq!(
            unwrap_with(&other, &envelope, b"tenant-a").err(),
            Some(EncryptionError::AuthenticationFailure)
        );
        assert_eq!(
            unwrap_with(&kek(), &envelope, b"tenant-b").err(),
            Some(EncryptionError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_historical_algorithm_stays_unwrappable() {
        let kek = kek();
        let old = wrap_with(WrapAlgorithm::ChaCha20Poly1305, &kek, b"legacy", &[])
            .expect("Invalid wrap");
        let bytes = old.to_bytes().expect("Invalid envelope");
        let decoded = Envelope::from_bytes(&bytes).expect("Invalid envelope");
        assert_eq!(decoded.algorithm(), Ok(WrapAlgorithm::ChaCha20Poly1305));
        assert_eq!(&unwrap(&kek, &decoded).expect("Invalid unwrap")[..], b"legacy");
    }

    #[test]
    fn test_unknown_algorithm_and_short_key() {
        let mut envelope = wrap(&kek(), b"secret").expect("Invalid wrap");
        envelope.algorithm_id = 99;
        assert_eq!(
            unwrap(&kek(), &envelope).err(),
            Some(EncryptionError::UnsupportedAlgorithm(99))
        );
        let short = SecretKey::generate(16);
        assert_eq!(
            wrap(&short, b"secret").err(),
            Some(EncryptionError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        );
    }
}
