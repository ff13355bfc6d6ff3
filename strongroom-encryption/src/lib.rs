use zeroize::Zeroizing;

mod content_key;
mod envelope;
mod error;
mod intermediate_key;
mod root_key;
mod secret;
mod unseal_key;

pub use content_key::*;
pub use envelope::*;
pub use error::*;
pub use intermediate_key::*;
pub use root_key::*;
pub use secret::*;
pub use unseal_key::*;

/// Every key in the hierarchy is 256 bits.
pub const KEY_LEN: usize = 32;

/// A key that locks (wraps) the keys one level below it in the hierarchy.
pub trait KeyCustodian {
    type Secret;
    type LockedKey;

    fn gen_secret(&self) -> SecretKey {
        SecretKey::generate(KEY_LEN)
    }
    fn lock(&self, secret: &Self::Secret) -> Result<Self::LockedKey, EncryptionError>;
    fn unlock(&self, locked_key: &Self::LockedKey) -> Result<Self::Secret, EncryptionError>;
}

/// Associated data binding a wrapped key to its position in the hierarchy.
pub(crate) fn binding(label: &[u8], parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let mut aad = Zeroizing::new(Vec::with_capacity(64));
    aad.extend_from_slice(label);
    for part in parts {
        aad.extend_from_slice(&(part.len() as u32).to_be_bytes());
        aad.extend_from_slice(part);
    }
    aad
}
