use std::fmt;

use rand::{thread_rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use strongroom_core::rand;

/// Plaintext key bytes. Zeroed on drop, never cloned, never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn generate(len: usize) -> Self {
        let mut buf = vec![0u8; len];
        thread_rng().fill_bytes(&mut buf);
        SecretKey(buf)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        SecretKey(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Zeroizing<Vec<u8>>> for SecretKey {
    fn from(mut val: Zeroizing<Vec<u8>>) -> SecretKey {
        SecretKey(std::mem::take(&mut *val))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SecretKey({} bytes)", self.0.len())
    }
}
