use std::fmt;

use hkdf::Hkdf;
use sha3::Sha3_256;
use zeroize::Zeroizing;

use strongroom_core::{bs58, hkdf, sha3, Hash};

use crate::{
    binding, unwrap_with, wrap_with, EncryptionError, Envelope, KeyCustodian, SecretKey,
    WrapAlgorithm, KEY_LEN,
};

/// Length of a single unseal share.
pub const SHARE_LEN: usize = 32;

const SUBSET_SALT: &[u8] = b"strongroom-unseal-v1";
const COMMITMENT_DOMAIN: &[u8] = b"strongroom-unseal-commitment-v1";
const ROOT_KEY_LABEL: &[u8] = b"strongroom/root-key";

/// One of the N secrets handed to operators at initialization. Indices start at 1.
pub struct UnsealShare {
    index: u8,
    value: SecretKey,
}

impl UnsealShare {
    pub fn generate(index: u8) -> Self {
        UnsealShare {
            index,
            value: SecretKey::generate(SHARE_LEN),
        }
    }

    pub fn from_parts(index: u8, value: SecretKey) -> Result<Self, EncryptionError> {
        if index == 0 {
            return Err(EncryptionError::InvalidShare("index must be at least 1"));
        }
        if value.len() != SHARE_LEN {
            return Err(EncryptionError::InvalidShare("wrong share length"));
        }
        Ok(UnsealShare { index, value })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Public digest stored alongside the sealed root key so a mistyped
    /// share is rejected when it is submitted, not when the threshold is reached.
    pub fn commitment(&self) -> Hash {
        Hash::digest(&[COMMITMENT_DOMAIN, &[self.index], self.value.expose()])
    }

    /// `<index>-<base58 value>`
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "{}-{}",
            self.index,
            bs58::encode(self.value.expose()).into_string()
        ))
    }

    pub fn decode(encoded: &str) -> Result<Self, EncryptionError> {
        let (index, value) = encoded
            .trim()
            .split_once('-')
            .ok_or(EncryptionError::InvalidShare("expected <index>-<value>"))?;
        let index = index
            .parse::<u8>()
            .map_err(|_| EncryptionError::InvalidShare("index is not a number"))?;
        let value = Zeroizing::new(
            bs58::decode(value)
                .into_vec()
                .map_err(|_| EncryptionError::InvalidShare("value is not base58"))?,
        );
        UnsealShare::from_parts(index, SecretKey::from(value))
    }
}

impl fmt::Debug for UnsealShare {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UnsealShare({})", self.index)
    }
}

/// Deal `count` fresh shares with indices `1..=count`.
pub fn deal_shares(count: u8) -> Vec<UnsealShare> {
    (1..=count).map(UnsealShare::generate).collect()
}

/// Every `threshold` sized subset of the share indices `1..=shares`, in lexicographic order.
pub fn subsets(shares: u8, threshold: u8) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    if threshold == 0 || threshold > shares {
        return out;
    }
    let k = threshold as usize;
    let mut current: Vec<u8> = (1..=threshold).collect();
    loop {
        out.push(current.clone());
        // rightmost position that can still be advanced
        let mut pos = k;
        while pos > 0 && current[pos - 1] == shares - (k - pos) as u8 {
            pos -= 1;
        }
        if pos == 0 {
            return out;
        }
        current[pos - 1] += 1;
        for i in pos..k {
            current[i] = current[i - 1] + 1;
        }
    }
}

/// Derives the wrapping key for one subset of shares. Input order does not matter.
pub fn subset_key(shares: &[&UnsealShare]) -> Result<SecretKey, EncryptionError> {
    let mut ordered: Vec<&UnsealShare> = shares.to_vec();
    ordered.sort_by_key(|s| s.index);
    if ordered.windows(2).any(|w| w[0].index == w[1].index) {
        return Err(EncryptionError::InvalidShare("duplicate share index"));
    }

    let mut ikm = Zeroizing::new(Vec::with_capacity(ordered.len() * SHARE_LEN));
    let mut info = SUBSET_SALT.to_vec();
    for share in &ordered {
        ikm.extend_from_slice(share.value.expose());
        info.push(share.index);
    }

    let hk = Hkdf::<Sha3_256>::new(Some(SUBSET_SALT), &ikm);
    let mut okm = Zeroizing::new(vec![0u8; KEY_LEN]);
    hk.expand(&info, &mut okm)
        .map_err(|_| EncryptionError::Malformed("subset key length"))?;
    Ok(SecretKey::from(okm))
}

/// Wraps the root key under the key derived from one subset of unseal shares.
pub struct UnsealKeyCustodian {
    subset_key: SecretKey,
    indices: Vec<u8>,
    algorithm: WrapAlgorithm,
}

impl UnsealKeyCustodian {
    pub fn from_shares(shares: &[&UnsealShare]) -> Result<Self, EncryptionError> {
        let subset_key = subset_key(shares)?;
        let mut indices: Vec<u8> = shares.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        Ok(UnsealKeyCustodian {
            subset_key,
            indices,
            algorithm: WrapAlgorithm::default(),
        })
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    fn aad(&self) -> Zeroizing<Vec<u8>> {
        binding(ROOT_KEY_LABEL, &[&self.indices])
    }
}

impl KeyCustodian for UnsealKeyCustodian {
    type Secret = SecretKey;
    type LockedKey = Envelope;

    fn lock(&self, root_key: &SecretKey) -> Result<Envelope, EncryptionError> {
        wrap_with(self.algorithm, &self.subset_key, root_key.expose(), &self.aad())
    }

    fn unlock(&self, locked_key: &Envelope) -> Result<SecretKey, EncryptionError> {
        let root_key = unwrap_with(&self.subset_key, locked_key, &self.aad())?;
        if root_key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: root_key.len(),
            });
        }
        Ok(SecretKey::from(root_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsets() {
        assert_eq!(
            subsets(4, 2),
            vec![
                vec![1, 2],
                vec![1, 3],
                vec![1, 4],
                vec![2, 3],
                vec![2, 4],
                vec![3, 4],
            ]
        );
        assert_eq!(subsets(5, 3).len(), 10);
        assert_eq!(subsets(3, 3), vec![vec![1, 2, 3]]);
        assert_eq!(subsets(1, 1), vec![vec![1]]);
        assert!(subsets(2, 3).is_empty());
        assert!(subsets(2, 0).is_empty());
    }

    #[test]
    fn test_subset_key_ignores_submission_order() {
        let shares = deal_shares(3);
        let a = subset_key(&[&shares[0], &shares[2]]).expect("Invalid subset key");
        let b = subset_key(&[&shares[2], &shares[0]]).expect("Invalid subset key");
        let c = subset_key(&[&shares[0], &shares[1]]).expect("Invalid subset key");
        assert_eq!(a.expose(), b.expose());
        assert_ne!(a.expose(), c.expose());
        assert!(subset_key(&[&shares[0], &shares[0]]).is_err());
    }

    #[test]
    fn test_unseal_key_custodian() {
        let shares = deal_shares(5);
        let root_key = SecretKey::from_bytes(b"an example very very secret key.".to_vec());
        let custodian = UnsealKeyCustodian::from_shares(&[&shares[3], &shares[0], &shares[1]])
            .expect("Invalid UnsealKeyCustodian");
        assert_eq!(custodian.indices(), &[1, 2, 4]);
        let locked = custodian.lock(&root_key).expect("Invalid lock");

        let same = UnsealKeyCustodian::from_shares(&[&shares[0], &shares[1], &shares[3]])
            .expect("Invalid UnsealKeyCustodian");
        let unlocked = same.unlock(&locked).expect("Invalid unlock");
        assert_eq!(unlocked.expose(), root_key.expose());

        let other = UnsealKeyCustodian::from_shares(&[&shares[0], &shares[1], &shares[2]])
            .expect("Invalid UnsealKeyCustodian");
        assert_eq!(
            other.unlock(&locked).err(),
            Some(EncryptionError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_share_encoding() {
        let share = UnsealShare::generate(3);
        let decoded = UnsealShare::decode(&share.encode()).expect("Invalid share");
        assert_eq!(decoded.index(), 3);
        assert_eq!(decoded.commitment(), share.commitment());
        assert_eq!(format!("{:?}", decoded), "UnsealShare(3)");

        assert!(UnsealShare::decode("nonsense").is_err());
        assert!(UnsealShare::decode("0-11111111111111111111111111111111").is_err());
        assert!(UnsealShare::decode("1-abc").is_err());
    }
}
