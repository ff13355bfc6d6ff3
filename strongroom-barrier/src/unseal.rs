use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use strongroom_core::{chrono, log, tokio};
use strongroom_encryption::{
    deal_shares, subsets, KeyCustodian, RootKeyCustodian, SecretKey, UnsealKeyCustodian,
    UnsealShare, WrapAlgorithm, KEY_LEN,
};

use crate::{
    store::BarrierStore, BarrierError, RootKeyManager, SealedRootKey, SubsetEnvelope,
    UnsealConfig,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SealStatus {
    Sealed,
    Unsealing { submitted: u8, threshold: u8 },
    Unsealed,
}

#[derive(Default)]
struct UnsealState {
    sealed: Option<SealedRootKey>,
    shares: Vec<UnsealShare>,
}

/// Collects unseal shares and installs the root key exactly once.
pub struct UnsealCoordinator {
    store: Arc<dyn BarrierStore>,
    root: Arc<RootKeyManager>,
    config: UnsealConfig,
    algorithm: WrapAlgorithm,
    // serializes initialize and submit_share
    state: Mutex<UnsealState>,
}

impl UnsealCoordinator {
    pub fn new(
        store: Arc<dyn BarrierStore>,
        root: Arc<RootKeyManager>,
        config: UnsealConfig,
        algorithm: WrapAlgorithm,
    ) -> Self {
        UnsealCoordinator {
            store,
            root,
            config,
            algorithm,
            state: Mutex::new(UnsealState::default()),
        }
    }

    /// First ever bootstrap. Generates the root key, seals it under every
    /// threshold sized subset of freshly dealt shares and persists the result.
    /// The shares are returned once and never stored. The barrier stays sealed.
    pub async fn initialize(&self) -> Result<Vec<UnsealShare>, BarrierError> {
        let _state = self.state.lock().await;
        if self.store.load_root_key().await?.is_some() {
            return Err(BarrierError::AlreadyInitialized);
        }
        let UnsealConfig { threshold, shares } = self.config;
        if threshold == 0 || threshold > shares {
            return Err(BarrierError::InvalidConfig(format!(
                "cannot deal {}-of-{} unseal shares",
                threshold, shares
            )));
        }

        let dealt = deal_shares(shares);
        let root_key = SecretKey::generate(KEY_LEN);
        let mut envelopes = Vec::new();
        for indices in subsets(shares, threshold) {
            let subset: Vec<&UnsealShare> = indices
                .iter()
                .map(|i| &dealt[usize::from(*i) - 1])
                .collect();
            let custodian = UnsealKeyCustodian::from_shares(&subset)?;
            envelopes.push(SubsetEnvelope {
                indices,
                envelope: custodian.lock(&root_key)?,
            });
        }

        let sealed = SealedRootKey {
            threshold,
            shares,
            share_commitments: dealt.iter().map(UnsealShare::commitment).collect(),
            envelopes,
            fingerprint: RootKeyCustodian::fingerprint_of(&root_key),
            created_at: Utc::now(),
        };
        self.store.save_root_key(&sealed).await?;
        info!(
            "Initialized root key {} with {}-of-{} unseal shares",
            sealed.fingerprint, threshold, shares
        );
        Ok(dealt)
    }

    pub async fn status(&self) -> SealStatus {
        if self.root.is_unsealed() {
            return SealStatus::Unsealed;
        }
        let state = self.state.lock().await;
        match (&state.sealed, state.shares.len()) {
            (Some(sealed), submitted) if submitted > 0 => SealStatus::Unsealing {
                submitted: submitted as u8,
                threshold: sealed.threshold,
            },
            _ => SealStatus::Sealed,
        }
    }

    pub async fn is_initialized(&self) -> Result<bool, BarrierError> {
        Ok(self.store.load_root_key().await?.is_some())
    }

    /// Parse `<index>-<base58>` and submit it.
    pub async fn submit_encoded_share(&self, encoded: &str) -> Result<SealStatus, BarrierError> {
        let share = UnsealShare::decode(encoded)?;
        self.submit(share).await
    }

    pub async fn submit_share(&self, index: u8, value: &[u8]) -> Result<SealStatus, BarrierError> {
        let share = UnsealShare::from_parts(index, SecretKey::from_bytes(value.to_vec()))?;
        self.submit(share).await
    }

    async fn submit(&self, share: UnsealShare) -> Result<SealStatus, BarrierError> {
        let mut state = self.state.lock().await;
        if self.root.is_unsealed() {
            return Ok(SealStatus::Unsealed);
        }
        if state.sealed.is_none() {
            state.sealed = Some(
                self.store
                    .load_root_key()
                    .await?
                    .ok_or(BarrierError::NotInitialized)?,
            );
        }
        let sealed = match &state.sealed {
            Some(sealed) => sealed.clone(),
            None => return Err(BarrierError::NotInitialized),
        };

        let index = share.index();
        if index == 0 || index > sealed.shares {
            return Err(BarrierError::InvalidShare(format!(
                "index {} outside 1..={}",
                index, sealed.shares
            )));
        }
        if sealed.share_commitments.get(usize::from(index) - 1) != Some(&share.commitment()) {
            warn!("Rejected unseal share {}", index);
            return Err(BarrierError::InvalidShare(format!(
                "share {} does not match its commitment",
                index
            )));
        }
        if state.shares.iter().any(|s| s.index() == index) {
            debug!("Unseal share {} already submitted", index);
            return Ok(self.progress(&state, &sealed));
        }
        state.shares.push(share);
        info!(
            "Accepted unseal share {} ({}/{})",
            index,
            state.shares.len(),
            sealed.threshold
        );
        if state.shares.len() < usize::from(sealed.threshold) {
            return Ok(self.progress(&state, &sealed));
        }

        // collected shares are zeroized when `shares` drops
        let shares = std::mem::take(&mut state.shares);
        match self.recombine(&sealed, &shares) {
            Ok(custodian) => {
                self.root.install(custodian);
                info!("Barrier unsealed");
                Ok(SealStatus::Unsealed)
            }
            Err(err) => {
                error!("Unseal failed after reaching threshold: {}", err);
                Err(err)
            }
        }
    }

    fn recombine(
        &self,
        sealed: &SealedRootKey,
        shares: &[UnsealShare],
    ) -> Result<RootKeyCustodian, BarrierError> {
        let mut subset: Vec<&UnsealShare> = shares.iter().collect();
        subset.sort_by_key(|s| s.index());
        subset.truncate(usize::from(sealed.threshold));
        let indices: Vec<u8> = subset.iter().map(|s| s.index()).collect();
        let envelope = sealed
            .envelope_for(&indices)
            .ok_or_else(|| BarrierError::NotFound(format!("root key envelope for {:?}", indices)))?;

        let root_key = UnsealKeyCustodian::from_shares(&subset)?.unlock(envelope)?;
        if RootKeyCustodian::fingerprint_of(&root_key) != sealed.fingerprint {
            return Err(BarrierError::AuthenticationFailure);
        }
        Ok(RootKeyCustodian::new(root_key, self.algorithm)?)
    }

    fn progress(&self, state: &UnsealState, sealed: &SealedRootKey) -> SealStatus {
        SealStatus::Unsealing {
            submitted: state.shares.len() as u8,
            threshold: sealed.threshold,
        }
    }
}
