#![deny(missing_docs)]

//! strongroom-core re-exports all packages shared by other strongroom crates and defines a number of core types.

#[cfg(feature = "crypto")]
pub use aes_gcm_siv;
pub use anyhow;
#[cfg(feature = "async-core")]
pub use async_trait;
#[cfg(feature = "crypto")]
pub use bs58;
#[cfg(feature = "crypto")]
pub use chacha20poly1305;
#[cfg(feature = "time")]
pub use chrono;
#[cfg(feature = "sync")]
pub use dashmap;
#[cfg(feature = "crypto")]
pub use ed25519_dalek;
#[cfg(feature = "async-core")]
pub use futures;
#[cfg(feature = "crypto")]
pub use hkdf;
#[cfg(feature = "crypto")]
pub use hmac;
#[cfg(feature = "lib")]
pub use log;
#[cfg(feature = "sync")]
pub use parking_lot;
#[cfg(feature = "random")]
pub use rand;
#[cfg(feature = "serialization")]
pub use rmp_serde;
#[cfg(feature = "sql")]
pub use sea_orm;
#[cfg(feature = "serialization")]
pub use serde;
#[cfg(feature = "serialization")]
pub use serde_json;
#[cfg(feature = "crypto")]
pub use sha3;
#[cfg(feature = "async-core")]
pub use tokio;
#[cfg(feature = "random")]
pub use uuid;

#[cfg(all(feature = "random", feature = "serialization"))]
mod types;
#[cfg(all(feature = "random", feature = "serialization"))]
pub use types::*;
