//! The barrier encryption engine: threshold unseal, the root and intermediate
//! key hierarchy, elastic key lifecycle and the unwrapped key cache, behind a
//! single tenant scoped [`BarrierService`].

mod cache;
mod config;
mod error;
mod intermediate_key;
mod lifecycle;
mod locks;
mod message;
mod model;
mod root_key;
mod service;
pub mod store;
mod unseal;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::*;
pub use config::*;
pub use error::*;
pub use intermediate_key::*;
pub use lifecycle::*;
pub use message::*;
pub use model::*;
pub use root_key::*;
pub use service::*;
pub use unseal::*;
