use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use strongroom_core::{sea_orm, serde};

#[derive(Clone, Debug, PartialEq, EnumIter, DeriveActiveEnum, Deserialize, Serialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "key_algorithm")]
#[serde(crate = "strongroom_core::serde")]
pub enum KeyAlgorithm {
    #[sea_orm(string_value = "aes256-gcm-siv")]
    Aes256GcmSiv,
    #[sea_orm(string_value = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[sea_orm(string_value = "ed25519")]
    Ed25519,
    #[sea_orm(string_value = "hmac-sha3-256")]
    HmacSha3_256,
}
