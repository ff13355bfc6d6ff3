use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use strongroom_core::{chrono, sea_orm, serde, Hash};

/// The sealed root key. Written once at initialization and never updated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "root_keys")]
#[serde(crate = "strongroom_core::serde")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub fingerprint: Hash,
    pub threshold: i32,
    pub shares: i32,
    pub share_commitments: Json,
    pub envelopes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::intermediate_key::Entity")]
    IntermediateKey,
}

impl Related<super::intermediate_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IntermediateKey.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
