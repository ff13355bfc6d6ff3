use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use strongroom_core::{chrono, sea_orm, serde, Hash};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "intermediate_keys")]
#[serde(crate = "strongroom_core::serde")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(indexed, column_type = "Text")]
    pub tenant_id: String,
    #[sea_orm(indexed, column_type = "Text")]
    pub root_key_fingerprint: Hash,
    pub envelope: Vec<u8>,
    pub status: super::status::IntermediateKeyStatus,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::root_key::Entity",
        from = "Column::RootKeyFingerprint",
        to = "super::root_key::Column::Fingerprint"
    )]
    RootKey,
    #[sea_orm(has_many = "super::elastic_key_version::Entity")]
    ElasticKeyVersion,
}

impl Related<super::root_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RootKey.def()
    }
}

impl Related<super::elastic_key_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ElasticKeyVersion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
