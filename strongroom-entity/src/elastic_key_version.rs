use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use strongroom_core::{chrono, sea_orm, serde};

/// One generation of key material. `envelope` is cleared once the owning key is destroyed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "elastic_key_versions")]
#[serde(crate = "strongroom_core::serde")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub elastic_key_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub version: i32,
    #[sea_orm(indexed, column_type = "Text")]
    pub tenant_id: String,
    #[sea_orm(indexed, column_type = "Text")]
    pub intermediate_key_id: String,
    pub envelope: Option<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub status: super::status::VersionStatus,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::elastic_key::Entity",
        from = "Column::ElasticKeyId",
        to = "super::elastic_key::Column::Id"
    )]
    ElasticKey,
    #[sea_orm(
        belongs_to = "super::intermediate_key::Entity",
        from = "Column::IntermediateKeyId",
        to = "super::intermediate_key::Column::Id"
    )]
    IntermediateKey,
}

impl Related<super::elastic_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ElasticKey.def()
    }
}

impl Related<super::intermediate_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IntermediateKey.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
