use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use strongroom_core::{chrono, sea_orm, serde};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "elastic_keys")]
#[serde(crate = "strongroom_core::serde")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(indexed, column_type = "Text")]
    pub tenant_id: String,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub algorithm: super::algorithm::KeyAlgorithm,
    pub status: super::status::ElasticKeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::elastic_key_version::Entity", on_delete = "Cascade")]
    ElasticKeyVersion,
}

impl Related<super::elastic_key_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ElasticKeyVersion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
