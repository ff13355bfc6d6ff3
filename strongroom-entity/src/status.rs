use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use strongroom_core::{sea_orm, serde};

#[derive(Clone, Debug, PartialEq, EnumIter, DeriveActiveEnum, Deserialize, Serialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "elastic_key_status")]
#[serde(crate = "strongroom_core::serde")]
pub enum ElasticKeyStatus {
    #[sea_orm(string_value = "Creating")]
    Creating,
    #[sea_orm(string_value = "Active")]
    Active,
    #[sea_orm(string_value = "Disabled")]
    Disabled,
    #[sea_orm(string_value = "PendingDestroy")]
    PendingDestroy,
    #[sea_orm(string_value = "Destroyed")]
    Destroyed,
}

#[derive(Clone, Debug, PartialEq, EnumIter, DeriveActiveEnum, Deserialize, Serialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "version_status")]
#[serde(crate = "strongroom_core::serde")]
pub enum VersionStatus {
    #[sea_orm(string_value = "Generating")]
    Generating,
    #[sea_orm(string_value = "Active")]
    Active,
    #[sea_orm(string_value = "Retired")]
    Retired,
}

#[derive(Clone, Debug, PartialEq, EnumIter, DeriveActiveEnum, Deserialize, Serialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "intermediate_key_status")]
#[serde(crate = "strongroom_core::serde")]
pub enum IntermediateKeyStatus {
    #[sea_orm(string_value = "Active")]
    Active,
    #[sea_orm(string_value = "Retired")]
    Retired,
}
