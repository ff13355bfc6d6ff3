use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use sea_orm::{
    entity::*, query::*, sea_query::Expr, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionTrait,
};

use strongroom_core::{
    async_trait, chrono, log, rmp_serde, sea_orm, serde_json, ElasticKeyId, Hash,
    IntermediateKeyId, TenantId,
};
use strongroom_encryption::{Envelope, KeyAlgorithm};
use strongroom_entity::{
    algorithm::KeyAlgorithm as KeyAlgorithmRow,
    elastic_key, elastic_key_version, intermediate_key, root_key,
    status::{
        ElasticKeyStatus as ElasticKeyStatusRow,
        IntermediateKeyStatus as IntermediateKeyStatusRow, VersionStatus as VersionStatusRow,
    },
};

use super::{ElasticKeyStore, ElasticKeyVersionStore, IntermediateKeyStore, RootKeyStore};
use crate::{
    BarrierError, ElasticKey, ElasticKeyStatus, ElasticKeyVersion, IntermediateKey,
    IntermediateKeyStatus, SealedRootKey, SubsetEnvelope, VersionStatus,
};

impl From<DbErr> for BarrierError {
    fn from(err: DbErr) -> BarrierError {
        BarrierError::StoreUnavailable(err.to_string())
    }
}

macro_rules! row_enum {
    ($to_row:ident, $from_row:ident, $model:ident, $row:ident, [$($variant:ident),+]) => {
        fn $to_row(val: $model) -> $row {
            match val {
                $($model::$variant => $row::$variant,)+
            }
        }

        fn $from_row(val: $row) -> $model {
            match val {
                $($row::$variant => $model::$variant,)+
            }
        }
    };
}

row_enum!(
    key_status_row,
    key_status,
    ElasticKeyStatus,
    ElasticKeyStatusRow,
    [Creating, Active, Disabled, PendingDestroy, Destroyed]
);
row_enum!(
    version_status_row,
    version_status,
    VersionStatus,
    VersionStatusRow,
    [Generating, Active, Retired]
);
row_enum!(
    intermediate_status_row,
    intermediate_status,
    IntermediateKeyStatus,
    IntermediateKeyStatusRow,
    [Active, Retired]
);
row_enum!(
    algorithm_row,
    algorithm,
    KeyAlgorithm,
    KeyAlgorithmRow,
    [Aes256GcmSiv, ChaCha20Poly1305, Ed25519, HmacSha3_256]
);

fn corrupt(what: &str, err: impl ToString) -> BarrierError {
    BarrierError::StoreUnavailable(format!("corrupt {}: {}", what, err.to_string()))
}

fn parse_id<T: FromStr>(what: &str, val: &str) -> Result<T, BarrierError>
where
    T::Err: ToString,
{
    T::from_str(val).map_err(|err| corrupt(what, err))
}

fn envelope_bytes(envelope: &Envelope) -> Result<Vec<u8>, BarrierError> {
    Ok(envelope.to_bytes()?)
}

fn root_key_from_row(row: root_key::Model) -> Result<SealedRootKey, BarrierError> {
    let share_commitments: Vec<Hash> = serde_json::from_value(row.share_commitments)
        .map_err(|err| corrupt("share commitments", err))?;
    let envelopes: Vec<SubsetEnvelope> =
        rmp_serde::from_slice(&row.envelopes).map_err(|err| corrupt("root key envelopes", err))?;
    Ok(SealedRootKey {
        threshold: u8::try_from(row.threshold).map_err(|err| corrupt("threshold", err))?,
        shares: u8::try_from(row.shares).map_err(|err| corrupt("shares", err))?,
        share_commitments,
        envelopes,
        fingerprint: row.fingerprint,
        created_at: row.created_at,
    })
}

fn intermediate_key_from_row(row: intermediate_key::Model) -> Result<IntermediateKey, BarrierError> {
    Ok(IntermediateKey {
        id: parse_id("intermediate key id", &row.id)?,
        tenant_id: parse_id("tenant id", &row.tenant_id)?,
        envelope: Envelope::from_bytes(&row.envelope)?,
        root_key_fingerprint: row.root_key_fingerprint,
        status: intermediate_status(row.status),
        created_at: row.created_at,
        retired_at: row.retired_at,
    })
}

fn intermediate_key_row(key: &IntermediateKey) -> Result<intermediate_key::ActiveModel, BarrierError> {
    Ok(intermediate_key::ActiveModel {
        id: Set(key.id.to_string()),
        tenant_id: Set(key.tenant_id.to_string()),
        root_key_fingerprint: Set(key.root_key_fingerprint.clone()),
        envelope: Set(envelope_bytes(&key.envelope)?),
        status: Set(intermediate_status_row(key.status)),
        created_at: Set(key.created_at),
        retired_at: Set(key.retired_at),
    })
}

fn elastic_key_from_row(row: elastic_key::Model) -> Result<ElasticKey, BarrierError> {
    Ok(ElasticKey {
        id: parse_id("elastic key id", &row.id)?,
        tenant_id: parse_id("tenant id", &row.tenant_id)?,
        name: row.name,
        description: row.description,
        algorithm: algorithm(row.algorithm),
        status: key_status(row.status),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn version_from_row(row: elastic_key_version::Model) -> Result<ElasticKeyVersion, BarrierError> {
    Ok(ElasticKeyVersion {
        elastic_key_id: parse_id("elastic key id", &row.elastic_key_id)?,
        tenant_id: parse_id("tenant id", &row.tenant_id)?,
        version: u32::try_from(row.version).map_err(|err| corrupt("version", err))?,
        intermediate_key_id: parse_id("intermediate key id", &row.intermediate_key_id)?,
        envelope: row
            .envelope
            .as_deref()
            .map(Envelope::from_bytes)
            .transpose()?,
        public_key: row.public_key,
        status: version_status(row.status),
        created_at: row.created_at,
        retired_at: row.retired_at,
    })
}

fn version_row(
    version: &ElasticKeyVersion,
    status: VersionStatus,
) -> Result<elastic_key_version::ActiveModel, BarrierError> {
    Ok(elastic_key_version::ActiveModel {
        elastic_key_id: Set(version.elastic_key_id.to_string()),
        version: Set(version_column(version.version)?),
        tenant_id: Set(version.tenant_id.to_string()),
        intermediate_key_id: Set(version.intermediate_key_id.to_string()),
        envelope: Set(version.envelope.as_ref().map(envelope_bytes).transpose()?),
        public_key: Set(version.public_key.clone()),
        status: Set(version_status_row(status)),
        created_at: Set(version.created_at),
        retired_at: Set(version.retired_at),
    })
}

fn version_column(version: u32) -> Result<i32, BarrierError> {
    i32::try_from(version).map_err(|_| {
        BarrierError::InvalidStateTransition(format!("version {} out of range", version))
    })
}

/// Relational store over any sea-orm backend. Every atomic primitive runs in
/// one database transaction and guards its writes with the expected state.
#[derive(Clone)]
pub struct SeaOrmStore {
    database: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(database: DatabaseConnection) -> Self {
        SeaOrmStore { database }
    }

    async fn elastic_key_in(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<elastic_key::Model, BarrierError> {
        elastic_key::Entity::find()
            .filter(
                Condition::all()
                    .add(elastic_key::Column::Id.eq(id.to_string()))
                    .add(elastic_key::Column::TenantId.eq(tenant_id.to_string())),
            )
            .one(txn)
            .await?
            .ok_or_else(|| BarrierError::NotFound(format!("elastic key {}", id)))
    }

    /// Compare and set the status column inside `txn`.
    async fn swap_status(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected: ElasticKeyStatus,
        next: ElasticKeyStatus,
    ) -> Result<(), BarrierError> {
        let res = elastic_key::Entity::update_many()
            .col_expr(
                elastic_key::Column::Status,
                Expr::value(key_status_row(next)),
            )
            .col_expr(elastic_key::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(
                Condition::all()
                    .add(elastic_key::Column::Id.eq(id.to_string()))
                    .add(elastic_key::Column::TenantId.eq(tenant_id.to_string()))
                    .add(elastic_key::Column::Status.eq(key_status_row(expected))),
            )
            .exec(txn)
            .await?;
        if res.rows_affected != 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is no longer {}",
                id, expected
            )));
        }
        Ok(())
    }

    fn versions_of(tenant_id: TenantId, id: ElasticKeyId) -> Condition {
        Condition::all()
            .add(elastic_key_version::Column::ElasticKeyId.eq(id.to_string()))
            .add(elastic_key_version::Column::TenantId.eq(tenant_id.to_string()))
    }
}

#[async_trait]
impl RootKeyStore for SeaOrmStore {
    async fn load_root_key(&self) -> Result<Option<SealedRootKey>, BarrierError> {
        root_key::Entity::find()
            .one(&self.database)
            .await?
            .map(root_key_from_row)
            .transpose()
    }

    async fn save_root_key(&self, sealed: &SealedRootKey) -> Result<(), BarrierError> {
        let txn = self.database.begin().await?;
        if root_key::Entity::find().one(&txn).await?.is_some() {
            return Err(BarrierError::AlreadyInitialized);
        }
        let share_commitments = serde_json::to_value(&sealed.share_commitments)
            .map_err(|err| BarrierError::Crypto(err.to_string()))?;
        let envelopes = rmp_serde::to_vec(&sealed.envelopes)
            .map_err(|err| BarrierError::Crypto(err.to_string()))?;
        root_key::Entity::insert(root_key::ActiveModel {
            fingerprint: Set(sealed.fingerprint.clone()),
            threshold: Set(i32::from(sealed.threshold)),
            shares: Set(i32::from(sealed.shares)),
            share_commitments: Set(share_commitments),
            envelopes: Set(envelopes),
            created_at: Set(sealed.created_at),
        })
        .exec(&txn)
        .await?;
        txn.commit().await?;
        debug!("Saved root key {}", sealed.fingerprint);
        Ok(())
    }
}

#[async_trait]
impl IntermediateKeyStore for SeaOrmStore {
    async fn create_intermediate_key(&self, key: &IntermediateKey) -> Result<(), BarrierError> {
        let txn = self.database.begin().await?;
        let active = intermediate_key::Entity::find()
            .filter(
                Condition::all()
                    .add(intermediate_key::Column::TenantId.eq(key.tenant_id.to_string()))
                    .add(intermediate_key::Column::Status.eq(IntermediateKeyStatusRow::Active)),
            )
            .one(&txn)
            .await?;
        if active.is_some() {
            return Err(BarrierError::ConcurrentModification(format!(
                "tenant {} already has an active intermediate key",
                key.tenant_id
            )));
        }
        intermediate_key::Entity::insert(intermediate_key_row(key)?)
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn get_intermediate_key(
        &self,
        tenant_id: TenantId,
        id: IntermediateKeyId,
    ) -> Result<Option<IntermediateKey>, BarrierError> {
        intermediate_key::Entity::find()
            .filter(
                Condition::all()
                    .add(intermediate_key::Column::Id.eq(id.to_string()))
                    .add(intermediate_key::Column::TenantId.eq(tenant_id.to_string())),
            )
            .one(&self.database)
            .await?
            .map(intermediate_key_from_row)
            .transpose()
    }

    async fn list_active_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError> {
        intermediate_key::Entity::find()
            .filter(
                Condition::all()
                    .add(intermediate_key::Column::TenantId.eq(tenant_id.to_string()))
                    .add(intermediate_key::Column::Status.eq(IntermediateKeyStatusRow::Active)),
            )
            .order_by_asc(intermediate_key::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(intermediate_key_from_row)
            .collect()
    }

    async fn list_retired_intermediate_keys(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<IntermediateKey>, BarrierError> {
        intermediate_key::Entity::find()
            .filter(
                Condition::all()
                    .add(intermediate_key::Column::TenantId.eq(tenant_id.to_string()))
                    .add(intermediate_key::Column::Status.eq(IntermediateKeyStatusRow::Retired)),
            )
            .order_by_asc(intermediate_key::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(intermediate_key_from_row)
            .collect()
    }

    async fn rotate_intermediate_key(
        &self,
        tenant_id: TenantId,
        expected_active: IntermediateKeyId,
        next: &IntermediateKey,
    ) -> Result<(), BarrierError> {
        let txn = self.database.begin().await?;
        let res = intermediate_key::Entity::update_many()
            .col_expr(
                intermediate_key::Column::Status,
                Expr::value(IntermediateKeyStatusRow::Retired),
            )
            .col_expr(intermediate_key::Column::RetiredAt, Expr::value(Some(Utc::now())))
            .filter(
                Condition::all()
                    .add(intermediate_key::Column::Id.eq(expected_active.to_string()))
                    .add(intermediate_key::Column::TenantId.eq(tenant_id.to_string()))
                    .add(intermediate_key::Column::Status.eq(IntermediateKeyStatusRow::Active)),
            )
            .exec(&txn)
            .await?;
        if res.rows_affected != 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "intermediate key {} is no longer active",
                expected_active
            )));
        }
        intermediate_key::Entity::insert(intermediate_key_row(next)?)
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ElasticKeyStore for SeaOrmStore {
    async fn insert_elastic_key(&self, key: &ElasticKey) -> Result<(), BarrierError> {
        let txn = self.database.begin().await?;
        let existing = elastic_key::Entity::find()
            .filter(
                Condition::all()
                    .add(elastic_key::Column::TenantId.eq(key.tenant_id.to_string()))
                    .add(elastic_key::Column::Name.eq(key.name.clone())),
            )
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(BarrierError::AlreadyExists(format!(
                "elastic key named {}",
                key.name
            )));
        }
        elastic_key::Entity::insert(elastic_key::ActiveModel {
            id: Set(key.id.to_string()),
            tenant_id: Set(key.tenant_id.to_string()),
            name: Set(key.name.clone()),
            description: Set(key.description.clone()),
            algorithm: Set(algorithm_row(key.algorithm)),
            status: Set(key_status_row(key.status)),
            created_at: Set(key.created_at),
            updated_at: Set(key.updated_at),
        })
        .exec(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn get_elastic_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Option<ElasticKey>, BarrierError> {
        elastic_key::Entity::find()
            .filter(
                Condition::all()
                    .add(elastic_key::Column::Id.eq(id.to_string()))
                    .add(elastic_key::Column::TenantId.eq(tenant_id.to_string())),
            )
            .one(&self.database)
            .await?
            .map(elastic_key_from_row)
            .transpose()
    }

    async fn list_elastic_keys(
        &self,
        tenant_id: TenantId,
        status: Option<ElasticKeyStatus>,
    ) -> Result<Vec<ElasticKey>, BarrierError> {
        let mut condition =
            Condition::all().add(elastic_key::Column::TenantId.eq(tenant_id.to_string()));
        if let Some(status) = status {
            condition = condition.add(elastic_key::Column::Status.eq(key_status_row(status)));
        }
        elastic_key::Entity::find()
            .filter(condition)
            .order_by_asc(elastic_key::Column::Name)
            .all(&self.database)
            .await?
            .into_iter()
            .map(elastic_key_from_row)
            .collect()
    }

    async fn update_elastic_key_status(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected: ElasticKeyStatus,
        next: ElasticKeyStatus,
    ) -> Result<ElasticKey, BarrierError> {
        let txn = self.database.begin().await?;
        Self::elastic_key_in(&txn, tenant_id, id).await?;
        Self::swap_status(&txn, tenant_id, id, expected, next).await?;
        let updated = Self::elastic_key_in(&txn, tenant_id, id).await?;
        txn.commit().await?;
        elastic_key_from_row(updated)
    }

    async fn update_elastic_key_description(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        description: &str,
    ) -> Result<ElasticKey, BarrierError> {
        let txn = self.database.begin().await?;
        let mut key: elastic_key::ActiveModel =
            Self::elastic_key_in(&txn, tenant_id, id).await?.into();
        key.description = Set(description.to_string());
        key.updated_at = Set(Utc::now());
        let updated = key.update(&txn).await?;
        txn.commit().await?;
        elastic_key_from_row(updated)
    }
}

#[async_trait]
impl ElasticKeyVersionStore for SeaOrmStore {
    async fn activate_with_first_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        first: &ElasticKeyVersion,
    ) -> Result<(), BarrierError> {
        let status = first.status.transition(VersionStatus::Active)?;
        let txn = self.database.begin().await?;
        Self::elastic_key_in(&txn, tenant_id, id).await?;
        let existing = elastic_key_version::Entity::find()
            .filter(Self::versions_of(tenant_id, id))
            .one(&txn)
            .await?;
        if existing.is_some() || first.version != 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} already has versions",
                id
            )));
        }
        Self::swap_status(
            &txn,
            tenant_id,
            id,
            ElasticKeyStatus::Creating,
            ElasticKeyStatus::Active,
        )
        .await?;
        elastic_key_version::Entity::insert(version_row(first, status)?)
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn rotate_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        expected_active: u32,
        next: &ElasticKeyVersion,
    ) -> Result<(), BarrierError> {
        let status = next.status.transition(VersionStatus::Active)?;
        if next.version != expected_active + 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} next version must be {}",
                id,
                expected_active + 1
            )));
        }
        let txn = self.database.begin().await?;
        let key = Self::elastic_key_in(&txn, tenant_id, id).await?;
        if key_status(key.status) != ElasticKeyStatus::Active {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} is no longer Active",
                id
            )));
        }
        let latest = elastic_key_version::Entity::find()
            .filter(Self::versions_of(tenant_id, id))
            .order_by_desc(elastic_key_version::Column::Version)
            .one(&txn)
            .await?;
        if latest.map(|v| v.version) != Some(version_column(expected_active)?) {
            return Err(BarrierError::ConcurrentModification(format!(
                "elastic key {} active version moved past {}",
                id, expected_active
            )));
        }

        let now = Utc::now();
        let res = elastic_key_version::Entity::update_many()
            .col_expr(
                elastic_key_version::Column::Status,
                Expr::value(VersionStatusRow::Retired),
            )
            .col_expr(elastic_key_version::Column::RetiredAt, Expr::value(Some(now)))
            .filter(
                Self::versions_of(tenant_id, id)
                    .add(elastic_key_version::Column::Version.eq(version_column(expected_active)?))
                    .add(elastic_key_version::Column::Status.eq(VersionStatusRow::Active)),
            )
            .exec(&txn)
            .await?;
        if res.rows_affected != 1 {
            return Err(BarrierError::ConcurrentModification(format!(
                "version {} of {} is no longer active",
                expected_active, id
            )));
        }
        elastic_key_version::Entity::insert(version_row(next, status)?)
            .exec(&txn)
            .await?;
        elastic_key::Entity::update_many()
            .col_expr(elastic_key::Column::UpdatedAt, Expr::value(now))
            .filter(
                Condition::all()
                    .add(elastic_key::Column::Id.eq(id.to_string()))
                    .add(elastic_key::Column::TenantId.eq(tenant_id.to_string())),
            )
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn begin_destroy(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<(), BarrierError> {
        let txn = self.database.begin().await?;
        Self::elastic_key_in(&txn, tenant_id, id).await?;
        Self::swap_status(
            &txn,
            tenant_id,
            id,
            ElasticKeyStatus::Disabled,
            ElasticKeyStatus::PendingDestroy,
        )
        .await?;
        elastic_key_version::Entity::update_many()
            .col_expr(
                elastic_key_version::Column::Status,
                Expr::value(VersionStatusRow::Retired),
            )
            .col_expr(
                elastic_key_version::Column::RetiredAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(
                Self::versions_of(tenant_id, id)
                    .add(elastic_key_version::Column::Status.ne(VersionStatusRow::Retired)),
            )
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn shred(&self, tenant_id: TenantId, id: ElasticKeyId) -> Result<(), BarrierError> {
        let txn = self.database.begin().await?;
        Self::elastic_key_in(&txn, tenant_id, id).await?;
        Self::swap_status(
            &txn,
            tenant_id,
            id,
            ElasticKeyStatus::PendingDestroy,
            ElasticKeyStatus::Destroyed,
        )
        .await?;
        let res = elastic_key_version::Entity::update_many()
            .col_expr(
                elastic_key_version::Column::Envelope,
                Expr::value(Option::<Vec<u8>>::None),
            )
            .filter(Self::versions_of(tenant_id, id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        debug!("Cleared {} wrapped versions of {}", res.rows_affected, id);
        Ok(())
    }

    async fn get_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        version: u32,
    ) -> Result<Option<ElasticKeyVersion>, BarrierError> {
        elastic_key_version::Entity::find()
            .filter(
                Self::versions_of(tenant_id, id)
                    .add(elastic_key_version::Column::Version.eq(version_column(version)?)),
            )
            .one(&self.database)
            .await?
            .map(version_from_row)
            .transpose()
    }

    async fn get_active_version(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Option<ElasticKeyVersion>, BarrierError> {
        elastic_key_version::Entity::find()
            .filter(
                Self::versions_of(tenant_id, id)
                    .add(elastic_key_version::Column::Status.eq(VersionStatusRow::Active)),
            )
            .one(&self.database)
            .await?
            .map(version_from_row)
            .transpose()
    }

    async fn list_versions(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<Vec<ElasticKeyVersion>, BarrierError> {
        elastic_key_version::Entity::find()
            .filter(Self::versions_of(tenant_id, id))
            .order_by_asc(elastic_key_version::Column::Version)
            .all(&self.database)
            .await?
            .into_iter()
            .map(version_from_row)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, DbBackend, Statement};

    use strongroom_core::tokio;
    use strongroom_encryption::{KeyAlgorithm, SecretKey, WrapAlgorithm, KEY_LEN};
    use strongroom_migration::{Migrator, MigratorTrait};

    use crate::{BarrierConfig, BarrierService};

    async fn setup_store() -> SeaOrmStore {
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("Invalid database");
        Migrator::up(&database, None)
            .await
            .expect("Invalid migration");
        SeaOrmStore::new(database)
    }

    #[tokio::test]
    async fn test_barrier_over_sqlite() {
        let store = std::sync::Arc::new(setup_store().await);
        let service =
            BarrierService::new(BarrierConfig::default(), store.clone()).expect("Invalid service");
        let shares = service.initialize().await.expect("Invalid initialize");
        assert_eq!(
            service.initialize().await.map(|s| s.len()),
            Err(BarrierError::AlreadyInitialized)
        );
        for share in shares.iter().rev().take(3) {
            service
                .submit_encoded_share(&share.encode())
                .await
                .expect("Invalid share");
        }

        let tenant_id = TenantId::new();
        let key = service
            .generate(tenant_id, "ledger", "general ledger", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid generate");
        assert!(matches!(
            service
                .generate(tenant_id, "ledger", "", KeyAlgorithm::Aes256GcmSiv)
                .await,
            Err(BarrierError::AlreadyExists(_))
        ));
        let v1_ciphertext = service
            .encrypt(tenant_id, key.id, b"entry 1")
            .await
            .expect("Invalid encrypt");

        service
            .rotate_intermediate_key(tenant_id)
            .await
            .expect("Invalid rotate_intermediate_key");
        service.rotate(tenant_id, key.id).await.expect("Invalid rotate");
        // replaying the rotation from version 1 loses
        let replay = ElasticKeyVersion {
            status: VersionStatus::Generating,
            ..store
                .get_version(tenant_id, key.id, 2)
                .await
                .expect("Invalid get_version")
                .expect("Invalid version")
        };
        assert!(matches!(
            store.rotate_version(tenant_id, key.id, 1, &replay).await,
            Err(BarrierError::ConcurrentModification(_))
        ));

        let plaintext = service
            .decrypt(tenant_id, key.id, &v1_ciphertext)
            .await
            .expect("Invalid decrypt");
        assert_eq!(&plaintext[..], b"entry 1");

        let versions = store
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert_eq!(
            versions
                .iter()
                .map(|v| (v.version, v.status))
                .collect::<Vec<_>>(),
            vec![(1, VersionStatus::Retired), (2, VersionStatus::Active)]
        );
        assert_ne!(versions[0].intermediate_key_id, versions[1].intermediate_key_id);

        service.disable(tenant_id, key.id).await.expect("Invalid disable");
        assert_eq!(
            store
                .list_elastic_keys(tenant_id, Some(ElasticKeyStatus::Disabled))
                .await
                .expect("Invalid list_elastic_keys")
                .len(),
            1
        );
        service
            .schedule_destroy(tenant_id, key.id)
            .await
            .expect("Invalid schedule_destroy");
        service.destroy(tenant_id, key.id).await.expect("Invalid destroy");
        let versions = store
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert!(versions.iter().all(|v| v.envelope.is_none()));
        assert!(versions.iter().all(|v| v.status == VersionStatus::Retired));
    }

    #[tokio::test]
    async fn test_failed_rotation_rolls_back() {
        let store = setup_store().await;
        let database = store.database.clone();
        let store = std::sync::Arc::new(store);
        let service =
            BarrierService::new(BarrierConfig::default(), store.clone()).expect("Invalid service");
        let shares = service.initialize().await.expect("Invalid initialize");
        for share in shares.iter().take(3) {
            service
                .submit_encoded_share(&share.encode())
                .await
                .expect("Invalid share");
        }
        let tenant_id = TenantId::new();
        let key = service
            .generate(tenant_id, "flaky", "", KeyAlgorithm::Aes256GcmSiv)
            .await
            .expect("Invalid generate");
        let ciphertext = service
            .encrypt(tenant_id, key.id, b"before outage")
            .await
            .expect("Invalid encrypt");

        // the version insert fails after the retire update ran
        database
            .execute(Statement::from_string(
                DbBackend::Sqlite,
                "CREATE TRIGGER fail_version_insert BEFORE INSERT ON elastic_key_versions \
                 BEGIN SELECT RAISE(ABORT, 'store offline'); END;"
                    .to_owned(),
            ))
            .await
            .expect("Invalid trigger");
        let err = service
            .rotate(tenant_id, key.id)
            .await
            .map(|v| v.version)
            .expect_err("rotation should fail");
        assert!(matches!(err, BarrierError::StoreUnavailable(_)));
        assert!(err.is_retryable());

        let versions = store
            .list_versions(tenant_id, key.id)
            .await
            .expect("Invalid list_versions");
        assert_eq!(
            versions
                .iter()
                .map(|v| (v.version, v.status))
                .collect::<Vec<_>>(),
            vec![(1, VersionStatus::Active)]
        );
        assert_eq!(
            store
                .get_elastic_key(tenant_id, key.id)
                .await
                .expect("Invalid get_elastic_key")
                .map(|k| k.status),
            Some(ElasticKeyStatus::Active)
        );

        database
            .execute(Statement::from_string(
                DbBackend::Sqlite,
                "DROP TRIGGER fail_version_insert".to_owned(),
            ))
            .await
            .expect("Invalid drop trigger");
        let v2 = service.rotate(tenant_id, key.id).await.expect("Invalid rotate");
        assert_eq!(v2.version, 2);
        let plaintext = service
            .decrypt(tenant_id, key.id, &ciphertext)
            .await
            .expect("Invalid decrypt");
        assert_eq!(&plaintext[..], b"before outage");

        // another tenant cannot advance or touch the key
        let before = store
            .get_elastic_key(tenant_id, key.id)
            .await
            .expect("Invalid get_elastic_key")
            .expect("Invalid key");
        let foreign = ElasticKeyVersion {
            tenant_id: TenantId::new(),
            version: 3,
            status: VersionStatus::Generating,
            ..v2
        };
        assert!(store
            .rotate_version(foreign.tenant_id, key.id, 2, &foreign)
            .await
            .is_err());
        let after = store
            .get_elastic_key(tenant_id, key.id)
            .await
            .expect("Invalid get_elastic_key")
            .expect("Invalid key");
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let store = setup_store().await;
        let tenant_id = TenantId::new();
        let now = Utc::now();
        let key = ElasticKey {
            id: ElasticKeyId::new(),
            tenant_id,
            name: "cas".to_string(),
            description: String::new(),
            algorithm: KeyAlgorithm::HmacSha3_256,
            status: ElasticKeyStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        store.insert_elastic_key(&key).await.expect("Invalid insert");

        assert!(matches!(
            store
                .update_elastic_key_status(
                    tenant_id,
                    key.id,
                    ElasticKeyStatus::Active,
                    ElasticKeyStatus::Disabled
                )
                .await,
            Err(BarrierError::ConcurrentModification(_))
        ));
        assert!(matches!(
            store
                .update_elastic_key_status(
                    TenantId::new(),
                    key.id,
                    ElasticKeyStatus::Creating,
                    ElasticKeyStatus::Active
                )
                .await,
            Err(BarrierError::NotFound(_))
        ));
        let updated = store
            .update_elastic_key_description(tenant_id, key.id, "compare and set")
            .await
            .expect("Invalid update_elastic_key_description");
        assert_eq!(updated.description, "compare and set");
        assert_eq!(updated.algorithm, KeyAlgorithm::HmacSha3_256);
        assert_eq!(
            store
                .get_elastic_key(tenant_id, key.id)
                .await
                .expect("Invalid get_elastic_key")
                .map(|k| k.status),
            Some(ElasticKeyStatus::Creating)
        );
    }

    #[tokio::test]
    async fn test_intermediate_keys_are_tenant_scoped() {
        let store = setup_store().await;
        let root_key = SecretKey::generate(KEY_LEN);
        let sealed = SealedRootKey {
            threshold: 1,
            shares: 1,
            share_commitments: vec![],
            envelopes: vec![],
            fingerprint: strongroom_encryption::RootKeyCustodian::fingerprint_of(&root_key),
            created_at: Utc::now(),
        };
        store.save_root_key(&sealed).await.expect("Invalid save_root_key");
        assert_eq!(
            store.save_root_key(&sealed).await,
            Err(BarrierError::AlreadyInitialized)
        );
        let loaded = store
            .load_root_key()
            .await
            .expect("Invalid load_root_key")
            .expect("Invalid root key");
        assert_eq!(loaded.fingerprint, sealed.fingerprint);
        assert_eq!((loaded.threshold, loaded.shares), (1, 1));

        let tenant_id = TenantId::new();
        let envelope = strongroom_encryption::wrap_with(
            WrapAlgorithm::default(),
            &root_key,
            &[0u8; KEY_LEN],
            b"",
        )
        .expect("Invalid wrap_with");
        let first = IntermediateKey {
            id: IntermediateKeyId::new(),
            tenant_id,
            envelope: envelope.clone(),
            root_key_fingerprint: sealed.fingerprint.clone(),
            status: IntermediateKeyStatus::Active,
            created_at: Utc::now(),
            retired_at: None,
        };
        store
            .create_intermediate_key(&first)
            .await
            .expect("Invalid create_intermediate_key");
        let second = IntermediateKey {
            id: IntermediateKeyId::new(),
            ..first.clone()
        };
        assert!(matches!(
            store.create_intermediate_key(&second).await,
            Err(BarrierError::ConcurrentModification(_))
        ));
        store
            .rotate_intermediate_key(tenant_id, first.id, &second)
            .await
            .expect("Invalid rotate_intermediate_key");
        assert!(matches!(
            store.rotate_intermediate_key(tenant_id, first.id, &second).await,
            Err(BarrierError::ConcurrentModification(_))
        ));

        let active = store
            .list_active_intermediate_keys(tenant_id)
            .await
            .expect("Invalid list_active_intermediate_keys");
        assert_eq!(active.iter().map(|k| k.id).collect::<Vec<_>>(), vec![second.id]);
        let retired = store
            .list_retired_intermediate_keys(tenant_id)
            .await
            .expect("Invalid list_retired_intermediate_keys");
        assert_eq!(retired.len(), 1);
        assert!(retired[0].retired_at.is_some());
        assert_eq!(retired[0].envelope, envelope);

        assert_eq!(
            store
                .get_intermediate_key(TenantId::new(), first.id)
                .await
                .expect("Invalid get_intermediate_key"),
            None
        );
    }
}
