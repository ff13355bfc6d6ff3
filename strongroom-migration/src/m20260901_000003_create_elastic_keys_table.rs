use sea_orm::Schema;
use sea_orm_migration::prelude::*;

use strongroom_core::sea_orm;
use strongroom_entity::elastic_key::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20260901_000003_create_elastic_keys_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(Entity))
            .await?;
        for create_index in schema.create_index_from_entity(Entity) {
            manager.create_index(create_index).await?;
        }
        // names are unique per tenant
        manager
            .create_index(
                Index::create()
                    .name("idx-elastic_keys-tenant_id-name")
                    .table(Entity)
                    .col(Column::TenantId)
                    .col(Column::Name)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entity).to_owned())
            .await
    }
}
