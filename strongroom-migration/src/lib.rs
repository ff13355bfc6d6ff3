pub use sea_orm_migration::prelude::*;

mod m20260901_000001_create_root_keys_table;
mod m20260901_000002_create_intermediate_keys_table;
mod m20260901_000003_create_elastic_keys_table;
mod m20260901_000004_create_elastic_key_versions_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260901_000001_create_root_keys_table::Migration),
            Box::new(m20260901_000002_create_intermediate_keys_table::Migration),
            Box::new(m20260901_000003_create_elastic_keys_table::Migration),
            Box::new(m20260901_000004_create_elastic_key_versions_table::Migration),
        ]
    }
}
