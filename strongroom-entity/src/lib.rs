pub mod algorithm;
pub mod elastic_key;
pub mod elastic_key_version;
pub mod intermediate_key;
pub mod root_key;
pub mod status;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use strongroom_core::{anyhow, sea_orm};

pub async fn database_connection_pool(
    url: &str,
    max_connections: u32,
) -> anyhow::Result<DatabaseConnection> {
    let mut opts = ConnectOptions::from(url);
    opts.max_connections(max_connections);
    Ok(Database::connect(opts).await?)
}
