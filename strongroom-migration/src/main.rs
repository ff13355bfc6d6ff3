use std::error::Error;

use clap::{Parser, Subcommand};
use env_logger::Env;
use sea_orm::Database;

use strongroom_core::{sea_orm, tokio};
use strongroom_migration::{Migrator, MigratorTrait};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        short = 'u',
        long,
        default_value_t = String::from("postgresql://root@localhost:26257/strongroom?sslmode=disable")
    )]
    db_url: String,
}

#[derive(Subcommand)]
enum Commands {
    Migrate {
        #[clap(short, long)]
        count: Option<u32>,
    },
    Rollback {
        #[clap(short, long)]
        count: Option<u32>,
    },
    Reapply {},
    Nuke {},
    List {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("strongroom=info,sea_orm_migration=info")).init();

    let cli = Cli::parse();
    let database = Database::connect(&cli.db_url).await?;

    match cli.command {
        Commands::Migrate { count } => {
            Migrator::up(&database, count).await?;
        }
        Commands::Rollback { count } => {
            Migrator::down(&database, count).await?;
        }
        Commands::Reapply {} => {
            Migrator::refresh(&database).await?;
        }
        Commands::Nuke {} => {
            Migrator::fresh(&database).await?;
        }
        Commands::List {} => {
            println!("{:?}", Migrator::status(&database).await);
        }
    }
    Ok(())
}
