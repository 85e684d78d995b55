use tracing::info;

use courier_server::{config::Config, db, worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    courier_server::init_tracing();

    info!("Starting Courier worker");

    let config = Config::from_env();
    let pool = db::init_db_default().await?;
    info!("Database initialized");

    worker::run(pool, config).await
}
