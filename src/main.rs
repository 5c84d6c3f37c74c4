use coldef::{app_state, config::Config, open_catalog, router};
use log::{error, info};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let catalog = open_catalog(&config).await?;
    let app = router(app_state(&config, catalog));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", listener.local_addr()?);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
        }
        info!("shutting down");
    });
    server.await?;

    Ok(())
}
