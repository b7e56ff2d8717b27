use studio_backend::app::Studio;
use studio_backend::config::Config;
use studio_backend::observability::Logger;
use serde_json::json;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 1. Load Config (.env first, real environment wins)
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 2. Initialize Logger
    let logger = Logger::new(config.instance_id.clone());
    logger.info("Studio backend starting up", Some(&json!({
        "bind_addr": config.bind_addr,
        "upload_dir": config.upload_dir.display().to_string(),
        "events": config.nats_url.is_some()
    })));

    // 3. Start pipeline and shared state
    let studio = Studio::start(&config, logger.clone()).await?;

    // 4. Serve HTTP until Ctrl-C
    let listener = TcpListener::bind(&config.bind_addr).await?;
    logger.info(&format!("Backend listening on http://{}", listener.local_addr()?), None);

    let shutdown_logger = logger.clone();
    axum::serve(listener, studio.router())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_logger.info("Shutdown requested", None);
        })
        .await?;

    // 5. Drain the pipeline
    studio.shutdown().await;
    logger.info("Studio backend shutdown", None);

    Ok(())
}
