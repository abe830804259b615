// Demo server: loads its configuration, installs logging and serves a few routes.
//
// Usage: hserver [config.toml]   (or set HSERVER_CONFIG)

use hserver::config::ENV_CONFIG;
use hserver::logging::{error, info};
use hserver::prelude::*;
use serde_json::json;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG).ok())
        .map(PathBuf::from);
    let config = ServerConfig::load(path.as_deref())?;
    let _guard = config.log.to_log_config().init()?;

    let mut server = Server::new();

    server.add_route("/", sync_handler(|_| Ok(Some(json!({ "name": "hserver" })))))?;

    server.add_route_with(
        "/echo",
        sync_handler(|call: Call| Ok(Some(call.context.to_value()))),
        RouteOptions::new().verbs(["GET", "POST"]),
    )?;

    server.add_route_with(
        "/hello/name:.+",
        sync_handler(|call: Call| {
            let name = call.context.params().first("name").unwrap_or("world").to_string();
            Ok(Some(json!(format!("hello, {name}"))))
        }),
        RouteOptions::new().verb("GET"),
    )?;

    server.add_route_with(
        "/",
        sync_handler(|call: Call| {
            info!(
                method = %call.context.get_str("method").unwrap_or_default(),
                pathname = %call.context.get_str("pathname").unwrap_or_default(),
                error = ?call.error,
                "Request finished"
            );
            Ok(None)
        }),
        RouteOptions::new().stage("leave"),
    )?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Cannot listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        }
    };

    server
        .listen_with_shutdown(config.bind_address(), shutdown)
        .await?;
    Ok(())
}
