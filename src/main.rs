use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokenkeeper::api;
use tokenkeeper::logger::*;
use tokenkeeper::server::*;
use tokenkeeper::settings::*;
use tokio::signal;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    logger.reload_from_config(&LogConfig::from(&project_settings.log))?;

    let address: std::net::SocketAddr = project_settings.http.address.parse()?;
    let tls = match (&project_settings.http.cert_path, &project_settings.http.key_path) {
        (Some(cert_path), Some(key_path)) => {
            for path in [cert_path, key_path] {
                if !fs::metadata(path)?.is_file() {
                    return Err(anyhow::anyhow!("TLS file is not a regular file: {:?}", path));
                }
            }
            Some((cert_path.clone(), key_path.clone()))
        }
        _ => None,
    };

    let server = Arc::new(Server::try_new(&project_settings).await?);
    let app = api::v1::app(server.clone());

    // The signal fires once; the server future then drains in-flight requests.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let shutdown = async move {
        let _ = stop_rx.await;
    };
    let serving = match tls {
        Some((cert_path, key_path)) => {
            let (bound, fut) = warp::serve(app)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .bind_with_graceful_shutdown(address, shutdown);
            info!(%bound, "listening (tls)");
            tokio::spawn(fut)
        }
        None => {
            let (bound, fut) = warp::serve(app).try_bind_with_graceful_shutdown(address, shutdown)?;
            info!(%bound, "listening");
            tokio::spawn(fut)
        }
    };

    if let Err(e) = signal::ctrl_c().await {
        error!("could not listen for SIGINT: {e}");
    }
    info!("shutdown signal received");
    let _ = stop_tx.send(());

    let drain_timeout = Duration::from_secs(project_settings.http.drain_secs);
    match tokio::time::timeout(drain_timeout, serving).await {
        Ok(_) => info!("in-flight requests drained"),
        Err(_) => warn!("drain timed out, abandoning in-flight requests"),
    }

    server.shutdown().await;
    info!("server shutdown successfully");

    Ok(())
}
