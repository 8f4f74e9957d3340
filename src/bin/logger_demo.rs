use tokenkeeper::logger::*;
use tokenkeeper::metrics::*;

fn main() -> anyhow::Result<()> {
    let logger = Logger::new_bootstrap();
    debug!("bootstrap debug log, hidden");
    info!("bootstrap info log");

    let metrics = TracingMetrics;
    metrics.incr(Metric::LoginSucceeded);

    let config = LogConfig {
        filter: "info,metrics=debug".to_string(),
    };
    logger.reload_from_config(&config)?;
    debug!("application debug log, still hidden");
    metrics.incr(Metric::LoginSucceeded);

    Ok(())
}
