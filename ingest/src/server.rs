use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::router::{self, RouterOptions};
use crate::sinks::PrintSink;
use crate::stats::MetricSink;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics = Arc::new(MetricSink::new());
    let app = router::router(
        PrintSink {},
        metrics,
        RouterOptions {
            body_encoding: config.body_encoding,
            advertise_gzip: config.advertise_gzip,
            export_prometheus: config.export_prometheus,
        },
    )?;

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
