use std::{path::PathBuf, sync::Arc};

use futures::{StreamExt, channel::mpsc::UnboundedReceiver};

use wsrx_monitor::{
    app::MonitorApp,
    configuration::MonitorConfiguration,
    daemon_api::ControlApi,
    keyed_list::{Field, ListEvent},
    probe::{HttpProber, Prober},
};

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("wsrx_monitor=info"),
    )
    .init();

    log::info!(
        "wsrx-monitor v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<default: info>".into()),
    );

    let configuration_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(MonitorConfiguration::default_path);
    let configuration = MonitorConfiguration::load(&configuration_path);
    log::info!(
        "[startup] control api port {}, probing every {}ms (timeout {}ms, threshold {})",
        configuration.api_port,
        configuration.probe_interval_ms,
        configuration.probe_timeout_ms,
        configuration.failure_threshold,
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            log::error!("[startup] failed to start event loop: {error}");
            std::process::exit(1);
        }
    };
    runtime.block_on(run(configuration));
}

async fn run(configuration: MonitorConfiguration) {
    let api = match ControlApi::new(
        configuration.api_port,
        configuration.api_secret.clone(),
        configuration.probe_timeout(),
    ) {
        Ok(api) => api,
        Err(error) => {
            log::error!("[startup] failed to create control api client: {error}");
            return;
        }
    };
    let prober: Arc<dyn Prober> = match HttpProber::new(configuration.probe_timeout()) {
        Ok(prober) => Arc::new(prober),
        Err(error) => {
            log::error!("[startup] failed to create probe client: {error}");
            return;
        }
    };

    let (mut app, completions) = MonitorApp::new(configuration, api, prober);
    log_changes("active", app.subscribe_active());
    log_changes("history", app.subscribe_history());
    log_changes("links", app.subscribe_links());
    log_changes("access", app.subscribe_websites());

    app.run(completions).await;
}

fn log_changes<F>(tag: &'static str, mut events: UnboundedReceiver<ListEvent<F>>)
where
    F: Field + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                ListEvent::Inserted { first, last } => {
                    log::debug!("[{tag}] rows {first}..={last} inserted")
                }
                ListEvent::Removed { first, last } => {
                    log::debug!("[{tag}] rows {first}..={last} removed")
                }
                ListEvent::Updated { index, field } => {
                    log::debug!("[{tag}] row {index}: {} changed", field.name())
                }
            }
        }
    });
}
