use anyhow::Context;
use clap::Parser;
use eventrouter::{config::Config, server, sinks, EventMetrics, EventRouter, Informer};
use k8s_openapi::api::core::v1::Event;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eventrouter::init_tracing("info");
    let config = Config::parse();
    info!(?config, "starting eventrouter");

    let client = Client::try_default().await.context("failed to load kube config")?;
    let events: Api<Event> = match &config.namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let registry = Registry::new();
    let metrics = if config.enable_metrics {
        EventMetrics::new(&registry)?
    } else {
        EventMetrics::disabled()
    };
    let sink = sinks::manufacture_sink(&config.sink)?;

    let informer = Informer::new();
    let router = EventRouter::new(informer.clone(), sink, metrics);
    let shutdown = CancellationToken::new();

    let watch = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let stream = watcher(events, watcher::Config::default()).default_backoff();
            informer.run_until(stream, &shutdown).await
        }
    });

    if config.enable_metrics {
        let addr = config.metrics_addr;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = server::serve(addr, registry, shutdown).await {
                error!(error = %err, "metrics server stopped");
            }
        });
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        }
    });

    router.run(shutdown).await?;
    if !watch.await? {
        anyhow::bail!("event watch ended, exiting so that the pod is restarted");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
