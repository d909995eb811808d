use std::sync::Arc;

use fleet::config::ControllerConfig;
use fleet::content::{purge, ContentStore};
use fleet::controllers::{start_controllers, ControllerContext};
use fleet::election::LeaderElector;
use fleet::error::format_error_chain;
use fleet::scheduler::RateLimiter;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> std::io::Result<()> {
    fleet::init_logging("fleetcontroller");

    let config = ControllerConfig::from_env().expect("invalid controller configuration");

    let client = kube::Client::try_default()
        .await
        .expect("failed to initialize Kubernetes client");

    // Exactly one replica per shard drives work; the rest camp on the
    // lease.
    let identity = format!(
        "fleetcontroller-{}",
        std::process::id()
    );
    let elector = LeaderElector::new(
        client.clone(),
        &config.namespace,
        &config.shard_id,
        &identity,
        config.election.clone(),
    );
    elector.campaign().await.expect("leader election failed");

    let store = ContentStore::new(client.clone());
    let ctx = Arc::new(ControllerContext {
        client,
        store: store.clone(),
        limiter: Arc::new(RateLimiter::default()),
        config: config.clone(),
    });

    // Shutdown: SIGTERM (or ctrl-c) flips the watch; controllers finish
    // the current reconcile, close watches and drain.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        log::info!("shutdown signal received, draining controllers");
        let _ = shutdown_tx.send(true);
    });

    let purge_store = store.clone();
    let purge_interval = config.content_purge_interval;
    tokio::spawn(async move {
        purge::purge_loop(purge_store, purge_interval).await;
    });

    tokio::select! {
        _ = start_controllers(ctx, shutdown_rx) => {
            log::info!("controllers drained, exiting");
        }
        result = elector.keep_renewing() => {
            if let Err(e) = result {
                log::error!("{}", format_error_chain(&e));
                // Losing the lease means another replica is (or will be)
                // driving; exit and let the orchestrator restart us.
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[allow(clippy::expect_used)]
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
