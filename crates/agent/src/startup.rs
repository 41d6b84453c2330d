use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::ovs::OvsBackend;
use adapters::watch::spawn_socket_watcher;
use application::datapath_manager::DatapathManager;
use application::ip_learning::IpLearningService;
use domain::ipcache::entity::IpCacheConfig;
use infrastructure::config::AgentConfig;
use infrastructure::constants::{
    IP_UPDATE_CHANNEL_CAPACITY, RECOVERY_CHANNEL_CAPACITY, SWITCH_EVENT_CHANNEL_CAPACITY,
};
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::shutdown::create_shutdown_token;

/// Run the agent startup sequence and block until shutdown.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    info!(
        config_path = %cli.config,
        node = %config.agent.node_name,
        vds_count = config.datapath.managed_vds.len(),
        "ovsentinel agent starting"
    );

    // ── 3. Metrics and shutdown plumbing ────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());
    let cancel = create_shutdown_token();

    // ── 4. Channels ─────────────────────────────────────────────────
    let (switch_event_tx, switch_event_rx) = mpsc::channel(SWITCH_EVENT_CHANNEL_CAPACITY);
    let (ip_update_tx, mut ip_update_rx) = mpsc::channel(IP_UPDATE_CHANNEL_CAPACITY);
    let (recovery_tx, recovery_rx) = mpsc::channel(RECOVERY_CHANNEL_CAPACITY);

    // ── 5. OVS backend and datapath manager ─────────────────────────
    let backend = OvsBackend::new(
        PathBuf::from(&config.datapath.ovs_run_dir),
        config.datapath.ovsdb_socket.clone(),
        switch_event_tx,
        cancel.clone(),
    );

    let ip_learning = Arc::new(IpLearningService::new(
        IpCacheConfig::default(),
        ip_update_tx,
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    ));

    let manager = Arc::new(DatapathManager::new(
        config.datapath_config(),
        &backend,
        Arc::clone(&ip_learning),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        cancel.clone(),
    )?);

    // ── 6. Background tasks ─────────────────────────────────────────
    tokio::spawn(Arc::clone(&ip_learning).sweep_loop(cancel.clone()));
    spawn_socket_watcher(
        PathBuf::from(&config.datapath.ovsdb_socket),
        recovery_tx,
        cancel.clone(),
    );

    // The management-plane sync consumer is wired by the surrounding
    // controller; until then learned addresses are only logged.
    let log_updates_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = log_updates_cancel.cancelled() => return,
                update = ip_update_rx.recv() => match update {
                    Some(update) => {
                        for (key, ip) in update {
                            tracing::debug!(%key, %ip, "endpoint address learned");
                        }
                    }
                    None => return,
                },
            }
        }
    });

    // ── 7. Initialise the datapath and run until shutdown ───────────
    manager.initialize().await?;
    info!("datapath initialised, entering event loop");

    let result = Arc::clone(&manager).run(switch_event_rx, recovery_rx).await;
    if let Err(ref err) = result {
        warn!(error = %err, "datapath manager exited with error");
    }

    info!("ovsentinel agent stopped");
    result.map_err(Into::into)
}
