//! Process wiring: configuration, per-chain workers, admin API, shutdown.

use {
    crate::{
        api::{Api, AppState, Controls},
        domain::{listener::Listener, underwriter::UnderwriterWorker},
        infra::{
            blockchain::Rpc,
            cli,
            config::{self, Config},
            metrics::Metrics,
            monitor::Monitor,
            relayer::RelayerClient,
            store::{redis::RedisBackend, Backend, MemoryBackend, Store},
            wallet::NodeWallet,
        },
    },
    clap::Parser,
    std::{collections::HashMap, sync::Arc},
    tokio::sync::watch,
    tracing::Instrument,
};

pub async fn run() {
    let args = cli::Args::parse();
    init_tracing(&args.log);
    let config = config::load(&args.config).await;
    start(config).await;
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(filter)
        .unwrap_or_else(|err| panic!("invalid log filter {filter:?}: {err}"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn start(config: Config) {
    let backend: Arc<dyn Backend> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisBackend::connect(url)
                .await
                .unwrap_or_else(|err| panic!("failed to connect to the store: {err}")),
        ),
        None => {
            tracing::warn!("no redis-url configured; state is kept in process memory");
            MemoryBackend::new()
        }
    };
    let store = Store::new(backend);
    let relayer = RelayerClient::new(
        config.relayer.ws_url.clone(),
        config.relayer.http_url.clone(),
    );
    let registry = Arc::new(prometheus::Registry::new());
    let metrics = Metrics::create(&registry);

    let mut controls = HashMap::new();
    for chain in config.chains {
        let chain = Arc::new(chain);
        let chain_id = chain.chain_id.clone();

        let rpc = Rpc::new(&chain.rpc)
            .unwrap_or_else(|err| panic!("chain {chain_id}: invalid rpc url: {err}"));
        let monitor_rpc = match &chain.resolver {
            Some(resolver) => Rpc::new(resolver)
                .unwrap_or_else(|err| panic!("chain {chain_id}: invalid resolver url: {err}")),
            None => rpc.clone(),
        };
        let monitor = Monitor::spawn(
            monitor_rpc,
            chain.processing_interval,
            chain.retry_interval,
        )
        .await;
        tracing::info!(
            chain = %chain_id,
            head = monitor.current().number,
            "chain monitor started"
        );

        let wallet = Arc::new(NodeWallet::spawn(
            rpc.clone(),
            config.wallet.account,
            config.wallet.receipt_poll_interval,
        ));

        let (enable_tx, enable_rx) = watch::channel(true);
        controls.insert(chain_id.clone(), enable_tx);

        let listener = Listener::new(
            Arc::clone(&chain),
            rpc.clone(),
            store.clone(),
            relayer.clone(),
            monitor,
            Arc::clone(&metrics),
        );
        tokio::spawn(
            listener
                .run()
                .instrument(tracing::info_span!("listener", chain = %chain_id)),
        );

        let worker = UnderwriterWorker::new(
            Arc::clone(&chain),
            store.clone(),
            rpc,
            wallet,
            &config.wallet,
            relayer.clone(),
            config.ambs.clone(),
            enable_rx,
            Arc::clone(&metrics),
        );
        tokio::spawn(
            worker
                .run()
                .instrument(tracing::info_span!("underwriter", chain = %chain_id)),
        );
    }

    let api = Api {
        addr: config.api_addr,
        state: AppState {
            controls: Controls(Arc::new(controls)),
            registry,
        },
    };
    tracing::info!(addr = %config.api_addr, "serving the admin api");
    if let Err(err) = api.serve(None, shutdown_signal()).await {
        tracing::error!(?err, "the admin api server failed");
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to install the SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("received SIGINT; shutting down"),
        _ = terminate => tracing::info!("received SIGTERM; shutting down"),
    }
}
