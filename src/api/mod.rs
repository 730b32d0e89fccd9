//! Serve the underwriter admin/ops API.

use {
    crate::domain::eth::ChainId,
    std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc},
    tokio::sync::{oneshot, watch},
};

mod routes;

/// The per-chain enable/disable control channels, shared with the workers.
#[derive(Clone)]
pub struct Controls(pub Arc<HashMap<ChainId, watch::Sender<bool>>>);

#[derive(Clone)]
pub struct AppState {
    pub controls: Controls,
    pub registry: Arc<prometheus::Registry>,
}

pub struct Api {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl Api {
    pub async fn serve(
        self,
        bind: Option<oneshot::Sender<SocketAddr>>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), hyper::Error> {
        let app = axum::Router::new()
            .route("/metrics", axum::routing::get(routes::metrics))
            .route("/healthz", axum::routing::get(routes::healthz))
            .route(
                "/enableUnderwriting",
                axum::routing::post(routes::enable_underwriting),
            )
            .route(
                "/disableUnderwriting",
                axum::routing::post(routes::disable_underwriting),
            )
            .layer(
                tower::ServiceBuilder::new().layer(tower_http::trace::TraceLayer::new_for_http()),
            )
            .with_state(self.state);

        let server = axum::Server::bind(&self.addr).serve(app.into_make_service());
        if let Some(bind) = bind {
            let _ = bind.send(server.local_addr());
        }

        server.with_graceful_shutdown(shutdown).await
    }
}
