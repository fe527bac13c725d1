use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::Router;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::headers::REQUEST_ID_HEADER;
use crate::routes::transfer_router;
use crate::TransferState;

/// The HTTP application: transfer routes plus tracing and request-id layers.
#[derive(Clone)]
pub struct DriveApp {
    pub state: TransferState,
    pub router: Router<()>,
}

impl DriveApp {
    pub fn new(state: TransferState) -> Self {
        let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
        let body_limit = usize::try_from(state.adapter.config().max_file_bytes).unwrap_or(usize::MAX);

        let router = transfer_router(state.clone())
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(request_id)),
            );

        Self { state, router }
    }

    /// Serve until the state's shutdown token fires
    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "drive listening");
        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

pub fn drive(state: TransferState) -> DriveApp {
    DriveApp::new(state)
}
