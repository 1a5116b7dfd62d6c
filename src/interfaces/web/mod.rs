pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::agent::{AgentDispatchFacade, AgentRegistry};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::security::SecurityGate;
use crate::core::webhook::WebhookIngress;

/// Handles shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) gate: Arc<SecurityGate>,
    pub(crate) ingress: Arc<WebhookIngress>,
    pub(crate) facade: Arc<AgentDispatchFacade>,
    pub(crate) started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        gate: Arc<SecurityGate>,
        ingress: Arc<WebhookIngress>,
        facade: Arc<AgentDispatchFacade>,
    ) -> Self {
        Self {
            gate,
            ingress,
            facade,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<AgentRegistry> {
        self.facade.registry()
    }
}

/// HTTP front door. Binds on start so a taken port fails startup instead of a background task.
pub struct ApiServer {
    state: AppState,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self {
            state,
            bind_addr,
            local_addr: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("cannot bind {}", self.bind_addr))?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);

        let app = router::build_api_router(self.state.clone());
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(cancel.cancelled_owned());
            if let Err(e) = serve.await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}
