use anyhow::{Context, Result};
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use crate::core::agent::{
    AgentDispatchFacade, AgentRegistry, FileOrganizationAgent, schedule_workflow_triggers,
};
use crate::core::config::GatewayConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::n8n::{N8nClient, N8nNotifier};
use crate::core::security::SecurityGate;
use crate::core::terminal::{self, GuideSection};
use crate::core::webhook::{HandlerTable, WebhookDispatcher, WebhookIngress};
use crate::interfaces::web::{ApiServer, AppState};

pub const FILE_AGENT: &str = "file_organization";

/// Builds every component from `config`, runs until Ctrl+C, then shuts down in reverse order.
pub async fn run_gateway(config: GatewayConfig) -> Result<()> {
    let gate = Arc::new(SecurityGate::new(&config.security));

    let (ingress, queue) = WebhookIngress::new(config.webhooks.max_history);
    let dispatcher = WebhookDispatcher::new(
        ingress.clone(),
        queue,
        HandlerTable::default(),
        Duration::from_millis(config.webhooks.dispatch_pause_ms),
    );

    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(
            FILE_AGENT,
            Arc::new(FileOrganizationAgent::new(
                &config.agents.documents_dir,
                &config.agents.reports_dir,
            )),
        )
        .await;
    for (trigger_name, trigger_config) in FileOrganizationAgent::default_triggers() {
        registry
            .add_workflow_trigger(FILE_AGENT, trigger_name, trigger_config)
            .await?;
    }

    let mut manager = LifecycleManager::new().await?;
    manager.attach(Arc::new(Mutex::new(dispatcher)));

    let mut facade = AgentDispatchFacade::new(registry, config.agents.max_history);
    if config.n8n.enabled {
        let client = N8nClient::new(&config.n8n).context("building N8N client")?;
        let (tx, rx) = mpsc::unbounded_channel();
        facade = facade.with_status_events(tx);
        manager.attach(Arc::new(Mutex::new(N8nNotifier::new(client, rx))));
    }
    let facade = Arc::new(facade);

    if config.agents.scheduled_triggers {
        let scheduled = schedule_workflow_triggers(&manager.scheduler, facade.clone()).await?;
        info!("{} scheduled workflow trigger(s) registered", scheduled);
    }

    let server = Arc::new(Mutex::new(ApiServer::new(
        AppState::new(gate, ingress, facade),
        config.bind_addr(),
    )));
    manager.attach(server.clone());

    if let Err(e) = manager.start().await {
        manager.shutdown().await?;
        return Err(e);
    }
    info!("Gateway ready ({:?})", manager.state());

    let address = server
        .lock()
        .await
        .local_addr()
        .map(|addr| format!("http://{}", addr))
        .unwrap_or_else(|| format!("http://{}", config.bind_addr()));

    let mut section = GuideSection::new("Gateway Running")
        .status("API Endpoint", &format!("{}", style(&address).underlined().cyan()))
        .status("API Keys", &config.security.api_keys.len().to_string())
        .status(
            "N8N Notifications",
            if config.n8n.enabled {
                config.n8n.webhook_url.as_str()
            } else {
                "disabled"
            },
        );
    if config.security.api_keys.is_empty() {
        section = section.warn(&format!(
            "No API keys configured. Run {} and add the key to your config.",
            style("alchemy-gateway keygen").cyan().bold()
        ));
    }
    section
        .blank()
        .text(&format!(
            "Press {} to stop the gateway.",
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    manager.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}
