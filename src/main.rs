use std::sync::Arc;

use secrecy::ExposeSecret;

use agent_dispatch::agent::{AgentRunner, AnthropicAgent};
use agent_dispatch::config::Config;
use agent_dispatch::credentials::{CredentialSync, KvStore, RestKvStore};
use agent_dispatch::dispatcher::Dispatcher;
use agent_dispatch::health;
use agent_dispatch::scheduler::AgentScheduler;
use agent_dispatch::slack::{self, SlackClient};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _health = health::spawn_health_server(config.health_port);

    let store: Option<Arc<dyn KvStore>> = config
        .credential_store
        .clone()
        .map(|c| Arc::new(RestKvStore::new(c.url, c.token)) as Arc<dyn KvStore>);
    let credentials = Arc::new(CredentialSync::new(store));
    credentials
        .load_or_seed(config.anthropic_api_key.expose_secret())
        .await;

    let slack_client = Arc::new(SlackClient::new(
        config.slack_bot_token.clone(),
        config.slack_app_token.clone(),
    ));
    let agent: Arc<dyn AgentRunner> = Arc::new(AnthropicAgent::new(
        config.anthropic_api_key.clone(),
        config.model.clone(),
        config.dry_run,
    ));
    let scheduler = AgentScheduler::new(config.max_concurrent_agents, config.max_queue_size);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&slack_client),
        agent,
        scheduler,
        credentials,
        config.log_channel_id.clone(),
    ));

    tracing::info!(
        model = %config.model,
        max_concurrent = config.max_concurrent_agents,
        max_queue = config.max_queue_size,
        dry_run = config.dry_run,
        "agent-dispatch starting"
    );

    slack::run_socket_mode(slack_client, dispatcher).await;
}
