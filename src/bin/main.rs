use clap::Parser;
use finagent_orchestrator::{
    agent::Orchestrator,
    config::AgentConfig,
    memory::ContextStore,
    models::ResponseStatus,
    services::{HttpGateway, HttpMarketData, HttpSearch, InMemoryLedger, StaticMarketData, StaticSearch},
    services::{MarketDataProvider, SearchProvider},
    tools::{create_default_registry, finance::FinanceServices},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Interactive finance assistant
#[derive(Parser, Debug)]
#[command(name = "finagent", version, about)]
struct Cli {
    /// Session id every query is attributed to
    #[arg(long, env = "FINAGENT_SESSION", default_value = "demo_user")]
    session: String,

    /// Print the full response envelope as JSON
    #[arg(long)]
    json: bool,
}

const MARKET_API_KEYS: &[&str] = &["FINAGENT_MARKET_API_URL"];
const SEARCH_API_KEYS: &[&str] = &["FINAGENT_SEARCH_API_URL"];

/// Calls allowed per step against the rate-limited market gateway
const MARKET_ATTEMPT_CAP: u32 = 2;

fn build_services(config: &AgentConfig) -> FinanceServices {
    let market: Arc<dyn MarketDataProvider> =
        match HttpGateway::from_env(MARKET_API_KEYS, config.default_tool_timeout) {
            Some(gateway) => {
                info!("Using HTTP market-data gateway");
                Arc::new(HttpMarketData::new(gateway, MARKET_ATTEMPT_CAP))
            }
            None => {
                info!("FINAGENT_MARKET_API_URL not set, using static demo market data");
                Arc::new(StaticMarketData::demo())
            }
        };

    let search: Arc<dyn SearchProvider> =
        match HttpGateway::from_env(SEARCH_API_KEYS, config.default_tool_timeout) {
            Some(gateway) => {
                info!("Using HTTP search gateway");
                Arc::new(HttpSearch::new(gateway))
            }
            None => {
                info!("FINAGENT_SEARCH_API_URL not set, using static demo search");
                Arc::new(StaticSearch::demo())
            }
        };

    FinanceServices {
        ledger: Arc::new(InMemoryLedger::new()),
        market,
        search,
        currency: config.currency_symbol.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::from_env()?;

    info!(
        session = %cli.session,
        retry_budget = config.retry_budget,
        history_window = config.history_window,
        "Finance agent starting"
    );

    let registry = Arc::new(create_default_registry(build_services(&config))?);
    let contexts = Arc::new(ContextStore::from_config(&config));
    let janitor = Arc::clone(&contexts).spawn_janitor(Duration::from_secs(60));

    let orchestrator = Orchestrator::new(Arc::clone(&registry), contexts, config);
    info!(tools = ?registry.names(), "Orchestrator initialized");

    println!("Finance assistant ready. Type 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        // Ctrl-C abandons the in-flight query, not the whole session.
        let cancel = CancellationToken::new();
        let turn = orchestrator.handle_with_cancel(text, &cli.session, &cancel);
        tokio::pin!(turn);
        let envelope = tokio::select! {
            envelope = &mut turn => envelope,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        } else {
            let prefix = match envelope.status {
                ResponseStatus::Ok => "",
                ResponseStatus::Partial => "[partial] ",
                ResponseStatus::Error => "[error] ",
            };
            println!("{}{}", prefix, envelope.payload.text);
        }
    }

    janitor.abort();
    info!("Finance agent stopped");
    Ok(())
}
