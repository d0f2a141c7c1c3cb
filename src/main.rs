use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

use market_bridge::core::{InstrumentCode, OrderSpec, Side};
use market_bridge::sim::SimSession;
use market_bridge::{BridgeConfig, Wait};

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Initialize logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,market_bridge=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .init();

    tracing::info!("Market bridge starting against the simulated broker...");

    // 2. Wire the facade to a virtual market
    let config = BridgeConfig::load_default();
    let session = SimSession::start(&config)?;
    let market = session.market();
    let wait = Wait::forever();

    market.initialize(&wait)?;
    tracing::info!("Orderable cash: {}", market.get_deposit(&wait)?);

    // 3. Screen the universe with the first stored condition
    let conditions = market.get_condition_definitions(&wait)?;
    let mut watchlist = match conditions.first() {
        Some(condition) => {
            market.get_matching_instruments(&condition.name, condition.index, &wait)?
        }
        None => Vec::new(),
    };
    if watchlist.is_empty() {
        watchlist = config.sim.universe.iter().take(2).map(InstrumentCode::new).collect();
    }
    tracing::info!("Watching {} instrument(s): {:?}", watchlist.len(), watchlist);

    // 4. Stream, trade, report
    market.register_price_stream(&watchlist, true)?;
    market.register_quote_stream(&watchlist, true)?;

    for code in &watchlist {
        let price = market.get_price(code, &wait)?;
        let quote = market.get_quote(code, &wait)?;
        tracing::info!(
            "{} last={} bid={} ask={} ({:?})",
            code,
            price.entry.last,
            quote.entry.best_bid().price,
            quote.entry.best_ask().price,
            price.freshness
        );
    }

    if let Some(code) = watchlist.first() {
        let order_no = market.place_order(&OrderSpec::market(Side::Buy, code.clone(), 10), &wait)?;
        let record = market.get_order_status(&order_no, &Wait::timeout(Duration::from_secs(5)))?;
        tracing::info!("Order {} -> {:?}", order_no, record.status);
    }

    std::thread::sleep(config.market.poll_interval());
    println!("{}", serde_json::to_string_pretty(&market.account_state())?);

    session.shutdown();
    tracing::info!("Shut down");
    Ok(())
}
