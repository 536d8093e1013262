use std::sync::Arc;

use receipt_prices::clock::SystemClock;
use receipt_prices::config::Config;
use receipt_prices::{
    PriceTracker, ReceiptPipeline, ReceiptStore, ShoppingListItem, ShoppingOptimizer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "receipt_prices.toml";

const USAGE: &str = "usage:
  receipt-prices ingest <file>...
  receipt-prices trend <product_id> [days]
  receipt-prices optimize <product_id:qty>...
  receipt-prices stats";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .init();

    let config_path =
        std::env::var("RECEIPT_PRICES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = Config::load_or_default(&config_path)?;
    let db = Arc::new(ReceiptStore::new(&cfg.db_path)?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("ingest") if args.len() > 1 => {
            let pipeline = ReceiptPipeline::from_config(&cfg, db.clone()).await?;
            for path in &args[1..] {
                let text = std::fs::read_to_string(path)?;
                let processed = pipeline.process_text(&text).await?;
                info!(
                    file = %path,
                    uid = %processed.uid,
                    status = processed.status.as_str(),
                    "Ingested"
                );
                println!("{}", serde_json::to_string_pretty(&processed)?);
            }
        }
        Some("trend") if args.len() > 1 => {
            let product_id: i64 = args[1].parse()?;
            let days = match args.get(2) {
                Some(d) => d.parse()?,
                None => cfg.optimizer.window_days,
            };
            let tracker = PriceTracker::new(db.clone(), Arc::new(SystemClock));
            let trend = tracker.trend(product_id, days)?;
            let last = tracker.last_price(product_id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "product_id": product_id,
                    "window_days": days,
                    "last_price": last,
                    "trend": trend,
                }))?
            );
        }
        Some("optimize") if args.len() > 1 => {
            let items = args[1..]
                .iter()
                .map(|a| parse_list_item(a))
                .collect::<Result<Vec<_>, _>>()?;
            let window = cfg.optimizer.window_days;
            let optimizer = ShoppingOptimizer::new(db.clone(), Arc::new(SystemClock), window);
            let single = optimizer.single_store(&items);
            let multi = optimizer.multi_store(&items);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "single_store": single,
                    "multi_store": multi,
                }))?
            );
        }
        Some("stats") => {}
        _ => {
            eprintln!("{USAGE}");
            return Err("missing or unknown command".into());
        }
    }

    // Print statistics
    let counts = db.get_counts()?;
    info!(
        products = counts.products,
        stores = counts.stores,
        observations = counts.observations,
        receipts = counts.receipts,
        "Database statistics"
    );

    Ok(())
}

/// "12:1.5" → product 12, quantity 1.5. A bare id means quantity 1.
fn parse_list_item(arg: &str) -> Result<ShoppingListItem, Box<dyn std::error::Error>> {
    let (id, qty) = arg.split_once(':').unwrap_or((arg, "1"));
    Ok(ShoppingListItem {
        product_id: id.trim().parse()?,
        quantity: qty.trim().parse()?,
    })
}
