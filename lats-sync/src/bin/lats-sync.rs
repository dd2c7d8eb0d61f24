//! LATS Sync command-line entry point
//!
//! Loads the TOML config, connects the data layer to the hosted store, and
//! runs one of:
//!
//! - `customers`     fetch every customer and print a summary
//! - `customer <id>` fetch one customer as JSON
//! - `watch`         follow the customers realtime channel until Ctrl-C

use lats_core::{ConfigError, LatsConfig, LatsResult};
use lats_sync::telemetry::{init_tracing, TelemetryConfig};
use lats_sync::DataLayer;
use uuid::Uuid;

const USAGE: &str = "usage: lats-sync --config <path> <customers | customer <id> | watch>";

#[tokio::main]
async fn main() -> LatsResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let command = command_args();
    let config = LatsConfig::load()?;
    let (layer, _connectivity) = DataLayer::connect(config)?;

    let result = match command.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["customers"] => list_customers(&layer).await,
        ["customer", id] => show_customer(&layer, id).await,
        ["watch"] => watch(&layer).await,
        _ => {
            eprintln!("{USAGE}");
            Err(ConfigError::InvalidValue {
                field: "command",
                reason: format!("unrecognised arguments: {:?}", command),
            }
            .into())
        }
    };

    layer.shutdown().await;
    result
}

async fn list_customers(layer: &DataLayer) -> LatsResult<()> {
    let customers = layer.customers().fetch_all_customers().await?;
    println!("{} customers", customers.len());
    for customer in customers.iter().take(20) {
        println!(
            "{}  {:<32}  {:<10}  {}",
            customer.id,
            customer.name,
            customer.color_tag.as_str(),
            customer.phone.as_deref().unwrap_or("-")
        );
    }
    if customers.len() > 20 {
        println!("... and {} more", customers.len() - 20);
    }
    Ok(())
}

async fn show_customer(layer: &DataLayer, id: &str) -> LatsResult<()> {
    let id = Uuid::parse_str(id).map_err(|e| ConfigError::InvalidValue {
        field: "id",
        reason: e.to_string(),
    })?;
    match layer.customers().fetch_customer_by_id(id).await? {
        Some(customer) => {
            let json = serde_json::to_string_pretty(&customer).map_err(|e| ConfigError::InvalidValue {
                field: "customer",
                reason: e.to_string(),
            })?;
            println!("{json}");
        }
        None => println!("No customer with id {id}"),
    }
    Ok(())
}

async fn watch(layer: &DataLayer) -> LatsResult<()> {
    let feed = layer.watch_customers().await;
    let mut updates = feed.subscribe();
    tracing::info!(customers = feed.customers().len(), "Watching customers, Ctrl-C to stop");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if state.loading {
                    continue;
                }
                match &state.error {
                    Some(err) => tracing::warn!(error = %err, "Customer refresh failed"),
                    None => tracing::info!(
                        customers = state.customers.len(),
                        live_updates_paused = state.live_updates_paused,
                        "Customer list updated"
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    feed.close();
    Ok(())
}

/// Positional arguments with `--config <path>` removed.
fn command_args() -> Vec<String> {
    let mut args = std::env::args().skip(1);
    let mut command = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
            continue;
        }
        command.push(arg);
    }
    command
}
