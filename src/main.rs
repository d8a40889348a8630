use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing_subscriber::{EnvFilter, fmt};

use coinlib::core::{OrderId, Pair};
use coinlib::{Config, ExchangeConfig};

const USAGE: &str = "usage: coinlib [--config FILE] <exchange> <command>

commands:
  pairs
  ticker BASE QUOTE
  trades BASE QUOTE
  balances
  order ID
  orders";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,coinlib=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            args.remove(i);
            if i >= args.len() {
                bail!("--config needs a file\n\n{}", USAGE);
            }
            Some(PathBuf::from(args.remove(i)))
        }
        None => None,
    };

    let [name, command, rest @ ..] = args.as_slice() else {
        bail!(USAGE);
    };

    let exchange_config = match &config_path {
        Some(path) => Config::load(path)?
            .exchange(name)
            .cloned()
            .unwrap_or_else(|| ExchangeConfig::new(name.to_lowercase())),
        None => ExchangeConfig::from_env(name)?,
    };

    let exchange = coinlib::connect(name, &exchange_config).await?;
    tracing::info!("Connected to: {}", exchange.name());

    let pair = || -> anyhow::Result<Pair> {
        match rest {
            [base, quote, ..] => Ok(Pair::new(base.as_str(), quote.as_str())),
            _ => bail!("{} needs BASE QUOTE", command),
        }
    };

    match command.as_str() {
        "pairs" => {
            for pair in exchange.pairs().await? {
                println!("{}", pair);
            }
        }
        "ticker" => {
            let pair = pair()?;
            let t = exchange.ticker(&pair).await?;
            println!(
                "{} bid={} ask={} last={} high={} low={} volume={} at {}",
                pair, t.bid, t.ask, t.last, t.high, t.low, t.volume, t.timestamp
            );
        }
        "trades" => {
            for t in exchange.trades(&pair()?).await? {
                println!("{} {} {} @ {}", t.timestamp, t.side, t.quantity, t.price);
            }
        }
        "balances" => {
            for (asset, amount) in exchange.balances().await? {
                println!("{} {}", asset, amount);
            }
        }
        "order" => {
            let id = rest.first().context("order needs an ID")?;
            let d = exchange.order_details(&OrderId::new(id.as_str())).await?;
            println!(
                "{} {} {} {} {} (remaining {}) @ {} opened {}",
                d.status, d.order_type, d.side, d.pair, d.quantity, d.remaining, d.price, d.opened_at
            );
        }
        "orders" => {
            for id in exchange.active_orders().await? {
                println!("{}", id);
            }
        }
        other => bail!("unknown command {:?}\n\n{}", other, USAGE),
    }

    Ok(())
}
