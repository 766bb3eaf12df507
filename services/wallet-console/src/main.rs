mod commands;
mod config;

use anyhow::{Context, Result, anyhow};
use bw_api_types::PushCategory;
use bw_bridge::RequestBridge;
use bw_host_tcp::TcpHostTransport;
use bw_wallet_core::{GasSettings, Session, WalletClient};
use commands::{Command, HELP};
use config::ConsoleConfig;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

type CurrentSession = Arc<Mutex<Option<Session>>>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ConsoleConfig::from_env();
    let (transport, inbound) = TcpHostTransport::connect(&config.host_addr).await?;
    let bridge = RequestBridge::new(Arc::new(transport), config.bridge.clone());

    let session: CurrentSession = Arc::new(Mutex::new(None));
    register_push_handlers(&bridge, session.clone());

    let runner = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.run(inbound).await }
    });
    tokio::spawn(log_activity(bridge.clone()));

    let client = WalletClient::new(bridge.clone(), config.wallet.clone());
    client.init().await?;
    if config.start_polling {
        client.start_polling().await?;
    }
    match client.coinbase().await {
        Ok(coinbase) => {
            info!(account = coinbase.account(), "coinbase loaded");
            *current(&session) = Some(coinbase);
        }
        Err(err) => warn!("no coinbase available: {err:#}"),
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(err) = execute(&client, &session, command).await {
                    println!("error: {err:#}");
                }
            }
            Err(err) => println!("error: {err:#}"),
        }
    }

    if config.start_polling {
        if let Err(err) = client.stop_polling().await {
            warn!("stop polling failed: {err:#}");
        }
    }
    let abandoned = bridge.close();
    if abandoned > 0 {
        info!(abandoned, "closed with calls still pending");
    }
    runner.abort();
    Ok(())
}

fn current(session: &CurrentSession) -> std::sync::MutexGuard<'_, Option<Session>> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register_push_handlers(bridge: &RequestBridge, session: CurrentSession) {
    bridge.on_push(PushCategory::SyncProgress, |payload| {
        info!(progress = %payload, "node sync status");
        Ok(())
    });
    bridge.on_push(PushCategory::BlockInfo, |payload| {
        debug!(block = %payload, "block info");
        Ok(())
    });
    bridge.on_push(PushCategory::PollingTick, |_| {
        debug!("polling tick");
        Ok(())
    });
    bridge.on_push(PushCategory::LoaderShow, |_| {
        debug!("host busy");
        Ok(())
    });
    bridge.on_push(PushCategory::LoaderHide, |_| {
        debug!("host idle");
        Ok(())
    });
    bridge.on_push(PushCategory::CoinbaseChanged, move |payload| {
        let account = match payload {
            Value::String(account) => account.trim_matches('"').to_owned(),
            other => return Err(anyhow!("unexpected coinbase payload {other}")),
        };
        info!(account = %account, "coinbase changed");
        *current(&session) = Some(Session::new(account));
        Ok(())
    });
}

async fn log_activity(bridge: RequestBridge) {
    let mut activity = bridge.subscribe_activity();
    while activity.changed().await.is_ok() {
        let busy = *activity.borrow_and_update();
        debug!(busy, "bridge activity");
    }
}

fn require_session(session: &CurrentSession) -> Result<Session> {
    current(session)
        .clone()
        .ok_or_else(|| anyhow!("no coinbase account is set"))
}

async fn execute(client: &WalletClient, session: &CurrentSession, command: Command) -> Result<()> {
    match command {
        Command::Balance(address) => {
            let address = match address {
                Some(address) => address,
                None => require_session(session)?.account().to_owned(),
            };
            let main = client.get_balance(&address).await?;
            let stake = client.get_stake_balance(&address).await?;
            let reward = client.get_reward_balance(&address).await?;
            println!("{address}");
            println!("  main    {}", main.display);
            println!("  stake   {}", stake.display);
            println!("  reward  {}", reward.display);
        }
        Command::Block => println!("{}", client.block_number().await?),
        Command::Accounts => {
            for account in client.accounts().await? {
                println!("{account}");
            }
        }
        Command::Send {
            to,
            amount,
            gas_limit,
            gas_price_wei,
        } => {
            let from = require_session(session)?;
            let gas = GasSettings {
                gas_limit,
                gas_price_wei,
                nonce: None,
            };
            let tx_hash = client.send_transaction(&from, &to, &amount, &gas).await?;
            println!("{tx_hash}");
        }
        Command::Stake(amount) => {
            let from = require_session(session)?;
            let gas = GasSettings {
                gas_limit: commands::DEFAULT_GAS_LIMIT,
                gas_price_wei: commands::DEFAULT_GAS_PRICE_WEI,
                nonce: None,
            };
            println!("{}", client.stake(&from, &amount, &gas).await?);
        }
        Command::Contacts => {
            for (address, name) in client.select_contacts().await? {
                println!("{address}  {name}");
            }
        }
        Command::History => {
            for entry in client.select_tx_history().await? {
                println!(
                    "{}  {:<6}  {}  {}  {}",
                    entry.tx_time, entry.tx_type, entry.tx_amount, entry.tx_address, entry.hash
                );
            }
        }
        Command::Call { api, args } => {
            let payload = client.call_api(&api, args).await?;
            match payload {
                Value::String(text) => println!("{text}"),
                other => println!("{}", serde_json::to_string_pretty(&other)?),
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}
