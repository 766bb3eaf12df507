use anyhow::{Context, Result, bail};
use bw_amount::{WEI_DECIMALS, decimal_to_hex, gwei_to_wei_hex, hex_to_quantity};
use serde_json::Value;

pub const DEFAULT_GAS_LIMIT: u64 = 21_000;
pub const DEFAULT_GAS_PRICE_GWEI: &str = "1";
pub const DEFAULT_GAS_PRICE_WEI: u64 = 1_000_000_000;

pub const HELP: &str = "\
commands:
  balance [address]                 main, stake and reward balances
  block                             current block number
  accounts                          accounts known to the node
  send <to> <amount> [gas] [gwei]   transfer from the coinbase
  stake <amount>                    stake from the coinbase
  contacts                          address book
  history                           stored transaction history
  call <api> [json-args]            raw node call, args as a JSON array
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Balance(Option<String>),
    Block,
    Accounts,
    Send {
        to: String,
        amount: String,
        gas_limit: u64,
        gas_price_wei: u64,
    },
    Stake(String),
    Contacts,
    History,
    Call {
        api: String,
        args: Vec<Value>,
    },
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let Some((verb, rest)) = split_word(line) else {
            return Ok(None);
        };
        let words: Vec<&str> = rest.split_whitespace().collect();

        let command = match verb {
            "balance" => match words.as_slice() {
                [] => Command::Balance(None),
                [address] => Command::Balance(Some((*address).to_owned())),
                _ => bail!("usage: balance [address]"),
            },
            "block" => no_args(&words, Command::Block)?,
            "accounts" => no_args(&words, Command::Accounts)?,
            "contacts" => no_args(&words, Command::Contacts)?,
            "history" => no_args(&words, Command::History)?,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "send" => match words.as_slice() {
                [to, amount, extra @ ..] if extra.len() <= 2 => {
                    let gas_limit = match extra.first() {
                        Some(gas) => gas
                            .parse()
                            .with_context(|| format!("invalid gas limit '{gas}'"))?,
                        None => DEFAULT_GAS_LIMIT,
                    };
                    let gwei = extra.get(1).copied().unwrap_or(DEFAULT_GAS_PRICE_GWEI);
                    Command::Send {
                        to: (*to).to_owned(),
                        amount: checked_amount(amount)?,
                        gas_limit,
                        gas_price_wei: gwei_to_wei(gwei)?,
                    }
                }
                _ => bail!("usage: send <to> <amount> [gas] [gwei]"),
            },
            "stake" => match words.as_slice() {
                [amount] => Command::Stake(checked_amount(amount)?),
                _ => bail!("usage: stake <amount>"),
            },
            "call" => {
                let Some((api, raw_args)) = split_word(rest) else {
                    bail!("usage: call <api> [json-args]");
                };
                let args = if raw_args.is_empty() {
                    Vec::new()
                } else {
                    match serde_json::from_str(raw_args)
                        .with_context(|| format!("invalid JSON arguments '{raw_args}'"))?
                    {
                        Value::Array(args) => args,
                        single => vec![single],
                    }
                };
                Command::Call {
                    api: api.to_owned(),
                    args,
                }
            }
            other => bail!("unknown command '{other}', try 'help'"),
        };
        Ok(Some(command))
    }
}

fn split_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((input, "")),
    }
}

fn no_args(words: &[&str], command: Command) -> Result<Command> {
    if !words.is_empty() {
        bail!("'{}' takes no arguments", words.join(" "));
    }
    Ok(command)
}

fn checked_amount(amount: &str) -> Result<String> {
    decimal_to_hex(amount, WEI_DECIMALS).with_context(|| format!("invalid amount '{amount}'"))?;
    Ok(amount.to_owned())
}

fn gwei_to_wei(gwei: &str) -> Result<u64> {
    let hex = gwei_to_wei_hex(gwei).with_context(|| format!("invalid gas price '{gwei}'"))?;
    Ok(hex_to_quantity(&hex)?)
}
