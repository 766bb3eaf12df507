mod tx;

pub use tx::{GasSettings, NewTxHistory, NodeTransaction, TxHistory, TxParams, balance_kind};

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bw_amount::{
    DISPLAY_DIGITS, DecimalAmount, DisplayAmount, HexAmount, WEI_DECIMALS, decimal_to_hex,
    escalate_gas_price, gwei_to_wei_hex, hex_to_fixed_point, hex_to_quantity,
};
use bw_api_types::{ResponseEnvelope, Scope};
use bw_bridge::RequestBridge;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub scale: u32,
    pub display_digits: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            scale: WEI_DECIMALS,
            display_digits: DISPLAY_DIGITS,
        }
    }
}

impl WalletConfig {
    /// Reads `BW_DISPLAY_DIGITS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("BW_DISPLAY_DIGITS") {
            match raw.trim().parse::<u32>() {
                Ok(digits) => config.display_digits = digits,
                Err(_) => warn!("invalid BW_DISPLAY_DIGITS '{raw}', using {DISPLAY_DIGITS}"),
            }
        }
        config
    }
}

/// The account the user is acting as. Passed explicitly to every call that
/// needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    account: String,
}

impl Session {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub raw: HexAmount,
    pub amount: DecimalAmount,
    pub display: DisplayAmount,
}

/// A replacement submitted for an earlier transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub tx_hash: String,
    pub params: TxParams,
}

pub struct WalletClient {
    bridge: RequestBridge,
    config: WalletConfig,
}

impl WalletClient {
    pub fn new(bridge: RequestBridge, config: WalletConfig) -> Self {
        Self { bridge, config }
    }

    pub fn bridge(&self) -> &RequestBridge {
        &self.bridge
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    async fn node(&self, method: &str, args: Vec<Value>) -> Result<ResponseEnvelope> {
        self.bridge
            .call(Scope::CallApi, method, args)
            .await
            .with_context(|| format!("{method} failed"))
    }

    async fn control(&self, scope: Scope, args: Vec<Value>) -> Result<ResponseEnvelope> {
        self.bridge
            .call(scope, "", args)
            .await
            .with_context(|| format!("{scope} failed"))
    }

    /// Raw node call; the console's escape hatch.
    pub async fn call_api(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        Ok(self.node(method, args).await?.into_payload())
    }

    pub async fn init(&self) -> Result<()> {
        self.control(Scope::Init, vec![]).await?;
        info!("host handshake complete");
        Ok(())
    }

    pub async fn start_polling(&self) -> Result<()> {
        self.control(Scope::Polling, vec![]).await.map(drop)
    }

    pub async fn stop_polling(&self) -> Result<()> {
        self.control(Scope::StopPolling, vec![]).await.map(drop)
    }

    pub fn balance_from_hex(&self, raw: &str) -> Result<Balance> {
        let raw: HexAmount = raw.parse()?;
        let amount = hex_to_fixed_point(raw.as_str(), self.config.scale)?;
        let display = amount.truncate(self.config.display_digits);
        Ok(Balance {
            raw,
            amount,
            display,
        })
    }

    /// `0x` hex of a user-entered amount in the smallest unit. Fails before
    /// anything is sent when the amount is malformed or too precise.
    pub fn encode_amount(&self, amount: &str) -> Result<String> {
        let digits = decimal_to_hex(amount, self.config.scale)
            .with_context(|| format!("invalid amount '{amount}'"))?;
        Ok(format!("0x{digits}"))
    }

    async fn balance_of(&self, method: &str, address: &str) -> Result<Balance> {
        let raw: String = self
            .node(method, vec![json!(address), json!("latest")])
            .await?
            .decode()?;
        self.balance_from_hex(&raw)
    }

    pub async fn get_balance(&self, address: &str) -> Result<Balance> {
        self.balance_of("berith_getBalance", address).await
    }

    pub async fn get_stake_balance(&self, address: &str) -> Result<Balance> {
        self.balance_of("berith_getStakeBalance", address).await
    }

    pub async fn get_reward_balance(&self, address: &str) -> Result<Balance> {
        self.balance_of("berith_getRewardBalance", address).await
    }

    pub async fn block_number(&self) -> Result<u64> {
        let raw: String = self.node("berith_blockNumber", vec![]).await?.decode()?;
        Ok(hex_to_quantity(&raw)?)
    }

    pub async fn coinbase(&self) -> Result<Session> {
        let account: String = self.node("berith_coinbase", vec![]).await?.decode()?;
        Ok(Session::new(account))
    }

    pub async fn accounts(&self) -> Result<Vec<String>> {
        Ok(self.node("berith_accounts", vec![]).await?.decode()?)
    }

    pub async fn mining(&self) -> Result<bool> {
        Ok(self.node("berith_mining", vec![]).await?.decode()?)
    }

    pub async fn transaction_receipt(&self, hash: &str) -> Result<Option<Value>> {
        Ok(self
            .node("berith_getTransactionReceipt", vec![json!(hash)])
            .await?
            .decode()?)
    }

    pub async fn transaction_by_hash(&self, hash: &str) -> Result<Option<NodeTransaction>> {
        Ok(self
            .node("berith_getTransactionByHash", vec![json!(hash)])
            .await?
            .decode()?)
    }

    pub async fn pending_transactions(&self) -> Result<Vec<Value>> {
        Ok(self
            .node("berith_pendingTransactions", vec![])
            .await?
            .decode()?)
    }

    async fn submit(&self, method: &str, params: TxParams) -> Result<String> {
        let tx_hash: String = self
            .node(method, vec![serde_json::to_value(&params)?])
            .await?
            .decode()?;
        info!(method, tx_hash = %tx_hash, "transaction submitted");
        Ok(tx_hash)
    }

    pub async fn send_transaction(
        &self,
        session: &Session,
        to: &str,
        amount: &str,
        gas: &GasSettings,
    ) -> Result<String> {
        let params = gas.apply(TxParams {
            from: session.account().to_owned(),
            to: Some(to.to_owned()),
            value: Some(self.encode_amount(amount)?),
            ..TxParams::default()
        });
        self.submit("berith_sendTransaction", params).await
    }

    pub async fn stake(&self, session: &Session, amount: &str, gas: &GasSettings) -> Result<String> {
        let params = gas.apply(TxParams {
            from: session.account().to_owned(),
            value: Some(self.encode_amount(amount)?),
            ..TxParams::default()
        });
        self.submit("berith_stake", params).await
    }

    pub async fn stop_staking(&self, session: &Session, gas: &GasSettings) -> Result<String> {
        let params = gas.apply(TxParams {
            from: session.account().to_owned(),
            ..TxParams::default()
        });
        self.submit("berith_stopStaking", params).await
    }

    pub async fn reward_to_balance(&self, session: &Session, amount: &str) -> Result<String> {
        let params = TxParams {
            from: session.account().to_owned(),
            value: Some(self.encode_amount(amount)?),
            ..TxParams::default()
        };
        self.submit("berith_rewardToBalance", params).await
    }

    pub async fn reward_to_stake(&self, session: &Session, amount: &str) -> Result<String> {
        let params = TxParams {
            from: session.account().to_owned(),
            value: Some(self.encode_amount(amount)?),
            ..TxParams::default()
        };
        self.submit("berith_rewardToStake", params).await
    }

    async fn require_transaction(&self, hash: &str) -> Result<NodeTransaction> {
        self.transaction_by_hash(hash)
            .await?
            .ok_or_else(|| anyhow!("invalid transaction hash {hash}"))
    }

    /// Re-send a transaction unchanged except for its gas price.
    pub async fn resend_transaction(&self, hash: &str, gas_price_gwei: &str) -> Result<Replacement> {
        let gas_price = gwei_to_wei_hex(gas_price_gwei)
            .with_context(|| format!("invalid gas price '{gas_price_gwei}'"))?;
        let original = self.require_transaction(hash).await?;

        let params = TxParams {
            from: original.from,
            to: original.to,
            value: Some(original.value),
            gas: Some(original.gas),
            gas_price: Some(gas_price),
            nonce: Some(original.nonce),
            data: Some(original.input),
            base: Some(balance_kind(&original.base).to_owned()),
            target: Some(balance_kind(&original.target).to_owned()),
        };
        let tx_hash = self.submit("berith_sendTransaction", params.clone()).await?;
        Ok(Replacement { tx_hash, params })
    }

    /// Replace a pending transaction with a zero-value self transfer at the
    /// same nonce and a higher gas price.
    pub async fn cancel_transaction(&self, hash: &str) -> Result<Replacement> {
        let original = self.require_transaction(hash).await?;
        let gas_price = escalate_gas_price(&original.gas_price)?;

        let params = TxParams {
            from: original.from.clone(),
            to: Some(original.from),
            value: Some("0x0".to_owned()),
            gas: Some(original.gas),
            gas_price: Some(gas_price),
            nonce: Some(original.nonce),
            data: Some("0x".to_owned()),
            ..TxParams::default()
        };
        let tx_hash = self.submit("berith_sendTransaction", params.clone()).await?;
        Ok(Replacement { tx_hash, params })
    }

    pub async fn set_berithbase(&self, address: &str) -> Result<bool> {
        Ok(self
            .node("miner_setBerithbase", vec![json!(address)])
            .await?
            .decode()?)
    }

    pub async fn miner_start(&self) -> Result<()> {
        self.node("miner_start", vec![]).await.map(drop)
    }

    pub async fn miner_stop(&self) -> Result<()> {
        self.node("miner_stop", vec![]).await.map(drop)
    }

    /// Address book of the current coinbase, address to name.
    pub async fn select_contacts(&self) -> Result<BTreeMap<String, String>> {
        let response = self
            .bridge
            .call(Scope::CallDb, "selectContact", vec![])
            .await
            .context("selectContact failed")?;
        if response.payload.is_null() {
            return Ok(BTreeMap::new());
        }
        Ok(response.decode()?)
    }

    pub async fn insert_contact(&self, address: &str, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .bridge
            .call(Scope::CallDb, "insertContact", vec![json!(address), json!(name)])
            .await
            .context("insertContact failed")?
            .decode()?)
    }

    /// Remove `address` from the address book; returns what remains.
    pub async fn delete_contact(&self, address: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .bridge
            .call(Scope::CallDb, "updateContact", vec![json!(address)])
            .await
            .context("updateContact failed")?
            .decode()?)
    }

    /// Stored transaction history of the current coinbase.
    pub async fn select_tx_history(&self) -> Result<Vec<TxHistory>> {
        let response = self
            .bridge
            .call(Scope::CallDb, "selectTxInfo", vec![])
            .await
            .context("selectTxInfo failed")?;
        if response.payload.is_null() {
            return Ok(Vec::new());
        }
        Ok(response.decode()?)
    }

    /// The store answers a bare `"err"` when `entry.key` is already taken.
    pub async fn insert_tx_history(&self, entry: &NewTxHistory) -> Result<TxHistory> {
        let response = self
            .bridge
            .call(Scope::CallDb, "insertTxInfo", entry.to_args())
            .await
            .context("insertTxInfo failed")?;
        let duplicate = response.text() == Some("err")
            || response.decode::<String>().is_ok_and(|text| text == "err");
        if duplicate {
            return Err(anyhow!("transaction history '{}' is already recorded", entry.key));
        }
        Ok(response.decode()?)
    }

    /// Zipped keystore bytes; the host sends them base64 encoded.
    pub async fn export_keystore(&self, address: &str, password: &str, id: &str) -> Result<Vec<u8>> {
        let response = self
            .control(
                Scope::ExportKeystore,
                vec![json!(address), json!(password), json!(id)],
            )
            .await?;
        let encoded = response
            .text()
            .ok_or_else(|| anyhow!("exportKeystore returned a non-string payload"))?;
        STANDARD
            .decode(encoded.as_bytes())
            .context("exportKeystore payload is not valid base64")
    }

    pub async fn import_keystore(&self, path: &str, password: &str) -> Result<()> {
        self.control(Scope::ImportKeystore, vec![json!(path), json!(password)])
            .await
            .map(drop)
    }
}
