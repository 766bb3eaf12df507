use bw_amount::quantity_to_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transaction object passed to `berith_sendTransaction` and the staking
/// calls. Every numeric field is a `0x` hex string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxParams {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSettings {
    pub gas_limit: u64,
    pub gas_price_wei: u64,
    pub nonce: Option<u64>,
}

impl GasSettings {
    pub fn apply(&self, params: TxParams) -> TxParams {
        TxParams {
            gas: Some(quantity_to_hex(self.gas_limit)),
            gas_price: Some(quantity_to_hex(self.gas_price_wei)),
            nonce: self.nonce.map(quantity_to_hex),
            ..params
        }
    }
}

/// Transaction as returned by `berith_getTransactionByHash`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTransaction {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    pub nonce: String,
    pub gas: String,
    pub gas_price: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub base: Value,
    #[serde(default)]
    pub target: Value,
}

/// One stored entry of an account's transaction history, as kept by the
/// host's local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TxHistory {
    pub tx_address: String,
    pub tx_type: String,
    pub tx_amount: String,
    #[serde(rename = "Txtime")]
    pub tx_time: String,
    pub tx_state: String,
    pub hash: String,
    pub gas_limit: String,
    pub gas_price: String,
}

/// A history record to store under `key`. The host stamps the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTxHistory {
    pub key: String,
    pub address: String,
    pub tx_type: String,
    pub amount: String,
    pub hash: String,
    pub gas_limit: String,
    pub gas_price: String,
}

impl NewTxHistory {
    /// Positional arguments of the store's `insertTxInfo` operation.
    pub fn to_args(&self) -> Vec<Value> {
        [
            &self.key,
            &self.address,
            &self.tx_type,
            &self.amount,
            &self.hash,
            &self.gas_limit,
            &self.gas_price,
        ]
        .into_iter()
        .map(|field| Value::String(field.clone()))
        .collect()
    }
}

/// Balance bucket named by a transaction's `base`/`target` code: `2` is the
/// stake balance, anything else the main balance.
pub fn balance_kind(code: &Value) -> &'static str {
    let numeric = match code {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        },
        _ => None,
    };
    if numeric == Some(2) { "stake" } else { "main" }
}
