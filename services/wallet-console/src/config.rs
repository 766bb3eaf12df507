use bw_bridge::BridgeConfig;
use bw_host_tcp::TcpHostTransport;
use bw_wallet_core::WalletConfig;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub host_addr: String,
    pub start_polling: bool,
    pub bridge: BridgeConfig,
    pub wallet: WalletConfig,
}

impl ConsoleConfig {
    pub fn from_env() -> Self {
        Self {
            host_addr: TcpHostTransport::resolve_endpoint(None),
            start_polling: start_polling_from(std::env::var("BW_START_POLLING").ok()),
            bridge: BridgeConfig::from_env(),
            wallet: WalletConfig::from_env(),
        }
    }
}

fn start_polling_from(raw: Option<String>) -> bool {
    let Some(raw) = raw else {
        return true;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!("invalid BW_START_POLLING '{raw}', polling stays on");
            true
        }
    }
}
