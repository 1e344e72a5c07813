
use bitcoin::Network;
use serde::{Serialize, Deserialize};

/// Default gap-limit / usage-cap pair for one address chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChainDefaults {
	pub gap: u32,
	pub maximum_uses_per_address: u32,
}

impl ChainDefaults {
	pub const fn receiving() -> ChainDefaults {
		ChainDefaults { gap: 20, maximum_uses_per_address: 2 }
	}

	pub const fn change() -> ChainDefaults {
		ChainDefaults { gap: 6, maximum_uses_per_address: 2 }
	}
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletConfig {
	pub network: Network,

	/// Path to the SQLite database file, or `:memory:` for an ephemeral store.
	pub database_path: String,

	#[serde(default = "ChainDefaults::receiving")]
	pub receiving_defaults: ChainDefaults,

	#[serde(default = "ChainDefaults::change")]
	pub change_defaults: ChainDefaults,
}

impl WalletConfig {
	pub fn new(network: Network, database_path: impl Into<String>) -> WalletConfig {
		WalletConfig {
			network,
			database_path: database_path.into(),
			receiving_defaults: ChainDefaults::receiving(),
			change_defaults: ChainDefaults::change(),
		}
	}
}
