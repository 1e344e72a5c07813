//! Collaborator traits (C6).
//!
//! Narrow boundaries through which the account core reaches services it
//! does not implement itself: the ledger's network/RPC layer and
//! transaction builder, the outer wallet file/registry, and mnemonic
//! word-list encoding. Concrete implementations belong to the application
//! embedding this crate (or, for `Mnemonic`, to test fixtures).

use async_trait::async_trait;

use crate::db::Database;
use crate::domain::Utxo;
use crate::error::Result;

/// One output the transaction builder should create, paying `amount` to the
/// P2PKH script for `hash160`. Mirrors `output_class.pay_pubkey_hash`.
#[derive(Debug, Clone)]
pub struct PayOutput {
	pub amount: u64,
	pub hash160: [u8; 20],
}

/// The inputs, outputs and funding/change policy for one transaction to be
/// built. Mirrors `transaction_class.create(inputs, outputs,
/// funding_accounts, change_account)` plus the `input_class.spend` /
/// `output_class.pay_pubkey_hash` helpers folded in.
#[derive(Debug, Clone)]
pub struct TxBuildSpec {
	/// Explicit inputs to spend, beyond whatever the builder selects to
	/// fund `outputs` from `funding_accounts`.
	pub inputs: Vec<Utxo>,
	pub outputs: Vec<PayOutput>,
	/// Master addresses of the accounts the builder may draw additional
	/// funding UTXOs from.
	pub funding_accounts: Vec<String>,
	/// Master address of the account that should receive any change.
	pub change_account: String,
}

/// The result of [`Ledger::build_transaction`]: the built transaction plus
/// every UTXO reserved to fund it — `spec.inputs` echoed back, and, in
/// amount-mode funding, whatever the builder additionally selected and
/// reserved from `funding_accounts` to cover the requested outputs.
/// `Account::fund` releases this full set when the result is not broadcast.
#[derive(Debug, Clone)]
pub struct BuiltTransaction<T> {
	pub transaction: T,
	pub reserved_utxos: Vec<Utxo>,
}

/// The ledger a set of accounts belongs to: network tip, state database,
/// address encoding, reservation/broadcast plumbing and the transaction
/// builder. `Transaction` is the ledger's own built-transaction type,
/// opaque to this crate.
#[async_trait]
pub trait Ledger: Send + Sync {
	type Transaction: Send + Sync;

	/// A stable identifier for this ledger (e.g. network name), used to
	/// reject funding across two different ledgers.
	fn id(&self) -> String;

	/// Current chain tip height, used by `Account::get_balance` to turn a
	/// confirmation count into a height filter.
	fn tip_height(&self) -> i64;

	/// The state database backing this ledger's accounts.
	fn db(&self) -> &Database;

	/// hash160 of the pubkey or script an address encodes.
	async fn address_to_hash160(&self, address: &str) -> Result<[u8; 20]>;

	async fn reserve_outputs(&self, utxos: &[Utxo]) -> Result<()> {
		let txoids = utxos.iter().map(|u| u.txoid()).collect();
		self.db().reserve_outputs(txoids, true).await
	}

	async fn release_outputs(&self, utxos: &[Utxo]) -> Result<()> {
		let txoids = utxos.iter().map(|u| u.txoid()).collect();
		self.db().release_outputs(txoids).await
	}

	async fn broadcast(&self, tx: &Self::Transaction) -> Result<()>;

	/// Builds (but does not broadcast) a transaction from `spec`, reserving
	/// whatever UTXOs it draws from `spec.funding_accounts` beyond
	/// `spec.inputs` and reporting the full reserved set back so the caller
	/// can release it if the transaction is abandoned.
	async fn build_transaction(&self, spec: TxBuildSpec) -> Result<BuiltTransaction<Self::Transaction>>;
}

/// The outer wallet file/registry an [`crate::account::Account`] registers
/// itself into at construction time.
pub trait WalletRegistry: Send + Sync {
	fn add_account(&self, master_address: &str);
}

/// Mnemonic word-list encoding, entirely external to this crate's concerns.
pub trait Mnemonic {
	fn make_seed() -> String;
	fn mnemonic_to_seed(phrase: &str, password: &str) -> Vec<u8>;
}
