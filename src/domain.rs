//! Plain data types shared between the database, account and ledger-facing
//! APIs. Transaction serialization and script interpretation proper are out
//! of scope for this core (see spec §1); these types carry just enough of a
//! transaction's shape — outputs by position, inputs by referenced `txoid` —
//! for ingestion and UTXO bookkeeping.

use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};

/// The two address chains every account carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum Chain {
	Receiving = 0,
	Change = 1,
}

impl Chain {
	pub fn as_i64(self) -> i64 {
		self as i64
	}
}

/// A `pubkey_address` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
	pub address: String,
	/// `None` when the query pinned (filtered on) the account column.
	pub account: Option<String>,
	/// `None` when the query pinned the chain column.
	pub chain: Option<i64>,
	pub position: i64,
	pub pubkey: Option<Vec<u8>>,
	pub history: Option<String>,
	pub used_times: i64,
}

/// One output of a transaction being ingested.
#[derive(Debug, Clone)]
pub struct IngestOutput {
	pub position: i64,
	pub amount: i64,
	pub script: ScriptBuf,
}

/// One input of a transaction being ingested, identified by the `txoid` it
/// spends.
#[derive(Debug, Clone)]
pub struct IngestInput {
	pub txoid: String,
}

/// The minimal transaction shape `save_transaction_io` needs: a txid, the
/// raw bytes to persist verbatim, and the outputs/inputs to classify.
#[derive(Debug, Clone)]
pub struct IngestTx {
	pub txid: String,
	pub raw: Vec<u8>,
	pub outputs: Vec<IngestOutput>,
	pub inputs: Vec<IngestInput>,
}

impl IngestTx {
	pub fn txo_id(&self, position: i64) -> String {
		format!("{}:{}", self.txid, position)
	}
}

/// Controls how the `tx` row is upserted during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTxMode {
	Insert,
	Update,
	/// Already up to date; skip the tx-row write entirely.
	Skip,
}

/// A `tx` row, as returned by `get_transaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
	pub raw: Vec<u8>,
	pub height: i64,
	pub is_verified: bool,
}

/// An unspent transaction output, as returned by `get_utxos_for_account`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
	pub txid: String,
	pub position: i64,
	pub amount: i64,
	pub script: ScriptBuf,
}

impl Utxo {
	pub fn txoid(&self) -> String {
		format!("{}:{}", self.txid, self.position)
	}
}
