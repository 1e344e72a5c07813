//! Shared fixtures for the integration tests: a `bip39`-backed `Mnemonic`,
//! and minimal `Ledger`/`WalletRegistry` implementations standing in for
//! the network/RPC layer and the outer wallet file an embedding application
//! would otherwise supply.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hd_wallet_core::db::constraints::ConstraintSet;
use hd_wallet_core::db::Database;
use hd_wallet_core::error::Result;
use hd_wallet_core::ledger::{BuiltTransaction, Ledger, Mnemonic, TxBuildSpec, WalletRegistry};

pub struct Bip39Mnemonic;

impl Mnemonic for Bip39Mnemonic {
	fn make_seed() -> String {
		bip39::Mnemonic::generate(12).expect("mnemonic generation").to_string()
	}

	fn mnemonic_to_seed(phrase: &str, password: &str) -> Vec<u8> {
		let mnemonic = bip39::Mnemonic::parse(phrase).expect("valid mnemonic phrase");
		mnemonic.to_seed(password).to_vec()
	}
}

#[derive(Default)]
pub struct TestWallet {
	pub accounts: Mutex<Vec<String>>,
}

impl WalletRegistry for TestWallet {
	fn add_account(&self, master_address: &str) {
		self.accounts.lock().unwrap().push(master_address.to_owned());
	}
}

/// A `Ledger` stand-in with no real network: it builds transactions in
/// memory and "broadcasts" by doing nothing.
pub struct TestLedger {
	pub id: String,
	pub db: Database,
	pub height: i64,
}

impl TestLedger {
	pub async fn new(id: impl Into<String>, height: i64) -> Arc<TestLedger> {
		let db = Database::open(":memory:").await.unwrap();
		Arc::new(TestLedger { id: id.into(), db, height })
	}
}

#[async_trait]
impl Ledger for TestLedger {
	type Transaction = TxBuildSpec;

	fn id(&self) -> String {
		self.id.clone()
	}

	fn tip_height(&self) -> i64 {
		self.height
	}

	fn db(&self) -> &Database {
		&self.db
	}

	async fn address_to_hash160(&self, _address: &str) -> Result<[u8; 20]> {
		Ok([0u8; 20])
	}

	async fn broadcast(&self, _tx: &Self::Transaction) -> Result<()> {
		Ok(())
	}

	async fn build_transaction(&self, spec: TxBuildSpec) -> Result<BuiltTransaction<Self::Transaction>> {
		// explicit inputs are already reserved by the caller; otherwise
		// (amount-mode funding) draw and reserve enough from
		// `funding_accounts` to cover the requested outputs.
		let reserved = if spec.inputs.is_empty() {
			let needed: u64 = spec.outputs.iter().map(|o| o.amount).sum();
			let mut picked = Vec::new();
			let mut total = 0u64;
			for account in &spec.funding_accounts {
				if total >= needed {
					break;
				}
				let utxos = self.db.get_utxos_for_account(account.clone(), ConstraintSet::new()).await?;
				for utxo in utxos {
					if total >= needed {
						break;
					}
					total += utxo.amount as u64;
					picked.push(utxo);
				}
			}
			self.reserve_outputs(&picked).await?;
			picked
		} else {
			spec.inputs.clone()
		};
		Ok(BuiltTransaction { transaction: spec, reserved_utxos: reserved })
	}
}

/// Builds a minimal P2PKH output script for `hash`.
pub fn p2pkh_script(hash: [u8; 20]) -> bitcoin::ScriptBuf {
	use bitcoin::blockdata::opcodes::all::*;
	use bitcoin::blockdata::script::Builder;
	Builder::new()
		.push_opcode(OP_DUP)
		.push_opcode(OP_HASH160)
		.push_slice(hash)
		.push_opcode(OP_EQUALVERIFY)
		.push_opcode(OP_CHECKSIG)
		.into_script()
}
