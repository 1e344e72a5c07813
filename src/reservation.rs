//! RAII reservation guard.
//!
//! `fund` reserves UTXOs before it has a finished transaction to either
//! broadcast or abandon. If a caller's future is dropped (cancelled) before
//! reaching either outcome, the reservation would otherwise be stuck.
//! `ReservationGuard` releases its outputs on `Drop` unless [`disarm`]ed,
//! by spawning a release task on the ambient Tokio runtime — `Drop` itself
//! cannot be `async`.
//!
//! [`disarm`]: ReservationGuard::disarm

use tracing::warn;

use crate::db::Database;
use crate::domain::Utxo;

pub struct ReservationGuard {
	db: Database,
	txoids: Vec<String>,
	armed: bool,
}

impl ReservationGuard {
	pub fn new(db: Database, utxos: &[Utxo]) -> ReservationGuard {
		ReservationGuard { db, txoids: utxos.iter().map(|u| u.txoid()).collect(), armed: true }
	}

	/// Prevents the guard from releasing its outputs on `Drop`. Call this
	/// once the caller has taken over responsibility for the reservation
	/// (e.g. after broadcasting, or after releasing it explicitly).
	pub fn disarm(&mut self) {
		self.armed = false;
	}
}

impl Drop for ReservationGuard {
	fn drop(&mut self) {
		if !self.armed || self.txoids.is_empty() {
			return;
		}
		let db = self.db.clone();
		let txoids = std::mem::take(&mut self.txoids);
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move {
					if let Err(e) = db.release_outputs(txoids).await {
						warn!(error = %e, "ReservationGuard: failed to release outputs on drop");
					}
				});
			}
			Err(_) => {
				warn!("ReservationGuard dropped outside a Tokio runtime; outputs remain reserved");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{IngestOutput, IngestTx, SaveTxMode};

	#[tokio::test]
	async fn disarmed_guard_leaves_reservation_intact() {
		let db = Database::open(":memory:").await.unwrap();
		db.add_keys("acct".into(), 0, vec![(0, vec![1], "addr0".into())]).await.unwrap();
		let hash = [1u8; 20];
		let script = {
			use bitcoin::blockdata::opcodes::all::*;
			use bitcoin::blockdata::script::Builder;
			Builder::new()
				.push_opcode(OP_DUP)
				.push_opcode(OP_HASH160)
				.push_slice(hash)
				.push_opcode(OP_EQUALVERIFY)
				.push_opcode(OP_CHECKSIG)
				.into_script()
		};
		db.save_transaction_io(
			SaveTxMode::Insert,
			IngestTx { txid: "tx1".into(), raw: vec![], outputs: vec![IngestOutput { position: 0, amount: 10, script }], inputs: vec![] },
			1,
			true,
			"addr0".into(),
			hash,
			"h:1".into(),
		)
		.await
		.unwrap();

		let utxos = db.get_utxos_for_account("acct".into(), crate::db::constraints::ConstraintSet::new()).await.unwrap();
		db.reserve_outputs(utxos.iter().map(|u| u.txoid()).collect(), true).await.unwrap();

		{
			let mut guard = ReservationGuard::new(db.clone(), &utxos);
			guard.disarm();
		}
		// give any spawned release task a chance to run (there should be none).
		tokio::task::yield_now().await;
		let remaining = db.get_utxos_for_account("acct".into(), crate::db::constraints::ConstraintSet::new()).await.unwrap();
		assert!(remaining.is_empty(), "disarmed guard must not release");
	}

	#[tokio::test]
	async fn armed_guard_releases_on_drop() {
		let db = Database::open(":memory:").await.unwrap();
		db.add_keys("acct".into(), 0, vec![(0, vec![1], "addr0".into())]).await.unwrap();
		let hash = [1u8; 20];
		let script = {
			use bitcoin::blockdata::opcodes::all::*;
			use bitcoin::blockdata::script::Builder;
			Builder::new()
				.push_opcode(OP_DUP)
				.push_opcode(OP_HASH160)
				.push_slice(hash)
				.push_opcode(OP_EQUALVERIFY)
				.push_opcode(OP_CHECKSIG)
				.into_script()
		};
		db.save_transaction_io(
			SaveTxMode::Insert,
			IngestTx { txid: "tx1".into(), raw: vec![], outputs: vec![IngestOutput { position: 0, amount: 10, script }], inputs: vec![] },
			1,
			true,
			"addr0".into(),
			hash,
			"h:1".into(),
		)
		.await
		.unwrap();

		let utxos = db.get_utxos_for_account("acct".into(), crate::db::constraints::ConstraintSet::new()).await.unwrap();
		db.reserve_outputs(utxos.iter().map(|u| u.txoid()).collect(), true).await.unwrap();

		{
			let _guard = ReservationGuard::new(db.clone(), &utxos);
		}
		tokio::task::yield_now().await;
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		let remaining = db.get_utxos_for_account("acct".into(), crate::db::constraints::ConstraintSet::new()).await.unwrap();
		assert_eq!(remaining.len(), 1, "armed guard must release on drop");
	}
}
