//! AddressManager (C2).
//!
//! Governs one address chain: enumerates addresses, supplies private keys by
//! index, and enforces the gap invariant. Modeled as a tagged `enum` rather
//! than a trait object — dynamic dispatch by string name exists only at the
//! [`GeneratorDescriptor`] serialization boundary.
//!
//! Methods take `&Database` and the owning account's master address as
//! explicit parameters rather than holding a back-pointer to the `Account`,
//! so there is no ownership cycle (see SPEC_FULL §9, "Back-references").

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Database;
use crate::domain::AddressRecord;
use crate::error::Result;
use crate::keys::PublicKey;

/// Per-chain parameters for the deterministic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
	pub gap: u32,
	pub maximum_uses_per_address: u32,
}

impl ChainParams {
	pub fn receiving_default() -> ChainParams {
		ChainParams { gap: 20, maximum_uses_per_address: 2 }
	}

	pub fn change_default() -> ChainParams {
		ChainParams { gap: 6, maximum_uses_per_address: 2 }
	}
}

/// The portable descriptor for an account's address generator, as emitted
/// by `Account::to_dict` and consumed by `Account::from_dict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum GeneratorDescriptor {
	#[serde(rename = "deterministic-chain")]
	DeterministicChain {
		#[serde(skip_serializing_if = "Option::is_none")]
		receiving: Option<ChainParams>,
		#[serde(skip_serializing_if = "Option::is_none")]
		change: Option<ChainParams>,
	},
	#[serde(rename = "single-address")]
	SingleAddress,
}

impl Default for GeneratorDescriptor {
	fn default() -> GeneratorDescriptor {
		GeneratorDescriptor::DeterministicChain { receiving: None, change: None }
	}
}

#[derive(Debug, Clone)]
pub struct DeterministicChain {
	pub public_key: PublicKey,
	pub chain_number: i64,
	pub gap: u32,
	pub maximum_uses_per_address: u32,
}

#[derive(Debug, Clone)]
pub struct SingleAddress {
	pub public_key: PublicKey,
	pub chain_number: i64,
}

#[derive(Debug, Clone)]
pub enum AddressManager {
	Deterministic(DeterministicChain),
	Single(SingleAddress),
}

impl AddressManager {
	/// Builds the receiving/change pair for a deterministic account,
	/// deriving each chain's node one level down from `master_public_key`.
	pub fn deterministic_pair(
		master_public_key: &PublicKey,
		receiving: Option<ChainParams>,
		change: Option<ChainParams>,
	) -> Result<(AddressManager, AddressManager)> {
		let receiving = receiving.unwrap_or_else(ChainParams::receiving_default);
		let change = change.unwrap_or_else(ChainParams::change_default);
		let recv_key = master_public_key.child(0)?;
		let change_key = master_public_key.child(1)?;
		Ok((
			AddressManager::Deterministic(DeterministicChain {
				public_key: recv_key,
				chain_number: 0,
				gap: receiving.gap,
				maximum_uses_per_address: receiving.maximum_uses_per_address,
			}),
			AddressManager::Deterministic(DeterministicChain {
				public_key: change_key,
				chain_number: 1,
				gap: change.gap,
				maximum_uses_per_address: change.maximum_uses_per_address,
			}),
		))
	}

	/// Builds the single shared instance used for both receiving and
	/// change. Matches the original: the shared address always lives on
	/// chain 0, even when used in the "change" role.
	pub fn single(master_public_key: &PublicKey) -> AddressManager {
		AddressManager::Single(SingleAddress { public_key: *master_public_key, chain_number: 0 })
	}

	pub fn chain_number(&self) -> i64 {
		match self {
			AddressManager::Deterministic(d) => d.chain_number,
			AddressManager::Single(s) => s.chain_number,
		}
	}

	pub fn to_descriptor_instance(&self) -> Option<ChainParams> {
		match self {
			AddressManager::Deterministic(d) => {
				Some(ChainParams { gap: d.gap, maximum_uses_per_address: d.maximum_uses_per_address })
			}
			AddressManager::Single(_) => None,
		}
	}

	/// Returns the master-relative private key for `index`, given the
	/// account's master private key. Deterministic chains derive
	/// `master.child(chain).child(index)`; the single-address chain
	/// returns the master key directly, with no derivation.
	pub fn get_private_key(&self, master: &crate::keys::PrivateKey, index: u32) -> Result<crate::keys::PrivateKey> {
		match self {
			AddressManager::Deterministic(d) => master.child(d.chain_number as u32)?.child(index),
			AddressManager::Single(_) => Ok(master.clone()),
		}
	}

	pub async fn get_address_records(
		&self,
		db: &Database,
		account_address: &str,
		limit: Option<u32>,
		only_usable: bool,
	) -> Result<Vec<AddressRecord>> {
		match self {
			AddressManager::Deterministic(d) => {
				db.get_addresses(
					Some(account_address.to_owned()),
					Some(d.chain_number),
					limit,
					only_usable.then_some(d.maximum_uses_per_address as i64),
					Some("used_times ASC, position ASC".to_owned()),
				)
				.await
			}
			AddressManager::Single(s) => {
				db.get_addresses(Some(account_address.to_owned()), Some(s.chain_number), limit, None, None).await
			}
		}
	}

	pub async fn get_addresses(
		&self,
		db: &Database,
		account_address: &str,
		limit: Option<u32>,
		only_usable: bool,
	) -> Result<Vec<String>> {
		let records = self.get_address_records(db, account_address, limit, only_usable).await?;
		Ok(records.into_iter().map(|r| r.address).collect())
	}

	pub async fn get_or_create_usable_address(&self, db: &Database, account_address: &str) -> Result<String> {
		let addresses = self.get_addresses(db, account_address, Some(1), true).await?;
		if let Some(address) = addresses.into_iter().next() {
			return Ok(address);
		}
		let generated = self.ensure_address_gap(db, account_address).await?;
		// `ensure_address_gap` always generates at least one address when
		// there were zero usable ones, for both variants.
		Ok(generated.into_iter().next().expect("ensure_address_gap generated no addresses"))
	}

	/// See spec §4.2: keeps the tail of the chain at least `gap`
	/// consecutive never-used addresses deep. No-op for the single-address
	/// variant once its one row exists.
	pub async fn ensure_address_gap(&self, db: &Database, account_address: &str) -> Result<Vec<String>> {
		match self {
			AddressManager::Deterministic(d) => {
				let addresses = db
					.get_addresses(
						Some(account_address.to_owned()),
						Some(d.chain_number),
						Some(d.gap),
						None,
						Some("position DESC".to_owned()),
					)
					.await?;

				let mut existing_gap = 0u32;
				for address in &addresses {
					if address.used_times == 0 {
						existing_gap += 1;
					} else {
						break;
					}
				}

				if existing_gap >= d.gap {
					return Ok(Vec::new());
				}

				let start = addresses.first().map(|a| a.position + 1).unwrap_or(0);
				let end = start + (d.gap - existing_gap) as i64 - 1;
				self.generate_keys(db, account_address, d, start, end).await
			}
			AddressManager::Single(s) => {
				let existing = db.get_addresses(Some(account_address.to_owned()), Some(s.chain_number), None, None, None).await?;
				if !existing.is_empty() {
					return Ok(Vec::new());
				}
				let address = s.public_key.address().to_string();
				db.add_keys(account_address.to_owned(), s.chain_number, vec![(0, s.public_key.pubkey_bytes(), address.clone())])
					.await?;
				Ok(vec![address])
			}
		}
	}

	async fn generate_keys(
		&self,
		db: &Database,
		account_address: &str,
		chain: &DeterministicChain,
		start: i64,
		end: i64,
	) -> Result<Vec<String>> {
		debug!(account = %account_address, chain = chain.chain_number, start, end, "generating addresses");
		let mut keys = Vec::new();
		let mut addresses = Vec::new();
		for index in start..=end {
			let child = chain.public_key.child(index as u32)?;
			let address = child.address().to_string();
			keys.push((index, child.pubkey_bytes(), address.clone()));
			addresses.push(address);
		}
		db.add_keys(account_address.to_owned(), chain.chain_number, keys).await?;
		Ok(addresses)
	}

	/// The largest run of never-used addresses found scanning the chain by
	/// position ascending. A trailing unused run is deliberately not
	/// counted — see SPEC_FULL §9, "Open questions".
	pub async fn get_max_gap(&self, db: &Database, account_address: &str) -> Result<u32> {
		match self {
			AddressManager::Deterministic(d) => {
				let addresses = db
					.get_addresses(
						Some(account_address.to_owned()),
						Some(d.chain_number),
						None,
						None,
						Some("position ASC".to_owned()),
					)
					.await?;
				let mut max_gap = 0u32;
				let mut current_gap = 0u32;
				for address in &addresses {
					if address.used_times == 0 {
						current_gap += 1;
					} else {
						max_gap = max_gap.max(current_gap);
						current_gap = 0;
					}
				}
				Ok(max_gap)
			}
			AddressManager::Single(_) => Ok(0),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::PrivateKey;
	use bitcoin::Network;

	async fn fixture() -> (Database, PublicKey) {
		let db = Database::open(":memory:").await.unwrap();
		let master = PrivateKey::from_seed(Network::Regtest, &[3u8; 32]).unwrap();
		(db, master.public_key())
	}

	#[tokio::test]
	async fn fresh_deterministic_receiving_gap_fills_to_twenty() {
		let (db, master) = fixture().await;
		let (receiving, _change) = AddressManager::deterministic_pair(&master, None, None).unwrap();
		let account_address = master.address().to_string();

		let generated = receiving.ensure_address_gap(&db, &account_address).await.unwrap();
		assert_eq!(generated.len(), 20);

		let again = receiving.ensure_address_gap(&db, &account_address).await.unwrap();
		assert!(again.is_empty());
	}

	#[tokio::test]
	async fn marking_an_address_used_triggers_one_more_key() {
		let (db, master) = fixture().await;
		let (receiving, _change) = AddressManager::deterministic_pair(&master, None, None).unwrap();
		let account_address = master.address().to_string();
		receiving.ensure_address_gap(&db, &account_address).await.unwrap();

		let records = receiving.get_address_records(&db, &account_address, None, false).await.unwrap();
		let addr5 = records.iter().find(|r| r.position == 5).unwrap().address.clone();
		db.set_address_history(addr5, "a:1:b:2".to_owned()).await.unwrap();

		assert_eq!(receiving.get_max_gap(&db, &account_address).await.unwrap(), 5);

		let generated = receiving.ensure_address_gap(&db, &account_address).await.unwrap();
		assert_eq!(generated.len(), 1);
	}

	#[tokio::test]
	async fn single_address_manager_generates_at_most_one_key() {
		let (db, master) = fixture().await;
		let manager = AddressManager::single(&master);
		let account_address = master.address().to_string();

		let first = manager.ensure_address_gap(&db, &account_address).await.unwrap();
		assert_eq!(first.len(), 1);
		let second = manager.ensure_address_gap(&db, &account_address).await.unwrap();
		assert!(second.is_empty());
		assert_eq!(manager.get_max_gap(&db, &account_address).await.unwrap(), 0);
	}
}
