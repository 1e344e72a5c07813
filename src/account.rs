//! Account (C3).
//!
//! Aggregates two [`AddressManager`]s (receiving, change), owns the master
//! key pair, handles seed/encryption, serializes to/from a portable record,
//! and implements balance/UTXO queries and funding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::address_manager::{AddressManager, GeneratorDescriptor};
use crate::db::constraints::ConstraintSet;
use crate::domain::{Chain, Utxo};
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::ledger::{BuiltTransaction, Ledger, Mnemonic, PayOutput, TxBuildSpec, WalletRegistry};
use crate::reservation::ReservationGuard;

#[derive(Debug, Clone)]
enum PrivateKeyState {
	Plain(PrivateKey),
	Ciphertext(String),
}

#[derive(Debug, Clone)]
enum SeedState {
	Plain(String),
	Ciphertext(String),
}

/// The portable record an account serializes to/from. `ledger` is an
/// identifier only; this crate does not resolve it back to a live `Ledger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDescriptor {
	pub ledger: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub seed: String,
	#[serde(default)]
	pub encrypted: bool,
	#[serde(default)]
	pub private_key: String,
	pub public_key: String,
	#[serde(default)]
	pub address_generator: GeneratorDescriptor,
}

pub struct MaxGap {
	pub max_receiving_gap: u32,
	pub max_change_gap: u32,
}

/// Parameters for [`Account::fund`].
pub struct FundRequest {
	pub amount: Option<u64>,
	pub outputs: u32,
	pub everything: bool,
	pub broadcast: bool,
	pub constraints: ConstraintSet,
}

impl Default for FundRequest {
	fn default() -> FundRequest {
		FundRequest { amount: None, outputs: 1, everything: false, broadcast: false, constraints: ConstraintSet::new() }
	}
}

pub struct Account<L: Ledger> {
	ledger: Arc<L>,
	name: String,
	seed: Option<SeedState>,
	encrypted: bool,
	private_key: Option<PrivateKeyState>,
	public_key: PublicKey,
	master_address: String,
	receiving: AddressManager,
	change: AddressManager,
}

impl<L: Ledger> Account<L> {
	/// Generates a brand new account from a freshly made mnemonic seed.
	pub fn generate<M: Mnemonic>(
		ledger: Arc<L>,
		wallet: &dyn WalletRegistry,
		name: Option<String>,
		address_generator: Option<GeneratorDescriptor>,
	) -> Result<Account<L>> {
		let descriptor = AccountDescriptor {
			ledger: ledger.id(),
			name: name.unwrap_or_default(),
			seed: M::make_seed(),
			encrypted: false,
			private_key: String::new(),
			public_key: String::new(),
			address_generator: address_generator.unwrap_or_default(),
		};
		Self::from_descriptor::<M>(ledger, wallet, descriptor)
	}

	/// Resolution order when not encrypted: `seed` first, then
	/// `private_key`, then `public_key` (watch-only). When encrypted, the
	/// key material stays ciphertext and `public_key` always carries the
	/// cleartext extended public key.
	pub fn from_descriptor<M: Mnemonic>(
		ledger: Arc<L>,
		wallet: &dyn WalletRegistry,
		d: AccountDescriptor,
	) -> Result<Account<L>> {
		let network = ledger_network(&ledger);

		let (seed, private_key, public_key) = if !d.encrypted {
			if !d.seed.is_empty() {
				let entropy = M::mnemonic_to_seed(&d.seed, "");
				let priv_key = PrivateKey::from_seed(network, &entropy)?;
				(Some(SeedState::Plain(d.seed.clone())), Some(PrivateKeyState::Plain(priv_key.clone())), priv_key.public_key())
			} else if !d.private_key.is_empty() {
				let priv_key = PrivateKey::from_extended_key_string(&d.private_key)?;
				(None, Some(PrivateKeyState::Plain(priv_key.clone())), priv_key.public_key())
			} else {
				(None, None, PublicKey::from_extended_key_string(&d.public_key)?)
			}
		} else {
			let seed = (!d.seed.is_empty()).then(|| SeedState::Ciphertext(d.seed.clone()));
			let private_key = (!d.private_key.is_empty()).then(|| PrivateKeyState::Ciphertext(d.private_key.clone()));
			(seed, private_key, PublicKey::from_extended_key_string(&d.public_key)?)
		};

		let master_address = public_key.address().to_string();
		let name = if d.name.is_empty() { format!("Account #{}", master_address) } else { d.name.clone() };

		let (receiving, change) = match &d.address_generator {
			GeneratorDescriptor::DeterministicChain { receiving, change } => {
				AddressManager::deterministic_pair(&public_key, *receiving, *change)?
			}
			GeneratorDescriptor::SingleAddress => {
				let single = AddressManager::single(&public_key);
				(single.clone(), single)
			}
		};

		wallet.add_account(&master_address);
		info!(account = %master_address, name = %name, "account registered");

		Ok(Account { ledger, name, seed, encrypted: d.encrypted, private_key, public_key, master_address, receiving, change })
	}

	pub fn to_descriptor(&self) -> AccountDescriptor {
		let private_key = match &self.private_key {
			Some(PrivateKeyState::Plain(p)) => p.extended_key_string(),
			Some(PrivateKeyState::Ciphertext(c)) => c.clone(),
			None => String::new(),
		};
		let seed = match &self.seed {
			Some(SeedState::Plain(s)) => s.clone(),
			Some(SeedState::Ciphertext(c)) => c.clone(),
			None => String::new(),
		};
		let address_generator = match (&self.receiving, &self.change) {
			(AddressManager::Deterministic(_), _) => GeneratorDescriptor::DeterministicChain {
				receiving: self.receiving.to_descriptor_instance(),
				change: self.change.to_descriptor_instance(),
			},
			(AddressManager::Single(_), _) => GeneratorDescriptor::SingleAddress,
		};
		AccountDescriptor {
			ledger: self.ledger.id(),
			name: self.name.clone(),
			seed,
			encrypted: self.encrypted,
			private_key,
			public_key: self.public_key.extended_key_string(),
			address_generator,
		}
	}

	pub fn master_address(&self) -> &str {
		&self.master_address
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_encrypted(&self) -> bool {
		self.encrypted
	}

	pub fn is_watch_only(&self) -> bool {
		self.private_key.is_none()
	}

	pub fn encrypt(&mut self, password: &[u8]) -> Result<()> {
		if self.encrypted {
			return Err(Error::AlreadyEncrypted);
		}
		let plain_priv = match &self.private_key {
			Some(PrivateKeyState::Plain(p)) => p.clone(),
			Some(PrivateKeyState::Ciphertext(_)) => unreachable!("ciphertext while not encrypted"),
			None => return Err(Error::WatchOnly),
		};
		let plain_seed = match &self.seed {
			Some(SeedState::Plain(s)) => s.clone(),
			Some(SeedState::Ciphertext(_)) => unreachable!("ciphertext while not encrypted"),
			None => String::new(),
		};

		let secret = crate::keys::double_sha256(password);
		let seed_cipher = crate::keys::aes_encrypt(&secret, &plain_seed);
		let priv_cipher = crate::keys::aes_encrypt(&secret, &plain_priv.extended_key_string());

		self.seed = Some(SeedState::Ciphertext(seed_cipher));
		self.private_key = Some(PrivateKeyState::Ciphertext(priv_cipher));
		self.encrypted = true;
		Ok(())
	}

	pub fn decrypt(&mut self, password: &[u8]) -> Result<()> {
		if !self.encrypted {
			return Err(Error::AlreadyDecrypted);
		}
		let secret = crate::keys::double_sha256(password);

		let seed_plain = match &self.seed {
			Some(SeedState::Ciphertext(c)) => crate::keys::aes_decrypt(&secret, c)?,
			_ => String::new(),
		};
		let priv_plain = match &self.private_key {
			Some(PrivateKeyState::Ciphertext(c)) => {
				let s = crate::keys::aes_decrypt(&secret, c)?;
				PrivateKey::from_extended_key_string(&s)?
			}
			_ => return Err(Error::WatchOnly),
		};

		self.seed = if seed_plain.is_empty() { None } else { Some(SeedState::Plain(seed_plain)) };
		self.private_key = Some(PrivateKeyState::Plain(priv_plain));
		self.encrypted = false;
		Ok(())
	}

	pub async fn ensure_address_gap(&self) -> Result<Vec<String>> {
		let mut addresses = self.receiving.ensure_address_gap(self.ledger.db(), &self.master_address).await?;
		if !matches!((&self.receiving, &self.change), (AddressManager::Single(_), AddressManager::Single(_))) {
			addresses.extend(self.change.ensure_address_gap(self.ledger.db(), &self.master_address).await?);
		}
		Ok(addresses)
	}

	pub async fn get_addresses(&self, limit: Option<u32>, max_used_times: Option<i64>) -> Result<Vec<String>> {
		let records = self
			.ledger
			.db()
			.get_addresses(Some(self.master_address.clone()), None, limit, max_used_times, None)
			.await?;
		Ok(records.into_iter().map(|r| r.address).collect())
	}

	pub fn get_private_key(&self, chain: Chain, index: u32) -> Result<PrivateKey> {
		if self.encrypted {
			return Err(Error::AccountEncrypted);
		}
		let master = match &self.private_key {
			Some(PrivateKeyState::Plain(p)) => p,
			_ => return Err(Error::WatchOnly),
		};
		let manager = match chain {
			Chain::Receiving => &self.receiving,
			Chain::Change => &self.change,
		};
		manager.get_private_key(master, index)
	}

	/// `confirmations = 0` leaves the height filter untouched (mempool and
	/// confirmed outputs both count); otherwise adds `height__lte` /
	/// `height__gt` constraints derived from the ledger's tip.
	pub async fn get_balance(&self, confirmations: u32, mut constraints: ConstraintSet) -> Result<i64> {
		if confirmations > 0 {
			let height = self.ledger.tip_height() - (confirmations as i64 - 1);
			constraints = constraints.lte("height", height).gt("height", 0i64);
		}
		self.ledger.db().get_balance_for_account(self.master_address.clone(), false, constraints).await
	}

	pub async fn get_max_gap(&self) -> Result<MaxGap> {
		let max_change_gap = self.change.get_max_gap(self.ledger.db(), &self.master_address).await?;
		let max_receiving_gap = self.receiving.get_max_gap(self.ledger.db(), &self.master_address).await?;
		Ok(MaxGap { max_change_gap, max_receiving_gap })
	}

	pub async fn get_unspent_outputs(&self, constraints: ConstraintSet) -> Result<Vec<Utxo>> {
		self.ledger.db().get_utxos_for_account(self.master_address.clone(), constraints).await
	}

	/// Builds (and optionally broadcasts) a transaction funding `to`.
	///
	/// *Everything mode* (`req.everything`): sweeps all UTXOs matching
	/// `req.constraints` into `to`, with no explicit outputs (the ledger's
	/// builder treats the destination as the change account so it absorbs
	/// the full value). *Amount mode*: emits `req.outputs` equal P2PKH
	/// outputs of `req.amount / req.outputs` each to a usable address on
	/// `to`'s change chain, funding and change both from `self`.
	///
	/// Whatever the builder reports as reserved in
	/// [`BuiltTransaction::reserved_utxos`] — `self`'s explicit inputs in
	/// everything mode, or whatever it drew from `funding_accounts` in
	/// amount mode — is released in full when `req.broadcast` is false.
	pub async fn fund(&self, to: &Account<L>, req: FundRequest) -> Result<L::Transaction> {
		if self.ledger.id() != to.ledger.id() {
			return Err(Error::CrossLedgerFunding);
		}

		let (spec, mut guard) = if req.everything {
			let utxos = self.get_unspent_outputs(req.constraints).await?;
			self.ledger.reserve_outputs(&utxos).await?;
			let guard = ReservationGuard::new(self.ledger.db().clone(), &utxos);

			let spec = TxBuildSpec {
				inputs: utxos,
				outputs: Vec::new(),
				funding_accounts: vec![self.master_address.clone()],
				change_account: to.master_address.clone(),
			};
			(spec, Some(guard))
		} else {
			let amount = req.amount.ok_or(Error::NonPositiveAmount)?;
			if amount == 0 {
				return Err(Error::NonPositiveAmount);
			}
			let to_address = to.change.get_or_create_usable_address(self.ledger.db(), &to.master_address).await?;
			let to_hash160 = self.ledger.address_to_hash160(&to_address).await?;
			let each = amount / req.outputs as u64;
			let spec = TxBuildSpec {
				inputs: Vec::new(),
				outputs: (0..req.outputs).map(|_| PayOutput { amount: each, hash160: to_hash160 }).collect(),
				funding_accounts: vec![self.master_address.clone()],
				change_account: self.master_address.clone(),
			};
			(spec, None)
		};

		// the guard protects `spec.inputs`, already reserved above, against a
		// panic or early return from `build_transaction`; only disarm it once
		// the build has actually succeeded.
		let BuiltTransaction { transaction, reserved_utxos } = self.ledger.build_transaction(spec).await?;
		if let Some(guard) = &mut guard {
			guard.disarm();
		}

		if req.broadcast {
			self.ledger.broadcast(&transaction).await?;
		} else if !reserved_utxos.is_empty() {
			self.ledger.release_outputs(&reserved_utxos).await?;
		}

		Ok(transaction)
	}
}

// `Ledger` does not expose a `Network`; extended-key strings carry their own
// network byte, so only a fresh `seed` needs one tagged on here. Deployments
// on a non-mainnet network should generate from an explicit `private_key` /
// `public_key` string rather than `seed`.
fn ledger_network<L: Ledger>(_ledger: &Arc<L>) -> bitcoin::Network {
	bitcoin::Network::Bitcoin
}
