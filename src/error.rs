//! Error model for the wallet account core.
//!
//! Precondition violations (encrypt/decrypt misuse, funding across ledgers,
//! private-key access on a watch-only or encrypted account) are hard failures.
//! Data-dependent absences, such as an unknown txid, are represented as
//! `Option`/empty `Vec` rather than errors. External failures from BIP-32,
//! secp256k1 and SQLite propagate unchanged via `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("key is already encrypted")]
	AlreadyEncrypted,

	#[error("key is not encrypted")]
	AlreadyDecrypted,

	#[error("cannot get private key on encrypted wallet account")]
	AccountEncrypted,

	#[error("account has no private key material (watch-only account)")]
	WatchOnly,

	#[error("an amount is required")]
	NonPositiveAmount,

	#[error("can only transfer between accounts of the same ledger")]
	CrossLedgerFunding,

	#[error("invalid extended key string: {0}")]
	InvalidExtendedKey(String),

	#[error("decryption failed")]
	DecryptionFailed,

	#[error("BIP-32 error: {0}")]
	Bip32(#[from] bitcoin::bip32::Error),

	#[error("secp256k1 error: {0}")]
	Secp256k1(#[from] secp256k1::Error),

	#[error("database error: {0}")]
	Database(#[from] rusqlite::Error),

	#[error("background task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
