//! Key derivation facade (C1).
//!
//! Wraps `bitcoin`/`secp256k1` BIP-32 primitives behind a narrow interface:
//! deriving child keys, exporting/importing extended-key strings, and
//! symmetrically encrypting the extended private key for at-rest storage.
//! Elliptic-curve arithmetic and BIP-32 itself are entirely delegated to
//! `bitcoin::bip32`; this module never reimplements them.

use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, PubkeyHash};
use rand::RngCore;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// `double_sha256(password)`, used as the symmetric key for extended-key
/// encryption. No additional key-stretching is performed by this layer.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
	let hash = bitcoin::hashes::sha256d::Hash::hash(data);
	*hash.as_byte_array()
}

/// AES-256-GCM encrypt `plaintext`, returning `hex(nonce || ciphertext)`.
pub fn aes_encrypt(secret: &[u8; 32], plaintext: &str) -> String {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret));
	let mut nonce_bytes = [0u8; NONCE_LEN];
	rand::thread_rng().fill_bytes(&mut nonce_bytes);
	let nonce = Nonce::from_slice(&nonce_bytes);
	// encrypting with a freshly generated key/nonce pair never fails.
	let ciphertext = cipher.encrypt(nonce, plaintext.as_bytes()).expect("aes encrypt");
	let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
	out.extend_from_slice(&nonce_bytes);
	out.extend_from_slice(&ciphertext);
	hex::encode(out)
}

/// Inverse of [`aes_encrypt`].
pub fn aes_decrypt(secret: &[u8; 32], ciphertext_hex: &str) -> Result<String> {
	let raw = hex::decode(ciphertext_hex).map_err(|_| Error::DecryptionFailed)?;
	if raw.len() < NONCE_LEN {
		return Err(Error::DecryptionFailed);
	}
	let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret));
	let nonce = Nonce::from_slice(nonce_bytes);
	let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| Error::DecryptionFailed)?;
	String::from_utf8(plaintext).map_err(|_| Error::DecryptionFailed)
}

/// A BIP-32 private key node, wrapping `bitcoin::bip32::Xpriv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey {
	xpriv: Xpriv,
}

impl PrivateKey {
	pub fn from_seed(network: Network, seed: &[u8]) -> Result<PrivateKey> {
		Ok(PrivateKey { xpriv: Xpriv::new_master(network, seed)? })
	}

	/// Non-hardened child derivation, one level down.
	pub fn child(&self, index: u32) -> Result<PrivateKey> {
		let secp = &crate::SECP;
		let cn = ChildNumber::from_normal_idx(index)?;
		Ok(PrivateKey { xpriv: self.xpriv.ckd_priv(secp, cn)? })
	}

	pub fn public_key(&self) -> PublicKey {
		let secp = &crate::SECP;
		PublicKey { xpub: Xpub::from_priv(secp, &self.xpriv) }
	}

	pub fn network(&self) -> Network {
		self.xpriv.network
	}

	pub fn extended_key_string(&self) -> String {
		self.xpriv.to_string()
	}

	pub fn from_extended_key_string(s: &str) -> Result<PrivateKey> {
		let xpriv = Xpriv::from_str(s).map_err(|_| Error::InvalidExtendedKey(s.to_owned()))?;
		Ok(PrivateKey { xpriv })
	}
}

/// A BIP-32 public key node, wrapping `bitcoin::bip32::Xpub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
	xpub: Xpub,
}

impl PublicKey {
	pub fn child(&self, index: u32) -> Result<PublicKey> {
		let secp = &crate::SECP;
		let cn = ChildNumber::from_normal_idx(index)?;
		Ok(PublicKey { xpub: self.xpub.ckd_pub(secp, cn)? })
	}

	fn bitcoin_public_key(&self) -> bitcoin::PublicKey {
		bitcoin::PublicKey::new(self.xpub.public_key)
	}

	/// The canonical P2PKH address for this key, on the network the key was
	/// derived for.
	pub fn address(&self) -> Address {
		Address::p2pkh(self.bitcoin_public_key(), self.xpub.network)
	}

	/// The hash160 of the compressed public key, as used in P2PKH scripts.
	pub fn pubkey_hash(&self) -> PubkeyHash {
		self.bitcoin_public_key().pubkey_hash()
	}

	pub fn pubkey_bytes(&self) -> Vec<u8> {
		self.bitcoin_public_key().to_bytes()
	}

	pub fn extended_key_string(&self) -> String {
		self.xpub.to_string()
	}

	pub fn from_extended_key_string(s: &str) -> Result<PublicKey> {
		let xpub = Xpub::from_str(s).map_err(|_| Error::InvalidExtendedKey(s.to_owned()))?;
		Ok(PublicKey { xpub })
	}
}
