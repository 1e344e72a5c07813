// Rust Bitcoin Wallet
// Written in 2019 by
//   Steven Roose <steven@stevenroose.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the CC0 Public Domain Dedication
// along with this software.
// If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
//

//! # HD Wallet Core
//!
//! The account core of a hierarchical-deterministic UTXO wallet: address-gap
//! discovery over two BIP-32 chains (or a single watch-address), a SQLite
//! state store with atomic transaction ingestion, and UTXO-reserving funding.
//!
//! Mnemonic word-list encoding, secp256k1/BIP-32 primitives, address
//! encoding, transaction serialization, script interpretation beyond
//! output-pattern detection, and block-header tracking are all treated as
//! external collaborators — either consumed directly from the `bitcoin` and
//! `secp256k1` crates, or reached through the narrow traits in [`ledger`].

// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate lazy_static;

pub mod account;
pub mod address_manager;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod reservation;

lazy_static! {
	pub(crate) static ref SECP: secp256k1::Secp256k1<secp256k1::All> = secp256k1::Secp256k1::new();
}
