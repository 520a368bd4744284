//! Wallet signing
//!
//! The signer module is the only place private key material exists.

mod signer;

pub use signer::Signer;
