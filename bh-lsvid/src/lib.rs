// Copyright (C) 2020-2026  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate implements the Lightweight SVID (LSVID), a nested, chain-signed
//! identity token.
//!
//! # Details
//!
//! An LSVID is a [`Token`] whose optional `nested` field holds the previous
//! link of the chain. Every link carries a [`Payload`] with `iss`, `sub` and
//! `aud` identity claims and a signature over the link without its signature.
//! A link is bound to the one it wraps by requiring its issuer to be the
//! audience of the nested link.
//!
//! The main operations are the following.
//!
//! * [`Token::issue`] -- Sign a root token, the trust anchor of a chain.
//! * [`Token::extend`] -- Append a new signed link on top of an existing token.
//! * [`Token::encode`] & [`Token::decode`] -- Convert to and from the transport
//!   string form (base64url of the JSON serialization, without padding).
//! * [`validate`] -- Walk the chain and verify every link.
//!
//! Signing is done through the [`Signer`] trait. An [`openssl`] backed ECDSA
//! implementation is provided by [`EcdsaSigner`].
//!
//! # Examples
//!
//! ```
//! use bh_lsvid::{validate, EcdsaSigner, IdClaim, Payload, Token, Validation};
//!
//! let workload_key = EcdsaSigner::generate().unwrap();
//! let gateway_key = EcdsaSigner::generate().unwrap();
//! let workload_pk = workload_key.public_key_der().unwrap();
//! let gateway_pk = gateway_key.public_key_der().unwrap();
//!
//! // The root link is signed by the workload and names the gateway as audience.
//! let root = Token::issue(
//!     Payload::new(
//!         IdClaim::with_public_key("spiffe://example.org/workload", workload_pk.clone()),
//!         IdClaim::with_public_key("spiffe://example.org/workload", workload_pk),
//!         IdClaim::new("spiffe://example.org/gateway"),
//!         1_700_000_000,
//!     ),
//!     &workload_key,
//! )
//! .unwrap();
//!
//! // The gateway extends the chain towards the backend.
//! let extended = root
//!     .extend(
//!         Payload::new(
//!             IdClaim::with_public_key("spiffe://example.org/gateway", gateway_pk),
//!             IdClaim::new("spiffe://example.org/workload"),
//!             IdClaim::new("spiffe://example.org/backend"),
//!             1_700_000_001,
//!         ),
//!         &gateway_key,
//!     )
//!     .unwrap();
//!
//! let decoded = Token::decode(&extended).unwrap();
//! assert_eq!(validate(&decoded).unwrap(), Validation::Valid);
//! ```

mod certificate;
mod codec;
mod crypto;
mod error;
mod extend;
mod models;
mod utils;
mod validate;

pub use crypto::*;
pub use error::*;
pub use models::*;
pub use utils::*;
pub use validate::*;

/// Maximum height of a token tree, counting both `nested` links and tokens
/// embedded in identity claims.
///
/// Decoding rejects deeper trees, and validation never walks past this
/// bound.
pub const MAX_CHAIN_DEPTH: usize = 32;

/// Payload schema version produced by this crate.
pub const PAYLOAD_VERSION: i8 = 1;
