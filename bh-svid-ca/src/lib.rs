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

//! This crate implements the signing core of a SPIFFE server certificate
//! authority.
//!
//! # Details
//!
//! The [`Ca`] holds the current signing material in a [`KeyStore`]: an
//! [`X509Ca`] for X.509 SVIDs and a [`JwtKey`] for LSVIDs. Both can be
//! rotated at any time while issuance requests are being served. Every
//! request works with the snapshot that was current when it started.
//!
//! The operations are exposed through the [`ServerCa`] trait.
//!
//! * [`ServerCa::sign_x509_svid`] -- Issue a leaf X.509 SVID.
//! * [`ServerCa::sign_x509_ca_svid`] -- Issue a CA certificate for a
//!   downstream server.
//! * [`ServerCa::sign_lsvid`] -- Sign payloads into a compact LSVID.
//! * [`ServerCa::jwt_public_key`] & [`ServerCa::x509_public_key`] -- Public
//!   keys of the current signing material.
//!
//! Issued lifetimes never exceed that of the CA certificate.
//!
//! # Examples
//!
//! ```
//! use bh_svid_ca::{
//!     Ca, CaConfig, DistinguishedName, EcdsaSigner, ServerCa, Signer as _, X509Ca, X509SvidParams,
//! };
//! use iref::UriBuf;
//!
//! let ca = Ca::new(CaConfig::new("example.org"));
//!
//! let subject = DistinguishedName {
//!     common_name: Some("Example CA".to_owned()),
//!     ..Default::default()
//! };
//! let x509_ca =
//!     X509Ca::self_signed("example.org", &subject, chrono::Duration::days(1), chrono::Utc::now())
//!         .unwrap();
//! let root = x509_ca.certificate().to_owned();
//! ca.set_x509_ca(x509_ca);
//!
//! let workload_key = EcdsaSigner::generate().unwrap();
//! let params = X509SvidParams::new(
//!     UriBuf::new("spiffe://example.org/workload".into()).unwrap(),
//!     workload_key.public_key().unwrap(),
//! );
//!
//! let chain = ca.sign_x509_svid(params).unwrap();
//! chain.verify_against_trusted_roots(&[root]).unwrap();
//! ```

mod ca;
mod chain;
mod compact;
mod config;
mod error;
mod keys;
mod template;

pub use bh_lsvid::{EcdsaSigner, Signer, Validation};
pub use ca::*;
pub use chain::*;
pub use compact::*;
pub use config::*;
pub use error::*;
pub use keys::*;
pub use template::{DistinguishedName, DEFAULT_SUBJECT_COUNTRY, DEFAULT_SUBJECT_ORGANIZATION};
