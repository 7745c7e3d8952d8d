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

/// Error returned by the crate API.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum Error {
    /// No X.509 CA is installed in the key store.
    #[strum(to_string = "X509 CA is not available for signing")]
    X509CaUnavailable,
    /// No JWT signing key is installed in the key store.
    #[strum(to_string = "Key is not available for signing")]
    KeyUnavailable,
    /// There was nothing to sign.
    #[strum(to_string = "No payloads to sign")]
    EmptyInput,
    /// The identity is not a SPIFFE ID of the configured trust domain.
    #[strum(to_string = "Invalid SPIFFE ID")]
    InvalidIdentity,
    /// Building or signing a certificate failed.
    #[strum(to_string = "Unable to create X509 SVID")]
    Certificate,
    /// The signing backend failed.
    #[strum(to_string = "Signing failed")]
    Signing,
    /// The certificate chain is invalid.
    #[strum(to_string = "Invalid certificate chain")]
    CertificateChain,
    /// The compact token is not a sequence of `payload.signature` pairs.
    #[strum(to_string = "Malformed compact LSVID")]
    MalformedCompactToken,
}

impl bherror::BhError for Error {}

/// The [`bherror::Result`] type with the error type of
/// [`svid_ca::Error`](Error), used throughout this crate.
pub type Result<T> = bherror::Result<T, Error>;
