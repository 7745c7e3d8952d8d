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
///
/// A cryptographically rejected signature is **not** an error; see
/// [`Validation::Rejected`][crate::Validation::Rejected].
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum Error {
    /// The token could not be serialized into its transport form.
    #[strum(to_string = "Failed to encode LSVID")]
    Encoding,
    /// The input is not valid base64url or does not hold a well-formed token.
    #[strum(to_string = "Failed to decode LSVID")]
    Decoding,
    /// The signing input of a token could not be serialized.
    #[strum(to_string = "Failed to serialize LSVID signing input")]
    Serialization,
    /// The signing backend failed to produce a signature.
    #[strum(to_string = "Failed to sign LSVID")]
    Signing,
    /// The issuer of the link at the given depth is not the audience of the
    /// link it wraps.
    #[strum(to_string = "Aud -> Iss link validation failed at depth {0}")]
    LinkValidation(usize),
    /// No usable verification key could be found for the link at the given
    /// depth.
    #[strum(to_string = "Unable to resolve the verification key at depth {0}")]
    KeyResolution(usize),
    /// The token tree is deeper than the allowed maximum.
    #[strum(to_string = "Token tree exceeds the maximum depth of {0}")]
    ChainTooDeep(usize),
    /// A certificate does not carry a usable identity URI.
    #[strum(to_string = "Certificate has no identity URI")]
    InvalidIdentity,
    /// The key type is not supported by the signing or verification backend.
    #[strum(to_string = "Unsupported key type")]
    UnsupportedKey,
}

impl bherror::BhError for Error {}

/// The [`bherror::Result`] type with the error type of
/// [`lsvid::Error`](Error), used throughout this crate.
pub type Result<T> = bherror::Result<T, Error>;
