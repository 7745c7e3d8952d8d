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

//! The compact LSVID form signed by the CA.
//!
//! A compact token is a sequence of `payload.signature` pairs joined by `.`,
//! where `payload` is the `base64url` encoding of a caller supplied string
//! and `signature` is the `base64url` encoded signature over the SHA-256 of
//! the *encoded* payload.

use bh_lsvid::{base64_url_decode, base64_url_encode, digest, verify_digest, Signer, Validation};
use bherror::traits::{ErrorContext as _, ForeignBoxed as _, ForeignError as _, PropagateError as _};
use openssl::pkey::{PKeyRef, Public};

use crate::{Error, Result};

const SEPARATOR: char = '.';

/// One `payload.signature` pair of a compact token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactSegment {
    /// The decoded payload.
    pub payload: String,
    /// The raw signature.
    pub signature: Vec<u8>,
    encoded_payload: String,
}

impl CompactSegment {
    /// Verify the signature of this pair.
    pub fn verify(&self, public_key: &PKeyRef<Public>) -> Result<bool> {
        verify_digest(public_key, &digest(self.encoded_payload.as_bytes()), &self.signature)
            .with_err(|| Error::Signing)
    }
}

/// Sign every payload with `signer` and join the pairs in input order.
///
/// Fails with [`Error::EmptyInput`] if there are no payloads.
pub fn sign_compact<S, P>(signer: &S, payloads: &[P]) -> Result<String>
where
    S: Signer + ?Sized,
    P: AsRef<str>,
{
    if payloads.is_empty() {
        return Err(bherror::Error::root(Error::EmptyInput));
    }

    let mut segments = Vec::with_capacity(payloads.len());
    for (i, payload) in payloads.iter().enumerate() {
        let encoded_payload = base64_url_encode(payload.as_ref());
        let signature = signer
            .sign_digest(&digest(encoded_payload.as_bytes()))
            .foreign_boxed_err(|| Error::Signing)
            .ctx(|| format!("payload {} of {}", i + 1, payloads.len()))?;

        tracing::debug!(
            index = i + 1,
            total = payloads.len(),
            "Signed compact LSVID payload"
        );

        segments.push(format!(
            "{encoded_payload}{SEPARATOR}{}",
            base64_url_encode(signature)
        ));
    }

    Ok(segments.join(&SEPARATOR.to_string()))
}

/// Split a compact token into its pairs, decoding payloads and signatures.
///
/// No signature is checked here; see [`verify_compact`].
pub fn decode_compact(token: &str) -> Result<Vec<CompactSegment>> {
    if token.is_empty() {
        return Err(bherror::Error::root(Error::MalformedCompactToken)).ctx(|| "empty token");
    }

    let parts: Vec<&str> = token.split(SEPARATOR).collect();
    if parts.len() % 2 != 0 {
        return Err(bherror::Error::root(Error::MalformedCompactToken))
            .ctx(|| format!("odd number of segments: {}", parts.len()));
    }

    parts
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let (encoded_payload, signature) = (pair[0], pair[1]);

            let payload = base64_url_decode(encoded_payload)
                .foreign_err(|| Error::MalformedCompactToken)
                .and_then(|payload| {
                    String::from_utf8(payload).foreign_err(|| Error::MalformedCompactToken)
                })
                .ctx(|| format!("invalid payload {i}"))?;
            let signature = base64_url_decode(signature)
                .foreign_err(|| Error::MalformedCompactToken)
                .ctx(|| format!("invalid signature {i}"))?;

            Ok(CompactSegment {
                payload,
                signature,
                encoded_payload: encoded_payload.to_owned(),
            })
        })
        .collect()
}

/// Verify every pair of a compact token against `public_key`.
///
/// A well-formed token whose signature does not verify yields
/// [`Validation::Rejected`] with the index of the first failing pair.
pub fn verify_compact(token: &str, public_key: &PKeyRef<Public>) -> Result<Validation> {
    for (depth, segment) in decode_compact(token)?.iter().enumerate() {
        if !segment.verify(public_key)? {
            return Ok(Validation::Rejected { depth });
        }
    }

    Ok(Validation::Valid)
}
