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

use bherror::traits::{ErrorContext as _, ForeignError as _};
use serde::{de::DeserializeOwned, Serialize};

use crate::{base64_url_decode, base64_url_encode, Error, Lsvid, Result, Token, MAX_CHAIN_DEPTH};

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).foreign_err(|| Error::Encoding)?;

    Ok(base64_url_encode(json))
}

fn decode_json<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let json = base64_url_decode(encoded)
        .foreign_err(|| Error::Decoding)
        .ctx(|| "invalid base64url")?;

    serde_json::from_slice(&json)
        .foreign_err(|| Error::Decoding)
        .ctx(|| "invalid JSON")
}

fn check_height(token: &Token) -> Result<()> {
    let height = token.height();
    if height > MAX_CHAIN_DEPTH {
        return Err(bherror::Error::root(Error::ChainTooDeep(MAX_CHAIN_DEPTH)))
            .ctx(|| format!("token tree has height {height}"));
    }
    Ok(())
}

impl Token {
    /// Serialize the token to its transport form: the `base64url` encoding,
    /// without padding, of its JSON serialization.
    pub fn encode(&self) -> Result<String> {
        encode_json(self)
    }

    /// Parse a token from its transport form.
    ///
    /// Trees taller than [`MAX_CHAIN_DEPTH`] are rejected with
    /// [`Error::ChainTooDeep`]. No signature is checked here; use
    /// [`validate`][crate::validate] for that.
    pub fn decode(encoded: &str) -> Result<Self> {
        let token: Token = decode_json(encoded)?;
        check_height(&token)?;

        Ok(token)
    }
}

impl Lsvid {
    /// Serialize the envelope the same way as [`Token::encode`].
    pub fn encode(&self) -> Result<String> {
        encode_json(self)
    }

    /// Parse an envelope, applying the [`Token::decode`] depth bound to both
    /// the token and the bundle.
    pub fn decode(encoded: &str) -> Result<Self> {
        let lsvid: Lsvid = decode_json(encoded)?;
        check_height(&lsvid.token)?;
        if let Some(bundle) = &lsvid.bundle {
            check_height(bundle)?;
        }

        Ok(lsvid)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{IdClaim, Payload};

    fn token(cn: &str) -> Token {
        Token {
            nested: None,
            payload: Payload::new(
                IdClaim::with_public_key(cn, vec![1, 2, 3]),
                IdClaim::new(cn),
                IdClaim::new("spiffe://example.org/aud"),
                1_700_000_000,
            ),
            signature: vec![4, 5, 6],
        }
    }

    fn tower(height: usize) -> Token {
        (1..height).fold(token("spiffe://example.org/0"), |nested, _| Token {
            nested: Some(Box::new(nested)),
            ..token("spiffe://example.org/n")
        })
    }

    #[test]
    fn decode_inverts_encode() {
        let root = token("spiffe://example.org/root");
        let outer = Token {
            nested: Some(Box::new(root)),
            ..token("spiffe://example.org/outer")
        };

        let encoded = outer.encode().unwrap();

        assert!(!encoded.contains('='));
        assert_eq!(Token::decode(&encoded).unwrap(), outer);
    }

    #[test]
    fn encoding_is_base64url_of_json() {
        let encoded = token("spiffe://example.org/a").encode().unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&base64_url_decode(&encoded).unwrap()).unwrap();

        assert_eq!(json["payload"]["alg"], "ES256");
        assert_eq!(json["payload"]["ver"], 1);
        assert_eq!(json["signature"], "BAUG");
    }

    #[test]
    fn invalid_input_is_a_decoding_error() {
        let wrong_shape = base64_url_encode("{\"payload\": 3}");
        for input in ["not base64!", "", wrong_shape.as_str()] {
            let error = Token::decode(input).unwrap_err();
            assert_matches!(error.error, Error::Decoding);
        }
    }

    #[test]
    fn depth_bound_is_enforced() {
        let encoded = tower(MAX_CHAIN_DEPTH).encode().unwrap();
        assert_eq!(Token::decode(&encoded).unwrap().chain_len(), MAX_CHAIN_DEPTH);

        let encoded = tower(MAX_CHAIN_DEPTH + 1).encode().unwrap();
        let error = Token::decode(&encoded).unwrap_err();
        assert_matches!(error.error, Error::ChainTooDeep(MAX_CHAIN_DEPTH));
    }

    #[test]
    fn envelope_round_trip() {
        let lsvid = Lsvid {
            token: token("spiffe://example.org/a"),
            bundle: Some(token("spiffe://example.org/bundle")),
        };

        let decoded = Lsvid::decode(&lsvid.encode().unwrap()).unwrap();
        assert_eq!(decoded, lsvid);

        let too_deep = Lsvid {
            token: token("spiffe://example.org/a"),
            bundle: Some(tower(MAX_CHAIN_DEPTH + 1)),
        };
        let error = Lsvid::decode(&too_deep.encode().unwrap()).unwrap_err();
        assert_matches!(error.error, Error::ChainTooDeep(_));
    }
}
