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

//! Data model of the LSVID token.
//!
//! Field names and presence rules follow the wire format: absent optional
//! fields are omitted, and byte strings are carried as standard (padded)
//! base64 strings inside the JSON document.

use serde::{Deserialize, Serialize};

use crate::{SigningAlgorithm, PAYLOAD_VERSION};

/// Seconds since the Unix epoch.
pub type SecondsSinceEpoch = i64;

/// Top-level LSVID document, pairing a token with the trust bundle token it
/// chains to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lsvid {
    /// The LSVID token itself.
    pub token: Token,
    /// The trust bundle token, if one is distributed with the token.
    pub bundle: Option<Token>,
}

/// A single link of a signed LSVID chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// The previous link of the chain, absent for the root link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<Token>>,
    /// Claims of this link.
    pub payload: Payload,
    /// Signature over this token with the `signature` field absent.
    ///
    /// An empty signature is serialized as `null`.
    #[serde(default, with = "signature_bytes")]
    pub signature: Vec<u8>,
}

/// Claims of one link of the chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    /// Schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<i8>,
    /// Signature algorithm identifier, e.g. `ES256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Time of issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<SecondsSinceEpoch>,
    /// The party that signed this link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<IdClaim>,
    /// The party this link is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<IdClaim>,
    /// The party this link is meant for; the issuer of the next link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<IdClaim>,
}

/// Identity reference used by the `iss`, `sub` and `aud` claims.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdClaim {
    /// Identity name, e.g. `spiffe://example.org/workload`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cn: String,
    /// DER encoded `SubjectPublicKeyInfo` of the identity.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_bytes"
    )]
    pub pk: Option<Vec<u8>>,
    /// A complete token proving the identity, in place of a bare key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Box<Token>>,
}

impl IdClaim {
    /// Claim naming an identity, with no key material.
    pub fn new(cn: impl Into<String>) -> Self {
        Self {
            cn: cn.into(),
            ..Default::default()
        }
    }

    /// Claim naming an identity together with its DER encoded public key.
    pub fn with_public_key(cn: impl Into<String>, pk: Vec<u8>) -> Self {
        Self {
            cn: cn.into(),
            pk: Some(pk),
            id: None,
        }
    }

    /// Claim naming an identity that is proven by its own token chain.
    pub fn with_embedded_token(cn: impl Into<String>, id: Token) -> Self {
        Self {
            cn: cn.into(),
            pk: None,
            id: Some(Box::new(id)),
        }
    }
}

impl Payload {
    /// Construct a payload of the current schema version using the default
    /// signing algorithm.
    ///
    /// [`Token::issue`] and [`Token::extend`] replace `alg` with the
    /// algorithm of the signer.
    pub fn new(
        iss: IdClaim,
        sub: IdClaim,
        aud: IdClaim,
        issued_at: SecondsSinceEpoch,
    ) -> Self {
        Self {
            ver: Some(PAYLOAD_VERSION),
            alg: Some(SigningAlgorithm::Es256.to_string()),
            iat: Some(issued_at),
            iss: Some(iss),
            sub: Some(sub),
            aud: Some(aud),
        }
    }

    /// Height of the token trees embedded in the identity claims.
    fn embedded_height(&self) -> usize {
        [&self.iss, &self.sub, &self.aud]
            .into_iter()
            .flatten()
            .filter_map(|claim| claim.id.as_deref())
            .map(Token::height)
            .max()
            .unwrap_or(0)
    }
}

impl Token {
    /// Height of the token tree rooted at this token.
    ///
    /// A root token without embedded tokens has height 1. Both `nested`
    /// links and tokens embedded in identity claims count.
    pub fn height(&self) -> usize {
        let nested = self.nested.as_deref().map_or(0, Token::height);

        1 + nested.max(self.payload.embedded_height())
    }

    /// Number of links in the `nested` chain, including this one.
    pub fn chain_len(&self) -> usize {
        std::iter::successors(Some(self), |token| token.nested.as_deref()).count()
    }

    /// The innermost (root) link of the `nested` chain.
    pub fn root(&self) -> &Token {
        let mut token = self;
        while let Some(nested) = token.nested.as_deref() {
            token = nested;
        }
        token
    }
}

/// Serde helpers for the `signature` field, which is written as `null` when
/// empty.
mod signature_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if bytes.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&STANDARD.encode(bytes))
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Serde helpers for optional byte strings.
mod optional_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
