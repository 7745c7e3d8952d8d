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

use bherror::traits::{ErrorContext as _, ForeignBoxed as _, ForeignError as _};
use serde::Serialize;

use crate::{digest, utils::DIGEST_LEN, Error, Payload, Result, Signer, Token};

/// A link as it is laid out for signing: the signature is always `null`.
#[derive(Serialize)]
struct SigningInput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    nested: Option<&'a Token>,
    payload: &'a Payload,
    signature: Option<&'a str>,
}

impl Token {
    /// Digest the link's signature is computed over.
    ///
    /// For a root link this is the SHA-256 of the JSON serialization of the
    /// payload alone. For any other link it is the SHA-256 of the JSON
    /// serialization of the link with a `null` signature.
    pub fn signing_digest(&self) -> Result<[u8; DIGEST_LEN]> {
        signing_digest(self.nested.as_deref(), &self.payload)
    }

    /// Sign a root token, i.e. a token without a nested link.
    ///
    /// The `alg` claim of `payload` is set to the algorithm of `signer`.
    pub fn issue<S: Signer + ?Sized>(mut payload: Payload, signer: &S) -> Result<Token> {
        payload.alg = Some(signer.algorithm().to_string());
        let signature = sign(signer, &signing_digest(None, &payload)?)?;

        Ok(Token {
            nested: None,
            payload,
            signature,
        })
    }

    /// Append a new link signed by `signer` on top of this token, returning
    /// the transport form of the extended token.
    ///
    /// The new `payload` should name the audience of this token as its
    /// issuer, otherwise the result will not validate. Its `alg` claim is set
    /// to the algorithm of `signer`.
    pub fn extend<S: Signer + ?Sized>(self, mut payload: Payload, signer: &S) -> Result<String> {
        payload.alg = Some(signer.algorithm().to_string());
        let signature = sign(signer, &signing_digest(Some(&self), &payload)?)?;

        let extended = Token {
            nested: Some(Box::new(self)),
            payload,
            signature,
        };

        extended.encode()
    }
}

fn signing_digest(nested: Option<&Token>, payload: &Payload) -> Result<[u8; DIGEST_LEN]> {
    let json = match nested {
        None => serde_json::to_vec(payload),
        Some(nested) => serde_json::to_vec(&SigningInput {
            nested: Some(nested),
            payload,
            signature: None,
        }),
    }
    .foreign_err(|| Error::Serialization)?;

    Ok(digest(&json))
}

fn sign<S: Signer + ?Sized>(signer: &S, digest: &[u8; DIGEST_LEN]) -> Result<Vec<u8>> {
    signer
        .sign_digest(digest)
        .foreign_boxed_err(|| Error::Signing)
        .ctx(|| format!("signing with {} failed", signer.algorithm()))
}

#[cfg(test)]
mod tests {
    use std::result::Result as StdResult;

    use assert_matches::assert_matches;
    use openssl::{
        ec::{EcGroup, EcKey},
        nid::Nid,
        pkey::{PKey, Public},
    };

    use super::*;
    use crate::{
        validate, verify_digest, BoxError, EcdsaSigner, IdClaim, SigningAlgorithm, Validation,
    };

    const WORKLOAD: &str = "spiffe://example.org/workload";
    const GATEWAY: &str = "spiffe://example.org/gateway";

    struct BrokenSigner;

    impl Signer for BrokenSigner {
        fn algorithm(&self) -> SigningAlgorithm {
            SigningAlgorithm::Es256
        }

        fn sign_digest(&self, _digest: &[u8; DIGEST_LEN]) -> StdResult<Vec<u8>, BoxError> {
            Err("HSM unavailable".into())
        }

        fn public_key(&self) -> StdResult<PKey<Public>, BoxError> {
            Err("HSM unavailable".into())
        }
    }

    fn root_payload(signer: &EcdsaSigner) -> Payload {
        Payload::new(
            IdClaim::with_public_key(WORKLOAD, signer.public_key_der().unwrap()),
            IdClaim::new(WORKLOAD),
            IdClaim::new(GATEWAY),
            1_700_000_000,
        )
    }

    #[test]
    fn root_signs_the_payload_json() {
        let signer = EcdsaSigner::generate().unwrap();
        let payload = root_payload(&signer);

        let root = Token::issue(payload.clone(), &signer).unwrap();

        let expected = digest(&serde_json::to_vec(&payload).unwrap());
        assert_eq!(root.signing_digest().unwrap(), expected);
        assert!(verify_digest(&signer.public_key().unwrap(), &expected, &root.signature).unwrap());
    }

    #[test]
    fn extension_signs_the_link_with_null_signature() {
        let workload = EcdsaSigner::generate().unwrap();
        let gateway = EcdsaSigner::generate().unwrap();
        let root = Token::issue(root_payload(&workload), &workload).unwrap();
        let payload = Payload::new(
            IdClaim::with_public_key(GATEWAY, gateway.public_key_der().unwrap()),
            IdClaim::new(WORKLOAD),
            IdClaim::new("spiffe://example.org/backend"),
            1_700_000_001,
        );

        let extended = Token::decode(&root.clone().extend(payload.clone(), &gateway).unwrap()).unwrap();

        assert_eq!(extended.nested.as_deref(), Some(&root));
        assert_eq!(extended.payload, payload);

        let unsigned = Token {
            signature: Vec::new(),
            ..extended.clone()
        };
        let expected = digest(&serde_json::to_vec(&unsigned).unwrap());
        assert_eq!(extended.signing_digest().unwrap(), expected);
        assert!(verify_digest(&gateway.public_key().unwrap(), &expected, &extended.signature).unwrap());
    }

    #[test]
    fn signer_failure_is_reported() {
        let signer = EcdsaSigner::generate().unwrap();
        let root = Token::issue(root_payload(&signer), &signer).unwrap();

        let error = root.extend(root_payload(&signer), &BrokenSigner).unwrap_err();
        assert_matches!(error.error, Error::Signing);

        let error = Token::issue(root_payload(&signer), &BrokenSigner).unwrap_err();
        assert_matches!(error.error, Error::Signing);
    }

    #[test]
    fn link_algorithm_follows_the_signer() {
        let workload = EcdsaSigner::generate().unwrap();
        let root = Token::issue(root_payload(&workload), &workload).unwrap();

        let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
        let gateway = EcdsaSigner::from_private_key(EcKey::generate(&group).unwrap()).unwrap();
        let dyn_gateway: &dyn Signer = &gateway;
        let payload = Payload::new(
            IdClaim::with_public_key(GATEWAY, gateway.public_key_der().unwrap()),
            IdClaim::new(WORKLOAD),
            IdClaim::new("spiffe://example.org/backend"),
            1_700_000_001,
        );
        assert_eq!(payload.alg.as_deref(), Some("ES256"));

        let extended = Token::decode(&root.extend(payload, dyn_gateway).unwrap()).unwrap();

        assert_eq!(extended.payload.alg.as_deref(), Some("ES384"));
        assert_eq!(validate(&extended).unwrap(), Validation::Valid);
    }
}
