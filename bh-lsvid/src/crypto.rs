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

use std::{result::Result as StdResult, str::FromStr};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, PKeyRef, Private, Public},
};
use serde::{Deserialize, Serialize};

use crate::{utils::DIGEST_LEN, BoxError, Error, Result};

/// ECDSA signature algorithms an LSVID link can be signed with.
///
/// The name follows the JOSE convention and is determined by the curve of the
/// signing key. The signed digest is always SHA-256, see [`digest`][crate::digest].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SigningAlgorithm {
    /// ECDSA over P-256
    Es256,
    /// ECDSA over P-384
    Es384,
    /// ECDSA over P-521
    Es512,
}

/// `alg` claim value for ECDSA over P-256.
pub const SIGNING_ALG_ES256: &str = "ES256";
/// `alg` claim value for ECDSA over P-384.
pub const SIGNING_ALG_ES384: &str = "ES384";
/// `alg` claim value for ECDSA over P-521.
pub const SIGNING_ALG_ES512: &str = "ES512";

impl SigningAlgorithm {
    fn from_curve(curve: Option<Nid>) -> Option<Self> {
        match curve? {
            Nid::X9_62_PRIME256V1 => Some(Self::Es256),
            Nid::SECP384R1 => Some(Self::Es384),
            Nid::SECP521R1 => Some(Self::Es512),
            _ => None,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = bherror::Error<Error>;

    fn from_str(value: &str) -> StdResult<Self, Self::Err> {
        match value {
            SIGNING_ALG_ES256 => Ok(Self::Es256),
            SIGNING_ALG_ES384 => Ok(Self::Es384),
            SIGNING_ALG_ES512 => Ok(Self::Es512),
            _ => Err(bherror::Error::root(Error::UnsupportedKey)
                .ctx(format!("unknown signing algorithm {value}"))),
        }
    }
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let message = match self {
            Self::Es256 => SIGNING_ALG_ES256,
            Self::Es384 => SIGNING_ALG_ES384,
            Self::Es512 => SIGNING_ALG_ES512,
        };
        write!(f, "{}", message)
    }
}

/// An external signing backend, used for signing LSVID links and compact
/// CA tokens.
pub trait Signer {
    /// The algorithm this signer uses. Must be a constant function.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Sign an already computed digest, returning the ASN.1 DER encoded
    /// signature.
    fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> StdResult<Vec<u8>, BoxError>;

    /// The public key matching the signing key.
    fn public_key(&self) -> StdResult<PKey<Public>, BoxError>;
}

/// [`Signer`] implementation backed by an [`openssl`] ECDSA private key.
pub struct EcdsaSigner {
    private_key: EcKey<Private>,
    algorithm: SigningAlgorithm,
}

impl std::fmt::Debug for EcdsaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaSigner")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl EcdsaSigner {
    /// Generate a fresh P-256 key.
    pub fn generate() -> Result<Self> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
            .foreign_err(|| Error::Signing)
            .ctx(|| "unknown curve")?;
        let private_key = EcKey::generate(&group)
            .foreign_err(|| Error::Signing)
            .ctx(|| "key generation failed")?;

        Ok(Self {
            private_key,
            algorithm: SigningAlgorithm::Es256,
        })
    }

    /// Create a signer from an EC private key on one of the supported curves.
    pub fn from_private_key(private_key: EcKey<Private>) -> Result<Self> {
        let algorithm = SigningAlgorithm::from_curve(private_key.group().curve_name())
            .ok_or_else(|| bherror::Error::root(Error::UnsupportedKey))
            .ctx(|| "only P-256, P-384 and P-521 keys are supported")?;

        Ok(Self {
            private_key,
            algorithm,
        })
    }

    /// Create a signer from a private key in PEM format.
    pub fn from_private_key_pem(pem: &[u8]) -> Result<Self> {
        let private_key = EcKey::private_key_from_pem(pem)
            .foreign_err(|| Error::UnsupportedKey)
            .ctx(|| "not an EC private key")?;

        Self::from_private_key(private_key)
    }

    /// Create a signer from a generic private key, which must be an EC key.
    pub fn from_pkey(private_key: &PKeyRef<Private>) -> Result<Self> {
        let private_key = private_key
            .ec_key()
            .foreign_err(|| Error::UnsupportedKey)
            .ctx(|| "not an EC private key")?;

        Self::from_private_key(private_key)
    }

    /// The private key as a generic [`PKey`], e.g. for signing certificates.
    pub fn to_pkey(&self) -> Result<PKey<Private>> {
        PKey::from_ec_key(self.private_key.clone()).foreign_err(|| Error::Signing)
    }

    /// DER encoded `SubjectPublicKeyInfo` of the public key, as carried in the
    /// `pk` field of an [`IdClaim`][crate::IdClaim].
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        self.public_pkey()?
            .public_key_to_der()
            .foreign_err(|| Error::Encoding)
    }

    fn public_pkey(&self) -> Result<PKey<Public>> {
        let public_key = EcKey::from_public_key(self.private_key.group(), self.private_key.public_key())
            .foreign_err(|| Error::Signing)?;

        PKey::from_ec_key(public_key).foreign_err(|| Error::Signing)
    }
}

impl Signer for EcdsaSigner {
    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> StdResult<Vec<u8>, BoxError> {
        let signature = EcdsaSig::sign(digest, &self.private_key)?;

        Ok(signature.to_der()?)
    }

    fn public_key(&self) -> StdResult<PKey<Public>, BoxError> {
        Ok(self.public_pkey()?)
    }
}

/// Parse a DER encoded `SubjectPublicKeyInfo`.
pub fn public_key_from_der(der: &[u8]) -> Result<PKey<Public>> {
    clean_up_after_openssl(|| PKey::public_key_from_der(der))
        .foreign_err(|| Error::UnsupportedKey)
        .ctx(|| "invalid public key")
}

/// Verify an ASN.1 DER encoded ECDSA `signature` over `digest`.
///
/// # Return
/// Returns `Ok(true)` if the signature is valid, `Ok(false)` if it is not,
/// including a signature that is not valid DER, and `Err(_)` if the key is
/// not an EC key or the backend itself fails.
pub fn verify_digest(
    public_key: &PKeyRef<Public>,
    digest: &[u8; DIGEST_LEN],
    signature: &[u8],
) -> Result<bool> {
    if public_key.id() != Id::EC {
        return Err(bherror::Error::root(Error::UnsupportedKey))
            .ctx(|| format!("expected an EC key, got {:?}", public_key.id()));
    }

    let ec_key = public_key.ec_key().foreign_err(|| Error::UnsupportedKey)?;

    // A signature that doesn't even parse can't be valid for any key.
    let Ok(signature) = clean_up_after_openssl(|| EcdsaSig::from_der(signature)) else {
        return Ok(false);
    };

    clean_up_after_openssl(|| signature.verify(digest, &ec_key))
        .foreign_err(|| Error::UnsupportedKey)
        .ctx(|| "signature verification failed")
}

/// Run a closure calling OpenSSL and leave the thread-local error stack
/// empty afterwards, whether the call succeeded or not.
pub fn clean_up_after_openssl<T>(
    f: impl FnOnce() -> StdResult<T, ErrorStack>,
) -> StdResult<T, ErrorStack> {
    let return_value = f();

    // Whatever the outcome, the error stack is expected to be clean afterwards.
    drop(ErrorStack::get());

    return_value
}
