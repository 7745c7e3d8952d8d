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

use std::sync::{Arc, PoisonError, RwLock};

use bh_lsvid::{EcdsaSigner, Signer};
use bherror::traits::{ErrorContext as _, ForeignBoxed as _, ForeignError as _, PropagateError as _};
use chrono::{DateTime, Duration, Utc};
use openssl::{
    pkey::{PKey, PKeyRef, Private, Public},
    x509::{X509Ref, X509},
};

use crate::{
    chain::validate_chain_order,
    template::{from_asn1_time, Profile, Template},
    DistinguishedName, Error, Result, BACKDATE,
};

/// Signing material of the X.509 CA: its private key, its certificate and
/// the chain back to the upstream trust bundle.
pub struct X509Ca {
    private_key: PKey<Private>,
    certificate: X509,
    upstream_chain: Vec<X509>,
    not_after: DateTime<Utc>,
}

impl std::fmt::Debug for X509Ca {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Ca")
            .field("certificate", &self.certificate.subject_name())
            .field("upstream_chain", &self.upstream_chain.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl X509Ca {
    /// Pair a private key with its CA certificate.
    ///
    /// The `upstream_chain` holds the CA certificate and the intermediates
    /// needed to chain back to the upstream trust bundle, and is empty for
    /// a self-signed CA. Fails if the key does not match the certificate, or
    /// if a non-empty `upstream_chain` does not start with the certificate
    /// and chain upwards from it.
    pub fn new(
        private_key: PKey<Private>,
        certificate: X509,
        upstream_chain: Vec<X509>,
    ) -> Result<Self> {
        let certificate_key = certificate
            .public_key()
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Failed to access X509 public key")?;

        if !certificate_key.public_eq(&private_key) {
            return Err(bherror::Error::root(Error::Certificate))
                .ctx(|| "private key does not match the CA certificate");
        }

        if let Some(first) = upstream_chain.first() {
            if first != &certificate {
                return Err(bherror::Error::root(Error::CertificateChain))
                    .ctx(|| "upstream chain does not start with the CA certificate");
            }
            validate_chain_order(&upstream_chain).ctx(|| "invalid upstream chain")?;
        }

        let not_after = from_asn1_time(certificate.not_after())?;

        Ok(Self {
            private_key,
            certificate,
            upstream_chain,
            not_after,
        })
    }

    /// Generate a fresh P-256 key and a self-signed CA certificate for
    /// `trust_domain`, valid from `now` minus [`BACKDATE`] for `ttl`.
    pub fn self_signed(
        trust_domain: &str,
        subject: &DistinguishedName,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let private_key = EcdsaSigner::generate()
            .and_then(|signer| signer.to_pkey())
            .with_err(|| Error::Signing)
            .ctx(|| "couldn't generate the CA key")?;
        let public_key = PKey::public_key_from_der(
            &private_key
                .public_key_to_der()
                .foreign_err(|| Error::Signing)?,
        )
        .foreign_err(|| Error::Signing)?;

        let subject = subject.to_x509_name()?;
        let spiffe_id = format!("spiffe://{trust_domain}");
        let certificate = Template {
            subject: &subject,
            public_key: &public_key,
            spiffe_id: &spiffe_id,
            not_before: now - BACKDATE,
            not_after: now + ttl,
            profile: Profile::Ca,
        }
        .sign(None, &private_key)
        .ctx(|| "couldn't issue the self-signed CA certificate")?;

        Self::new(private_key, certificate, Vec::new())
    }

    /// The CA certificate.
    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// Certificates chaining the CA back to the upstream trust bundle.
    pub fn upstream_chain(&self) -> &[X509] {
        &self.upstream_chain
    }

    /// Expiration of the CA certificate, which caps every issued lifetime.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// The public key of the CA.
    pub fn public_key(&self) -> Result<PKey<Public>> {
        self.certificate
            .public_key()
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Failed to access X509 public key")
    }

    pub(crate) fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }
}

/// Key used for signing LSVIDs and JWT SVIDs.
#[derive(Clone)]
pub struct JwtKey {
    signer: Arc<dyn Signer + Send + Sync>,
    kid: String,
    not_after: DateTime<Utc>,
}

impl std::fmt::Debug for JwtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.signer.algorithm())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl JwtKey {
    /// Create a new [`JwtKey`].
    pub fn new(
        signer: impl Signer + Send + Sync + 'static,
        kid: impl Into<String>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            signer: Arc::new(signer),
            kid: kid.into(),
            not_after,
        }
    }

    /// The signing backend.
    pub fn signer(&self) -> &(dyn Signer + Send + Sync) {
        self.signer.as_ref()
    }

    /// The key identifier, i.e. the `kid` header of JWTs.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Expiration of the key.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// The public key of the signer.
    pub fn public_key(&self) -> Result<PKey<Public>> {
        self.signer
            .public_key()
            .foreign_boxed_err(|| Error::Signing)
            .ctx(|| format!("signer of key {}", self.kid))
    }
}

/// Holder of the current [`X509Ca`] and [`JwtKey`].
///
/// Reads hand out the snapshot installed at that moment; writes replace it
/// as a whole. The two keys are guarded separately, so rotating one never
/// blocks readers of the other. The store does not validate what it holds.
#[derive(Debug, Default)]
pub struct KeyStore {
    x509_ca: RwLock<Option<Arc<X509Ca>>>,
    jwt_key: RwLock<Option<Arc<JwtKey>>>,
}

impl KeyStore {
    /// The current X.509 CA, if one is installed.
    pub fn x509_ca(&self) -> Option<Arc<X509Ca>> {
        self.x509_ca
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `x509_ca`, replacing the current one.
    pub fn set_x509_ca(&self, x509_ca: impl Into<Arc<X509Ca>>) {
        *self.x509_ca.write().unwrap_or_else(PoisonError::into_inner) = Some(x509_ca.into());
    }

    /// The current JWT key, if one is installed.
    pub fn jwt_key(&self) -> Option<Arc<JwtKey>> {
        self.jwt_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `jwt_key`, replacing the current one.
    pub fn set_jwt_key(&self, jwt_key: impl Into<Arc<JwtKey>>) {
        *self.jwt_key.write().unwrap_or_else(PoisonError::into_inner) = Some(jwt_key.into());
    }
}
