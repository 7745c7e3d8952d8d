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

use bh_lsvid::clean_up_after_openssl;
use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{
    stack::Stack,
    x509::{
        store::{X509Store, X509StoreBuilder},
        X509StoreContext, X509,
    },
};

use crate::{Error, Result};

/// Certificates returned by the CA: the issued certificate followed by the
/// chain of its issuers, each certificate signed by the next one.
///
/// The order is checked on construction, the chain is **NOT VALIDATED**
/// against any trust anchor. Use
/// [`CertificateChain::verify_against_trusted_roots`] for that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateChain {
    leaf: X509,
    intermediates: Vec<X509>,
}

impl CertificateChain {
    /// Create a new [`CertificateChain`] from certificates ordered leaf
    /// first.
    pub fn new(chain: Vec<X509>) -> Result<Self> {
        validate_chain_order(&chain)?;

        let mut chain = chain.into_iter();
        let Some(leaf) = chain.next() else {
            return Err(bherror::Error::root(Error::CertificateChain).ctx("chain is empty"));
        };

        Ok(Self {
            leaf,
            intermediates: chain.collect(),
        })
    }

    /// Parse a chain of DER encoded certificates, ordered leaf first.
    pub fn from_der(certificates: &[Vec<u8>]) -> Result<Self> {
        let certificates = certificates
            .iter()
            .enumerate()
            .map(|(i, der)| {
                X509::from_der(der)
                    .foreign_err(|| Error::CertificateChain)
                    .ctx(|| format!("certificate {i}"))
            })
            .collect::<Result<_>>()
            .ctx(|| "invalid X509 certificate")?;

        Self::new(certificates)
    }

    /// The issued certificate.
    pub fn leaf(&self) -> &X509 {
        &self.leaf
    }

    /// The issuers of the leaf, closest first.
    pub fn intermediates(&self) -> &[X509] {
        &self.intermediates
    }

    /// Number of certificates in the chain.
    pub fn len(&self) -> usize {
        1 + self.intermediates.len()
    }

    /// Always `false`, a chain holds at least its leaf.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over the certificates, leaf first.
    pub fn iter(&self) -> impl Iterator<Item = &X509> {
        std::iter::once(&self.leaf).chain(&self.intermediates)
    }

    /// DER encoding of every certificate, leaf first.
    pub fn to_der(&self) -> Result<Vec<Vec<u8>>> {
        self.iter()
            .map(|cert| cert.to_der().foreign_err(|| Error::CertificateChain))
            .collect()
    }

    /// Verify the chain against `trusted_roots`.
    ///
    /// The root may be part of the chain, but it **MUST BE** among the
    /// trusted roots as well.
    pub fn verify_against_trusted_roots(&self, trusted_roots: &[X509]) -> Result<()> {
        let mut intermediates = Stack::new().foreign_err(|| Error::CertificateChain)?;
        for cert in &self.intermediates {
            intermediates
                .push(cert.clone())
                .foreign_err(|| Error::CertificateChain)?;
        }

        let trust = certs_to_store(trusted_roots)?;

        let mut context = X509StoreContext::new().foreign_err(|| Error::CertificateChain)?;
        let is_valid = context
            .init(&trust, &self.leaf, &intermediates, |ctx| {
                clean_up_after_openssl(|| ctx.verify_cert())
            })
            .foreign_err(|| Error::CertificateChain)?;

        if !is_valid {
            return Err(bherror::Error::root(Error::CertificateChain)
                .ctx("Chain validation against trusted root certificates failed")
                .ctx(format!(
                    "OpenSSL error on depth {}: {}",
                    context.error_depth(),
                    context.error()
                )));
        }

        Ok(())
    }
}

impl From<CertificateChain> for Vec<X509> {
    fn from(chain: CertificateChain) -> Self {
        let mut certificates = Vec::with_capacity(chain.len());
        certificates.push(chain.leaf);
        certificates.extend(chain.intermediates);
        certificates
    }
}

fn certs_to_store(certificates: &[X509]) -> Result<X509Store> {
    let mut builder = X509StoreBuilder::new().foreign_err(|| Error::CertificateChain)?;

    for cert in certificates {
        builder
            .add_cert(cert.clone())
            .foreign_err(|| Error::CertificateChain)?;
    }

    Ok(builder.build())
}

/// Check that every certificate is signed by the one following it.
///
/// [`X509StoreContext`] accepts the intermediates in any order, so this is
/// checked separately.
pub(crate) fn validate_chain_order(chain: &[X509]) -> Result<()> {
    if chain.is_empty() {
        return Err(bherror::Error::root(Error::CertificateChain).ctx("chain is empty"));
    }

    for (i, pair) in chain.windows(2).enumerate() {
        let (child, parent) = (&pair[0], &pair[1]);

        let is_child = clean_up_after_openssl(|| child.verify(parent.public_key()?.as_ref()))
            .foreign_err(|| Error::CertificateChain)?;

        if !is_child {
            return Err(bherror::Error::root(Error::CertificateChain))
                .ctx(|| format!("certificate {i} is not signed by certificate {}", i + 1));
        }
    }

    Ok(())
}
