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

use std::sync::Arc;

use bherror::traits::ErrorContext as _;
use chrono::{DateTime, Duration, Utc};
use iref::{Uri, UriBuf};
use openssl::{
    pkey::{PKey, Public},
    x509::X509,
};

use crate::{
    compact::sign_compact,
    template::{downstream_subject, Profile, Template},
    CaConfig, CertificateChain, DistinguishedName, Error, JwtKey, KeyStore, Result, X509Ca,
    BACKDATE,
};

/// URI scheme of SPIFFE IDs.
pub const SPIFFE_SCHEME: &str = "spiffe";

/// Parameters of an X.509 SVID.
#[derive(Debug, Clone)]
pub struct X509SvidParams {
    /// SPIFFE ID of the SVID.
    pub spiffe_id: UriBuf,
    /// Public key of the SVID.
    pub public_key: PKey<Public>,
    /// Desired lifetime. Non-positive values mean the configured default.
    /// The lifetime is always capped to that of the CA certificate.
    pub ttl: Duration,
    /// DNS names added as SANs. The first one is also used as the common
    /// name.
    pub dns_names: Vec<String>,
    /// Subject of the SVID. The default subject is used if it is empty.
    pub subject: DistinguishedName,
}

impl X509SvidParams {
    /// Parameters with the default TTL, no DNS names and the default
    /// subject.
    pub fn new(spiffe_id: UriBuf, public_key: PKey<Public>) -> Self {
        Self {
            spiffe_id,
            public_key,
            ttl: Duration::zero(),
            dns_names: Vec::new(),
            subject: DistinguishedName::default(),
        }
    }
}

/// Parameters of a downstream X.509 CA SVID.
#[derive(Debug, Clone)]
pub struct X509CaSvidParams {
    /// SPIFFE ID of the SVID.
    pub spiffe_id: UriBuf,
    /// Public key of the downstream CA.
    pub public_key: PKey<Public>,
    /// Desired lifetime. Non-positive values mean the configured default.
    /// The lifetime is always capped to that of the CA certificate.
    pub ttl: Duration,
}

/// Operations of a server CA.
pub trait ServerCa {
    /// Issue an X.509 SVID, returned together with the upstream chain of the
    /// CA.
    fn sign_x509_svid(&self, params: X509SvidParams) -> Result<CertificateChain>;

    /// Issue a CA certificate for a downstream server, returned together
    /// with the upstream chain of the CA.
    ///
    /// The subject is the subject of the CA with the organizational unit
    /// set to `DOWNSTREAM-<n>`, `n` being the 1-based depth of the
    /// downstream CA.
    fn sign_x509_ca_svid(&self, params: X509CaSvidParams) -> Result<CertificateChain>;

    /// Sign `payloads` with the JWT key into a compact LSVID; see
    /// [`sign_compact`].
    fn sign_lsvid(&self, payloads: &[String]) -> Result<String>;

    /// The public key of the JWT key.
    fn jwt_public_key(&self) -> Result<PKey<Public>>;

    /// The public key of the X.509 CA.
    fn x509_public_key(&self) -> Result<PKey<Public>>;
}

/// Server CA holding the current signing keys.
#[derive(Debug)]
pub struct Ca {
    config: CaConfig,
    keys: KeyStore,
}

impl Ca {
    /// Create a CA without any keys.
    pub fn new(config: CaConfig) -> Self {
        Self {
            config: config.normalized(),
            keys: KeyStore::default(),
        }
    }

    /// The configuration, with defaults applied.
    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    /// The current X.509 CA, if one is installed.
    pub fn x509_ca(&self) -> Option<Arc<X509Ca>> {
        self.keys.x509_ca()
    }

    /// Install a new X.509 CA.
    pub fn set_x509_ca(&self, x509_ca: impl Into<Arc<X509Ca>>) {
        let x509_ca = x509_ca.into();
        tracing::info!(
            subject = ?x509_ca.certificate().subject_name(),
            expiration = %x509_ca.not_after().to_rfc3339(),
            "X509 CA activated"
        );
        self.keys.set_x509_ca(x509_ca);
    }

    /// The current JWT key, if one is installed.
    pub fn jwt_key(&self) -> Option<Arc<JwtKey>> {
        self.keys.jwt_key()
    }

    /// Install a new JWT key.
    pub fn set_jwt_key(&self, jwt_key: impl Into<Arc<JwtKey>>) {
        let jwt_key = jwt_key.into();
        tracing::info!(
            kid = jwt_key.kid(),
            expiration = %jwt_key.not_after().to_rfc3339(),
            "JWT key activated"
        );
        self.keys.set_jwt_key(jwt_key);
    }

    fn current_x509_ca(&self) -> Result<Arc<X509Ca>> {
        self.keys
            .x509_ca()
            .ok_or_else(|| bherror::Error::root(Error::X509CaUnavailable))
    }

    fn current_jwt_key(&self) -> Result<Arc<JwtKey>> {
        self.keys
            .jwt_key()
            .ok_or_else(|| bherror::Error::root(Error::KeyUnavailable))
    }

    fn check_spiffe_id(&self, spiffe_id: &Uri) -> Result<()> {
        let is_member = spiffe_id.scheme().as_str() == SPIFFE_SCHEME
            && spiffe_id
                .authority()
                .is_some_and(|authority| authority.as_str() == self.config.trust_domain)
            && spiffe_id.query().is_none()
            && spiffe_id.fragment().is_none();

        if !is_member {
            return Err(bherror::Error::root(Error::InvalidIdentity)).ctx(|| {
                format!(
                    "{spiffe_id} is not a member of trust domain {}",
                    self.config.trust_domain
                )
            });
        }

        Ok(())
    }

    /// Validity window of a certificate issued now, capped at `expiration_cap`.
    fn cap_lifetime(
        &self,
        ttl: Duration,
        expiration_cap: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let ttl = if ttl > Duration::zero() {
            ttl
        } else {
            self.config.x509_svid_ttl
        };

        let now = self.config.clock.now();
        let not_before = now - BACKDATE;
        let not_after = (now + ttl).min(expiration_cap);

        (not_before, not_after)
    }
}

impl ServerCa for Ca {
    fn sign_x509_svid(&self, params: X509SvidParams) -> Result<CertificateChain> {
        let x509_ca = self.current_x509_ca()?;
        self.check_spiffe_id(&params.spiffe_id)?;

        let (not_before, not_after) = self.cap_lifetime(params.ttl, x509_ca.not_after());

        let mut subject = if params.subject.is_empty() {
            DistinguishedName::default_svid_subject()
        } else {
            params.subject
        };
        if let Some(dns_name) = params.dns_names.first() {
            subject.common_name = Some(dns_name.clone());
        }
        let subject = subject.to_x509_name()?;

        let certificate = Template {
            subject: &subject,
            public_key: &params.public_key,
            spiffe_id: params.spiffe_id.as_str(),
            not_before,
            not_after,
            profile: Profile::Leaf {
                dns_names: &params.dns_names,
            },
        }
        .sign(Some(x509_ca.certificate()), x509_ca.private_key())
        .ctx(|| format!("unable to create X509 SVID for {}", params.spiffe_id))?;

        tracing::debug!(
            spiffe_id = %params.spiffe_id,
            expiration = %not_after.to_rfc3339(),
            "Signed X509 SVID"
        );

        make_svid_chain(&x509_ca, certificate)
    }

    fn sign_x509_ca_svid(&self, params: X509CaSvidParams) -> Result<CertificateChain> {
        let x509_ca = self.current_x509_ca()?;
        self.check_spiffe_id(&params.spiffe_id)?;

        let (not_before, not_after) = self.cap_lifetime(params.ttl, x509_ca.not_after());

        // The downstream server never controls its own subject.
        let subject = downstream_subject(
            x509_ca.certificate().subject_name(),
            &format!("DOWNSTREAM-{}", 1 + x509_ca.upstream_chain().len()),
        )?;

        let certificate = Template {
            subject: &subject,
            public_key: &params.public_key,
            spiffe_id: params.spiffe_id.as_str(),
            not_before,
            not_after,
            profile: Profile::Ca,
        }
        .sign(Some(x509_ca.certificate()), x509_ca.private_key())
        .ctx(|| format!("unable to create X509 CA SVID for {}", params.spiffe_id))?;

        tracing::debug!(
            spiffe_id = %params.spiffe_id,
            expiration = %not_after.to_rfc3339(),
            "Signed X509 CA SVID"
        );

        make_svid_chain(&x509_ca, certificate)
    }

    fn sign_lsvid(&self, payloads: &[String]) -> Result<String> {
        let jwt_key = self.current_jwt_key()?;

        sign_compact(jwt_key.signer(), payloads).ctx(|| format!("signing with key {}", jwt_key.kid()))
    }

    fn jwt_public_key(&self) -> Result<PKey<Public>> {
        self.current_jwt_key()?.public_key()
    }

    fn x509_public_key(&self) -> Result<PKey<Public>> {
        self.current_x509_ca()?.public_key()
    }
}

fn make_svid_chain(x509_ca: &X509Ca, certificate: X509) -> Result<CertificateChain> {
    let mut chain = Vec::with_capacity(1 + x509_ca.upstream_chain().len());
    chain.push(certificate);
    chain.extend(x509_ca.upstream_chain().iter().cloned());

    CertificateChain::new(chain)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bh_lsvid::{EcdsaSigner, Signer as _, Validation};

    use super::*;
    use crate::{verify_compact, FixedClock};

    const TRUST_DOMAIN: &str = "example.org";

    /// Current time truncated to whole seconds, as certificates store it.
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
    }

    fn ca_subject(cn: &str) -> DistinguishedName {
        DistinguishedName {
            country: vec!["HR".to_owned()],
            organization: vec!["TBTL".to_owned()],
            common_name: Some(cn.to_owned()),
            ..Default::default()
        }
    }

    fn ca_with_root(now: DateTime<Utc>, ca_ttl: Duration) -> (Ca, Arc<X509Ca>) {
        let ca = Ca::new(CaConfig::new(TRUST_DOMAIN).with_clock(FixedClock(now)));
        let root = Arc::new(
            X509Ca::self_signed(TRUST_DOMAIN, &ca_subject("root"), ca_ttl, now).unwrap(),
        );
        ca.set_x509_ca(root.clone());
        (ca, root)
    }

    fn public_key() -> PKey<Public> {
        EcdsaSigner::generate().unwrap().public_key().unwrap()
    }

    fn spiffe_id(path: &str) -> UriBuf {
        UriBuf::new(format!("spiffe://{TRUST_DOMAIN}{path}").into_bytes()).unwrap()
    }

    fn expiration(cert: &X509) -> DateTime<Utc> {
        crate::template::from_asn1_time(cert.not_after()).unwrap()
    }

    fn organizational_unit(cert: &X509) -> Vec<String> {
        DistinguishedName::from_x509_name(cert.subject_name())
            .unwrap()
            .organizational_unit
    }

    #[test]
    fn svid_lifetime_defaults_and_backdate() {
        let now = now();
        let (ca, root) = ca_with_root(now, Duration::days(1));

        let chain = ca
            .sign_x509_svid(X509SvidParams::new(spiffe_id("/workload"), public_key()))
            .unwrap();

        let leaf = chain.leaf();
        assert_eq!(expiration(leaf), now + Duration::hours(1));
        assert_eq!(
            crate::template::from_asn1_time(leaf.not_before()).unwrap(),
            now - BACKDATE
        );
        assert!(leaf.verify(&root.public_key().unwrap()).unwrap());
        assert!(chain.intermediates().is_empty());
        chain
            .verify_against_trusted_roots(&[root.certificate().to_owned()])
            .unwrap();
    }

    #[test]
    fn svid_lifetime_is_capped_by_the_ca() {
        let now = now();
        let (ca, root) = ca_with_root(now, Duration::minutes(30));

        let mut params = X509SvidParams::new(spiffe_id("/workload"), public_key());
        params.ttl = Duration::hours(2);
        let chain = ca.sign_x509_svid(params).unwrap();

        assert_eq!(expiration(chain.leaf()), root.not_after());
        assert_eq!(root.not_after(), now + Duration::minutes(30));
    }

    #[test]
    fn svid_extensions() {
        let (ca, root) = ca_with_root(now(), Duration::days(1));

        let mut params = X509SvidParams::new(spiffe_id("/workload"), public_key());
        params.dns_names = vec!["a.example.org".to_owned(), "b.example.org".to_owned()];
        let chain = ca.sign_x509_svid(params).unwrap();
        let leaf = chain.leaf();

        assert_eq!(
            leaf.authority_key_id().unwrap().as_slice(),
            root.certificate().subject_key_id().unwrap().as_slice()
        );

        let subject = DistinguishedName::from_x509_name(leaf.subject_name()).unwrap();
        assert_eq!(subject.common_name.as_deref(), Some("a.example.org"));
        assert_eq!(subject.country, [crate::DEFAULT_SUBJECT_COUNTRY]);
        assert_eq!(subject.organization, [crate::DEFAULT_SUBJECT_ORGANIZATION]);

        let names = leaf.subject_alt_names().unwrap();
        let uris: Vec<_> = names.iter().filter_map(|name| name.uri()).collect();
        let dns: Vec<_> = names.iter().filter_map(|name| name.dnsname()).collect();
        assert_eq!(uris, ["spiffe://example.org/workload"]);
        assert_eq!(dns, ["a.example.org", "b.example.org"]);
    }

    #[test]
    fn svid_with_custom_subject() {
        let (ca, _) = ca_with_root(now(), Duration::days(1));

        let mut params = X509SvidParams::new(spiffe_id("/workload"), public_key());
        params.subject = DistinguishedName {
            organization: vec!["Workloads".to_owned()],
            ..Default::default()
        };
        let chain = ca.sign_x509_svid(params).unwrap();

        let subject = DistinguishedName::from_x509_name(chain.leaf().subject_name()).unwrap();
        assert_eq!(subject.organization, ["Workloads"]);
        assert!(subject.country.is_empty());
    }

    #[test]
    fn foreign_identities_are_refused() {
        let (ca, _) = ca_with_root(now(), Duration::days(1));

        for id in [
            "spiffe://other.org/workload",
            "https://example.org/workload",
            "spiffe://example.org/workload?query",
        ] {
            let params = X509SvidParams::new(UriBuf::new(id.into()).unwrap(), public_key());
            let error = ca.sign_x509_svid(params).unwrap_err();
            assert_matches!(error.error, Error::InvalidIdentity, "{id}");
        }
    }

    #[test]
    fn downstream_subject_is_overridden() {
        let now = now();
        let (ca, root) = ca_with_root(now, Duration::days(1));
        let downstream_key = EcdsaSigner::generate().unwrap().to_pkey().unwrap();
        let downstream_public = PKey::public_key_from_der(&downstream_key.public_key_to_der().unwrap()).unwrap();

        let chain = ca
            .sign_x509_ca_svid(X509CaSvidParams {
                spiffe_id: spiffe_id(""),
                public_key: downstream_public,
                ttl: Duration::hours(12),
            })
            .unwrap();
        let downstream_cert = chain.leaf().to_owned();

        assert_eq!(organizational_unit(&downstream_cert), ["DOWNSTREAM-1"]);
        let subject = DistinguishedName::from_x509_name(downstream_cert.subject_name()).unwrap();
        assert_eq!(subject.common_name.as_deref(), Some("root"));
        assert_eq!(expiration(&downstream_cert), now + Duration::hours(12));
        assert_eq!(
            downstream_cert.authority_key_id().unwrap().as_slice(),
            root.certificate().subject_key_id().unwrap().as_slice()
        );

        // the downstream CA issues one level further
        let downstream = Ca::new(CaConfig::new(TRUST_DOMAIN).with_clock(FixedClock(now)));
        downstream.set_x509_ca(
            X509Ca::new(downstream_key, downstream_cert.clone(), vec![downstream_cert]).unwrap(),
        );

        let nested = downstream
            .sign_x509_ca_svid(X509CaSvidParams {
                spiffe_id: spiffe_id(""),
                public_key: public_key(),
                ttl: Duration::zero(),
            })
            .unwrap();
        assert_eq!(organizational_unit(nested.leaf()), ["DOWNSTREAM-2"]);
        assert_eq!(nested.len(), 2);

        let leaf = downstream
            .sign_x509_svid(X509SvidParams::new(spiffe_id("/workload"), public_key()))
            .unwrap();
        assert_eq!(leaf.len(), 2);
        leaf.verify_against_trusted_roots(&[root.certificate().to_owned()])
            .unwrap();
    }

    #[test]
    fn missing_keys_are_errors() {
        let ca = Ca::new(CaConfig::new(TRUST_DOMAIN));

        let error = ca
            .sign_x509_svid(X509SvidParams::new(spiffe_id("/workload"), public_key()))
            .unwrap_err();
        assert_matches!(error.error, Error::X509CaUnavailable);

        let error = ca
            .sign_x509_ca_svid(X509CaSvidParams {
                spiffe_id: spiffe_id(""),
                public_key: public_key(),
                ttl: Duration::zero(),
            })
            .unwrap_err();
        assert_matches!(error.error, Error::X509CaUnavailable);

        let error = ca.sign_lsvid(&["payload".to_owned()]).unwrap_err();
        assert_matches!(error.error, Error::KeyUnavailable);

        assert_matches!(ca.jwt_public_key().unwrap_err().error, Error::KeyUnavailable);
        assert_matches!(
            ca.x509_public_key().unwrap_err().error,
            Error::X509CaUnavailable
        );
    }

    #[test]
    fn lsvid_is_signed_with_the_jwt_key() {
        let ca = Ca::new(CaConfig::new(TRUST_DOMAIN));
        ca.set_jwt_key(JwtKey::new(EcdsaSigner::generate().unwrap(), "kid-1", now()));

        let error = ca.sign_lsvid(&[]).unwrap_err();
        assert_matches!(error.error, Error::EmptyInput);

        let payloads = ["first".to_owned(), "second".to_owned()];
        let token = ca.sign_lsvid(&payloads).unwrap();

        let public_key = ca.jwt_public_key().unwrap();
        assert_eq!(verify_compact(&token, &public_key).unwrap(), Validation::Valid);
        let decoded: Vec<_> = crate::decode_compact(&token)
            .unwrap()
            .into_iter()
            .map(|segment| segment.payload)
            .collect();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn public_keys_follow_rotation() {
        let now = now();
        let (ca, root) = ca_with_root(now, Duration::days(1));
        assert!(ca.x509_public_key().unwrap().public_eq(&root.public_key().unwrap()));

        let (_, next) = ca_with_root(now, Duration::days(1));
        ca.set_x509_ca(next.clone());
        assert!(ca.x509_public_key().unwrap().public_eq(&next.public_key().unwrap()));
    }

    #[test]
    fn rotation_never_exposes_partial_state() {
        let now = now();
        let (ca, first) = ca_with_root(now, Duration::days(1));
        let second = Arc::new(
            X509Ca::self_signed(TRUST_DOMAIN, &ca_subject("second"), Duration::days(1), now)
                .unwrap(),
        );
        let anchors = [first.certificate().to_owned(), second.certificate().to_owned()];

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..50 {
                    let next = if i % 2 == 0 { &second } else { &first };
                    ca.set_x509_ca(next.clone());
                }
            });

            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        let chain = ca
                            .sign_x509_svid(X509SvidParams::new(spiffe_id("/workload"), public_key()))
                            .unwrap();
                        let leaf = chain.leaf();

                        // issuer name, AKI and signature all come from the same CA
                        let issuer = anchors
                            .iter()
                            .find(|anchor| {
                                anchor.subject_name().to_der().unwrap()
                                    == leaf.issuer_name().to_der().unwrap()
                            })
                            .unwrap();
                        assert_eq!(
                            leaf.authority_key_id().unwrap().as_slice(),
                            issuer.subject_key_id().unwrap().as_slice()
                        );
                        assert!(leaf.verify(&issuer.public_key().unwrap()).unwrap());
                    }
                });
            }
        });
    }
}
