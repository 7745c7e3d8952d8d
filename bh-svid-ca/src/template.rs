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
use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Integer, Asn1Time, Asn1TimeRef},
    bn::BigNum,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKeyRef, Private, Public},
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        X509Name, X509NameBuilder, X509NameRef, X509Ref, X509,
    },
};
use rand::RngCore;

use crate::{Error, Result};

/// X.509v3
///
/// See [RFC 5280 - section 4.1.2.1](https://datatracker.ietf.org/doc/html/rfc5280#section-4.1.2.1)
const VERSION: i32 = 2;

/// Length of the serial number in bytes. The most significant bit is always
/// cleared, which leaves 159 random bits and keeps the number positive.
///
/// See [RFC 5280 - section 4.1.2.2](https://datatracker.ietf.org/doc/html/rfc5280#section-4.1.2.2).
const SERIAL_NUMBER_BYTES: usize = 20;

/// Country of the default X.509 SVID subject.
pub const DEFAULT_SUBJECT_COUNTRY: &str = "US";

/// Organization of the default X.509 SVID subject.
pub const DEFAULT_SUBJECT_ORGANIZATION: &str = "SPIRE";

/// The subset of an X.509 distinguished name the CA works with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    /// `C` attributes.
    pub country: Vec<String>,
    /// `O` attributes.
    pub organization: Vec<String>,
    /// `OU` attributes.
    pub organizational_unit: Vec<String>,
    /// The `CN` attribute.
    pub common_name: Option<String>,
}

impl DistinguishedName {
    /// Subject given to X.509 SVIDs when the request doesn't set one.
    pub fn default_svid_subject() -> Self {
        Self {
            country: vec![DEFAULT_SUBJECT_COUNTRY.to_owned()],
            organization: vec![DEFAULT_SUBJECT_ORGANIZATION.to_owned()],
            ..Default::default()
        }
    }

    /// Returns `true` if no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.country.is_empty()
            && self.organization.is_empty()
            && self.organizational_unit.is_empty()
            && self.common_name.is_none()
    }

    /// Extract the supported attributes of an OpenSSL name.
    pub fn from_x509_name(name: &X509NameRef) -> Result<Self> {
        let entries = |nid| -> Result<Vec<String>> {
            name.entries_by_nid(nid)
                .map(|entry| {
                    std::str::from_utf8(entry.data().as_slice())
                        .map(str::to_owned)
                        .foreign_err(|| Error::Certificate)
                        .ctx(|| format!("invalid {nid:?} attribute"))
                })
                .collect()
        };

        Ok(Self {
            country: entries(Nid::COUNTRYNAME)?,
            organization: entries(Nid::ORGANIZATIONNAME)?,
            organizational_unit: entries(Nid::ORGANIZATIONALUNITNAME)?,
            common_name: entries(Nid::COMMONNAME)?.into_iter().next(),
        })
    }

    /// Build the OpenSSL name, in `C`, `O`, `OU`, `CN` order.
    pub fn to_x509_name(&self) -> Result<X509Name> {
        let mut builder = X509NameBuilder::new().foreign_err(|| Error::Certificate)?;

        let attributes = self
            .country
            .iter()
            .map(|value| (Nid::COUNTRYNAME, value))
            .chain(self.organization.iter().map(|value| (Nid::ORGANIZATIONNAME, value)))
            .chain(
                self.organizational_unit
                    .iter()
                    .map(|value| (Nid::ORGANIZATIONALUNITNAME, value)),
            )
            .chain(self.common_name.iter().map(|value| (Nid::COMMONNAME, value)));

        for (nid, value) in attributes {
            builder
                .append_entry_by_nid(nid, value)
                .foreign_err(|| Error::Certificate)
                .ctx(|| format!("couldn't append {nid:?} attribute {value:?}"))?;
        }

        Ok(builder.build())
    }
}

/// Subject of a downstream CA: every attribute of `ca_subject` except `OU`,
/// followed by a single `OU` set to `organizational_unit`.
pub(crate) fn downstream_subject(
    ca_subject: &X509NameRef,
    organizational_unit: &str,
) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new().foreign_err(|| Error::Certificate)?;

    for entry in ca_subject
        .entries()
        .filter(|entry| entry.object().nid() != Nid::ORGANIZATIONALUNITNAME)
    {
        builder
            .append_entry(entry)
            .foreign_err(|| Error::Certificate)
            .ctx(|| format!("couldn't copy {:?} attribute", entry.object().nid()))?;
    }
    builder
        .append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, organizational_unit)
        .foreign_err(|| Error::Certificate)
        .ctx(|| format!("couldn't append OU attribute {organizational_unit:?}"))?;

    Ok(builder.build())
}

/// What a certificate is issued for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Profile<'a> {
    /// An X.509 SVID, with the given DNS names as additional SANs.
    Leaf { dns_names: &'a [String] },
    /// A CA certificate, either self-signed or for a downstream CA.
    Ca,
}

/// Everything needed to issue one certificate.
pub(crate) struct Template<'a> {
    pub(crate) subject: &'a X509NameRef,
    pub(crate) public_key: &'a PKeyRef<Public>,
    pub(crate) spiffe_id: &'a str,
    pub(crate) not_before: DateTime<Utc>,
    pub(crate) not_after: DateTime<Utc>,
    pub(crate) profile: Profile<'a>,
}

impl Template<'_> {
    /// Sign the certificate with `issuer_key`.
    ///
    /// With an `issuer` certificate, the issuer name and the authority key
    /// identifier are taken from it. Without one, the certificate is
    /// self-signed.
    pub(crate) fn sign(
        &self,
        issuer: Option<&X509Ref>,
        issuer_key: &PKeyRef<Private>,
    ) -> Result<X509> {
        let mut cert_builder = X509::builder()
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot create cert builder")?;
        cert_builder
            .set_version(VERSION)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set cert version")?;
        let serial_number = random_serial_number()?;
        cert_builder
            .set_serial_number(&serial_number)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set serial number")?;
        cert_builder
            .set_pubkey(self.public_key)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set public key")?;
        cert_builder
            .set_subject_name(self.subject)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set subject name")?;
        cert_builder
            .set_issuer_name(issuer.map_or(self.subject, |issuer| issuer.subject_name()))
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set issuer name")?;
        let not_before = to_asn1_time(self.not_before)?;
        cert_builder
            .set_not_before(&not_before)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set `not_before` time")?;
        let not_after = to_asn1_time(self.not_after)?;
        cert_builder
            .set_not_after(&not_after)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot set `not_after` time")?;

        let mut basic_constraints = BasicConstraints::new();
        basic_constraints.critical();
        let mut key_usage = KeyUsage::new();
        key_usage.critical().digital_signature();
        match self.profile {
            Profile::Leaf { .. } => {
                key_usage.key_encipherment().key_agreement();
            }
            Profile::Ca => {
                basic_constraints.ca();
                key_usage.key_cert_sign().crl_sign();
            }
        }

        let basic_constraints = basic_constraints
            .build()
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot create basic_constraints")?;
        cert_builder
            .append_extension(basic_constraints)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot append basic constraints")?;

        let key_usage = key_usage
            .build()
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot create key_usage")?;
        cert_builder
            .append_extension(key_usage)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot append key usage")?;

        if let Profile::Leaf { .. } = self.profile {
            let extended_key_usage = ExtendedKeyUsage::new()
                .server_auth()
                .client_auth()
                .build()
                .foreign_err(|| Error::Certificate)
                .ctx(|| "Cannot create extended_key_usage")?;
            cert_builder
                .append_extension(extended_key_usage)
                .foreign_err(|| Error::Certificate)
                .ctx(|| "Cannot append extended key usage")?;
        }

        let subject_key_identifier = SubjectKeyIdentifier::new()
            .build(&cert_builder.x509v3_context(issuer, None))
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot create subject_key_identifier")?;
        cert_builder
            .append_extension(subject_key_identifier)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot append subject key identifier")?;

        // Set explicitly, as it is not derived when subject and issuer names match.
        if let Some(issuer) = issuer {
            let authority_key_identifier = AuthorityKeyIdentifier::new()
                .keyid(true)
                .build(&cert_builder.x509v3_context(Some(issuer), None))
                .foreign_err(|| Error::Certificate)
                .ctx(|| "Cannot create authority_key_identifier")?;
            cert_builder
                .append_extension(authority_key_identifier)
                .foreign_err(|| Error::Certificate)
                .ctx(|| "Cannot append authority key identifier")?;
        }

        let mut subject_alternative_name = SubjectAlternativeName::new();
        subject_alternative_name.uri(self.spiffe_id);
        if let Profile::Leaf { dns_names } = self.profile {
            for dns_name in dns_names {
                subject_alternative_name.dns(dns_name);
            }
        }
        let subject_alternative_name = subject_alternative_name
            .build(&cert_builder.x509v3_context(issuer, None))
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot create `subject_alternative_name`")?;
        cert_builder
            .append_extension(subject_alternative_name)
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot append `subject_alternative_name`")?;

        cert_builder
            .sign(issuer_key, MessageDigest::sha256())
            .foreign_err(|| Error::Certificate)
            .ctx(|| "Cannot sign certificate")?;

        Ok(cert_builder.build())
    }
}

/// Random positive serial number of at most 159 bits.
///
/// See this [stackexchange answer](https://crypto.stackexchange.com/questions/257/unpredictability-of-x-509-serial-numbers)
/// for more details.
fn random_serial_number() -> Result<Asn1Integer> {
    // An all-zero draw has probability 2^-159; a handful of retries is plenty.
    const MAX_ATTEMPTS: usize = 8;

    let mut rng = rand::rng();
    let mut bytes = [0u8; SERIAL_NUMBER_BYTES];

    for _ in 0..MAX_ATTEMPTS {
        rng.fill_bytes(&mut bytes);
        bytes[0] &= 0x7f;

        if bytes.iter().any(|byte| *byte != 0) {
            return BigNum::from_slice(&bytes)
                .and_then(|serial_number| serial_number.to_asn1_integer())
                .foreign_err(|| Error::Certificate)
                .ctx(|| "Cannot create serial number");
        }
    }

    Err(bherror::Error::root(Error::Certificate).ctx("Failed to generate a nonzero serial number"))
}

fn to_asn1_time(time: DateTime<Utc>) -> Result<Asn1Time> {
    Asn1Time::from_unix(time.timestamp())
        .foreign_err(|| Error::Certificate)
        .ctx(|| format!("Cannot represent {time} as ASN.1 time"))
}

/// Convert an ASN.1 time of a certificate into a [`DateTime`].
pub(crate) fn from_asn1_time(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).foreign_err(|| Error::Certificate)?;
    let since_epoch = epoch
        .diff(time)
        .foreign_err(|| Error::Certificate)
        .ctx(|| "Cannot compare ASN.1 times")?;

    let seconds = i64::from(since_epoch.days) * 86_400 + i64::from(since_epoch.secs);
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| bherror::Error::root(Error::Certificate))
        .ctx(|| format!("certificate time {time} out of range"))
}

#[cfg(test)]
mod tests {
    use bh_lsvid::EcdsaSigner;
    use openssl::pkey::PKey;

    use super::*;

    fn key_pair() -> (PKey<Private>, PKey<Public>) {
        let private_key = EcdsaSigner::generate().unwrap().to_pkey().unwrap();
        let public_key = PKey::public_key_from_der(&private_key.public_key_to_der().unwrap()).unwrap();
        (private_key, public_key)
    }

    fn time(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn distinguished_name_round_trip() {
        let name = DistinguishedName {
            country: vec!["HR".to_owned()],
            organization: vec!["TBTL".to_owned()],
            organizational_unit: vec!["Team Bee".to_owned(), "DOWNSTREAM-1".to_owned()],
            common_name: Some("ca".to_owned()),
        };

        let x509_name = name.to_x509_name().unwrap();

        assert_eq!(DistinguishedName::from_x509_name(&x509_name).unwrap(), name);
        assert!(!name.is_empty());
        assert!(DistinguishedName::default().is_empty());
    }

    #[test]
    fn self_signed_ca_and_leaf() {
        let (ca_private, ca_public) = key_pair();
        let ca_subject = DistinguishedName {
            common_name: Some("ca".to_owned()),
            ..DistinguishedName::default_svid_subject()
        }
        .to_x509_name()
        .unwrap();
        let ca = Template {
            subject: &ca_subject,
            public_key: &ca_public,
            spiffe_id: "spiffe://example.org",
            not_before: time(1_700_000_000),
            not_after: time(1_800_000_000),
            profile: Profile::Ca,
        }
        .sign(None, &ca_private)
        .unwrap();

        assert!(ca.verify(&ca_public).unwrap());
        assert_eq!(from_asn1_time(ca.not_before()).unwrap(), time(1_700_000_000));
        assert_eq!(from_asn1_time(ca.not_after()).unwrap(), time(1_800_000_000));
        assert!(ca.subject_key_id().is_some());

        let (_, leaf_public) = key_pair();
        let dns_names = vec!["a.example.org".to_owned(), "b.example.org".to_owned()];
        let leaf_subject = DistinguishedName::default_svid_subject()
            .to_x509_name()
            .unwrap();
        let leaf = Template {
            subject: &leaf_subject,
            public_key: &leaf_public,
            spiffe_id: "spiffe://example.org/workload",
            not_before: time(1_700_000_100),
            not_after: time(1_700_003_700),
            profile: Profile::Leaf {
                dns_names: &dns_names,
            },
        }
        .sign(Some(&ca), &ca_private)
        .unwrap();

        assert!(leaf.verify(&ca_public).unwrap());
        assert_eq!(
            leaf.authority_key_id().unwrap().as_slice(),
            ca.subject_key_id().unwrap().as_slice()
        );
        assert_eq!(
            leaf.issuer_name().to_der().unwrap(),
            ca.subject_name().to_der().unwrap()
        );

        let names = leaf.subject_alt_names().unwrap();
        let uris: Vec<_> = names.iter().filter_map(|name| name.uri()).collect();
        let dns: Vec<_> = names.iter().filter_map(|name| name.dnsname()).collect();
        assert_eq!(uris, ["spiffe://example.org/workload"]);
        assert_eq!(dns, ["a.example.org", "b.example.org"]);
    }

    #[test]
    fn serial_numbers_are_positive_and_distinct() {
        let first = random_serial_number().unwrap().to_bn().unwrap();
        let second = random_serial_number().unwrap().to_bn().unwrap();

        assert!(!first.is_negative());
        assert!(first.num_bits() <= 159);
        assert_ne!(first, second);
    }

    #[test]
    fn downstream_subject_keeps_all_but_organizational_unit() {
        let mut builder = X509NameBuilder::new().unwrap();
        for (nid, value) in [
            (Nid::COUNTRYNAME, "US"),
            (Nid::STATEORPROVINCENAME, "CA"),
            (Nid::LOCALITYNAME, "Palo Alto"),
            (Nid::ORGANIZATIONALUNITNAME, "Team Bee"),
            (Nid::COMMONNAME, "root"),
        ] {
            builder.append_entry_by_nid(nid, value).unwrap();
        }
        let ca_subject = builder.build();

        let subject = downstream_subject(&ca_subject, "DOWNSTREAM-1").unwrap();

        let entries: Vec<_> = subject
            .entries()
            .map(|entry| {
                (
                    entry.object().nid(),
                    std::str::from_utf8(entry.data().as_slice()).unwrap().to_owned(),
                )
            })
            .collect();
        assert_eq!(
            entries,
            [
                (Nid::COUNTRYNAME, "US".to_owned()),
                (Nid::STATEORPROVINCENAME, "CA".to_owned()),
                (Nid::LOCALITYNAME, "Palo Alto".to_owned()),
                (Nid::COMMONNAME, "root".to_owned()),
                (Nid::ORGANIZATIONALUNITNAME, "DOWNSTREAM-1".to_owned()),
            ]
        );
    }
}
