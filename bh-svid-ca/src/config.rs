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

use chrono::{DateTime, Duration, Utc};

/// TTL given to X.509 SVIDs when neither the request nor the configuration
/// sets one.
pub const DEFAULT_X509_SVID_TTL: Duration = Duration::hours(1);

/// TTL given to JWT SVIDs when neither the request nor the configuration
/// sets one.
pub const DEFAULT_JWT_SVID_TTL: Duration = Duration::minutes(5);

/// How far in the past the `notBefore` of issued certificates is set, to
/// tolerate clock skew between the CA and relying parties.
pub const BACKDATE: Duration = Duration::seconds(10);

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] reading the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// [`Clock`] that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Configuration of a [`Ca`][crate::Ca].
#[derive(Clone)]
pub struct CaConfig {
    /// Trust domain identities issued by the CA must belong to, e.g.
    /// `example.org`.
    pub trust_domain: String,
    /// Default TTL of X.509 SVIDs. Non-positive values mean
    /// [`DEFAULT_X509_SVID_TTL`].
    pub x509_svid_ttl: Duration,
    /// Default TTL of JWT SVIDs. Non-positive values mean
    /// [`DEFAULT_JWT_SVID_TTL`].
    pub jwt_svid_ttl: Duration,
    /// Issuer of JWT SVIDs, if any.
    pub jwt_issuer: Option<String>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl CaConfig {
    /// Configuration for `trust_domain` with all other values defaulted.
    pub fn new(trust_domain: impl Into<String>) -> Self {
        Self {
            trust_domain: trust_domain.into(),
            ..Default::default()
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace non-positive TTLs with their defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.x509_svid_ttl <= Duration::zero() {
            self.x509_svid_ttl = DEFAULT_X509_SVID_TTL;
        }
        if self.jwt_svid_ttl <= Duration::zero() {
            self.jwt_svid_ttl = DEFAULT_JWT_SVID_TTL;
        }
        self
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            trust_domain: String::new(),
            x509_svid_ttl: DEFAULT_X509_SVID_TTL,
            jwt_svid_ttl: DEFAULT_JWT_SVID_TTL,
            jwt_issuer: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for CaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaConfig")
            .field("trust_domain", &self.trust_domain)
            .field("x509_svid_ttl", &self.x509_svid_ttl)
            .field("jwt_svid_ttl", &self.jwt_svid_ttl)
            .field("jwt_issuer", &self.jwt_issuer)
            .finish_non_exhaustive()
    }
}
