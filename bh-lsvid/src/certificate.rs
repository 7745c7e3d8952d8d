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
use openssl::x509::X509Ref;

use crate::{Error, IdClaim, Payload, Result, SecondsSinceEpoch};

impl Payload {
    /// Build a root link payload for the workload identified by `cert`.
    ///
    /// The subject is the first URI subject alternative name of the
    /// certificate together with its public key, the issuer is `issuer_id`,
    /// and the audience is `audience`. Fails with [`Error::InvalidIdentity`]
    /// if the certificate has no URI name.
    pub fn from_certificate(
        issuer_id: &str,
        cert: &X509Ref,
        audience: &str,
        issued_at: SecondsSinceEpoch,
    ) -> Result<Self> {
        let spiffe_id = cert
            .subject_alt_names()
            .and_then(|names| names.iter().find_map(|name| name.uri().map(str::to_owned)))
            .ok_or_else(|| bherror::Error::root(Error::InvalidIdentity))?;

        let public_key = cert
            .public_key()
            .and_then(|key| key.public_key_to_der())
            .foreign_err(|| Error::Encoding)
            .ctx(|| "unable to encode the certificate key")?;

        Ok(Payload::new(
            IdClaim::new(issuer_id),
            IdClaim::with_public_key(spiffe_id, public_key),
            IdClaim::new(audience),
            issued_at,
        ))
    }
}
