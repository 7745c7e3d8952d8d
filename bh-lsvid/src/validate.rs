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

use bherror::traits::{ErrorContext as _, PropagateError as _};
use openssl::pkey::{PKey, Public};

use crate::{public_key_from_der, verify_digest, Error, IdClaim, Result, Token, MAX_CHAIN_DEPTH};

/// Outcome of a chain validation that ran to completion.
///
/// Structural problems, such as a broken issuer to audience binding or a
/// missing key, are reported as errors instead.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Validation {
    /// Every link of the chain verified.
    Valid,
    /// The signature of the link at `depth` is well-formed but does not
    /// verify. The outermost link has depth 0.
    Rejected {
        /// Depth of the rejected link.
        depth: usize,
    },
}

impl Validation {
    /// Returns `true` for [`Validation::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Verify every link of `token`, from the outermost one down to the root.
///
/// For each non-root link the issuer must be the audience of the nested
/// link, and the signature over the link without its signature must verify
/// against the issuer's key. The key comes from the subject of the root of
/// the issuer's embedded token when there is one, and from the issuer's `pk`
/// otherwise. The root link is verified over its payload alone, against its
/// issuer's `pk`.
///
/// Whether the root's key is itself trusted is up to the caller.
pub fn validate(token: &Token) -> Result<Validation> {
    let height = token.height();
    if height > MAX_CHAIN_DEPTH {
        return Err(bherror::Error::root(Error::ChainTooDeep(MAX_CHAIN_DEPTH)))
            .ctx(|| format!("token tree has height {height}"));
    }

    let mut token = token;
    let mut depth = 0;

    while let Some(nested) = token.nested.as_deref() {
        let issuer = check_link(token, nested, depth)?;
        let public_key = resolve_key(issuer, depth)?;

        if !verify_link(token, &public_key, depth)? {
            return Ok(Validation::Rejected { depth });
        }
        tracing::debug!(issuer = %issuer.cn, depth, "LSVID link verified");

        token = nested;
        depth += 1;
    }

    let issuer = token
        .payload
        .iss
        .as_ref()
        .ok_or_else(|| bherror::Error::root(Error::KeyResolution(depth)))
        .ctx(|| "root link has no issuer")?;
    let public_key = parse_key(issuer.pk.as_deref(), depth)?;

    if !verify_link(token, &public_key, depth)? {
        return Ok(Validation::Rejected { depth });
    }
    tracing::debug!(issuer = %issuer.cn, depth, "LSVID root verified");

    Ok(Validation::Valid)
}

/// Check the issuer to audience binding of `token` and its nested link,
/// returning the issuer claim.
fn check_link<'a>(token: &'a Token, nested: &Token, depth: usize) -> Result<&'a IdClaim> {
    let link_error = || bherror::Error::root(Error::LinkValidation(depth));

    let issuer = token
        .payload
        .iss
        .as_ref()
        .ok_or_else(link_error)
        .ctx(|| "link has no issuer")?;
    let audience = nested
        .payload
        .aud
        .as_ref()
        .ok_or_else(link_error)
        .ctx(|| "nested link has no audience")?;

    if issuer.cn != audience.cn {
        return Err(link_error()).ctx(|| {
            format!(
                "issuer {:?} is not the audience {:?} of the nested link",
                issuer.cn, audience.cn
            )
        });
    }

    Ok(issuer)
}

fn resolve_key(issuer: &IdClaim, depth: usize) -> Result<PKey<Public>> {
    match issuer.id.as_deref() {
        Some(embedded) => {
            let subject_key = embedded
                .root()
                .payload
                .sub
                .as_ref()
                .and_then(|subject| subject.pk.as_deref());
            parse_key(subject_key, depth).ctx(|| "issuer identity proven by embedded token")
        }
        None => parse_key(issuer.pk.as_deref(), depth),
    }
}

fn parse_key(der: Option<&[u8]>, depth: usize) -> Result<PKey<Public>> {
    let der = der
        .ok_or_else(|| bherror::Error::root(Error::KeyResolution(depth)))
        .ctx(|| "no public key")?;

    public_key_from_der(der).with_err(|| Error::KeyResolution(depth))
}

fn verify_link(token: &Token, public_key: &PKey<Public>, depth: usize) -> Result<bool> {
    let digest = token.signing_digest()?;

    verify_digest(public_key, &digest, &token.signature).ctx(|| format!("link at depth {depth}"))
}
