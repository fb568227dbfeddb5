//! The agent trust layer's seam: an entitlement check consulted before a
//! prepared handle executes, and an attestation hook consulted before a
//! handle is minted for a given agent identity.
//!
//! The ledger that issues attestations, verifies signatures, and writes
//! the audit log is an external collaborator (spec.md's explicit
//! non-goal); this module defines only the contract an embedder
//! implements against. [`NoopEntitlements`] grants everything, matching a
//! single-tenant embedding that never calls `Database::open_for_agent`.

use crate::error::{Error, Result};

/// An opaque identity an embedder's attestation ledger has already
/// verified by the time it reaches Sharc. The engine never inspects its
/// contents; it is a key into the embedder's own entitlement store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentId(pub String);

/// What an agent is entitled to do against a particular table. Checked
/// once when a prepared handle is built, not per row -- an entitlement
/// change takes effect for handles minted after it, not ones already
/// outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    Ddl,
}

/// Consulted by `Database::prepare_for_agent`/`Database::write_for_agent`
/// before a handle is minted. An embedder backs this with whatever
/// authorization store it has (a capability table, an OPA policy, a flat
/// allow-list); Sharc only needs the yes/no answer.
pub trait Entitlements: Send + Sync {
    fn check(&self, agent: &AgentId, table: &str, capability: Capability) -> Result<()>;
}

/// Grants every capability to every agent: the default when a `Database`
/// is opened without `open_for_agent`, and a reasonable stand-in for
/// tests and single-tenant embeddings.
pub struct NoopEntitlements;

impl Entitlements for NoopEntitlements {
    fn check(&self, _agent: &AgentId, _table: &str, _capability: Capability) -> Result<()> {
        Ok(())
    }
}

/// A deny-list entitlement store useful for tests that need to exercise
/// the `Unauthorized` error path without standing up a real ledger.
pub struct DenyAll;

impl Entitlements for DenyAll {
    fn check(&self, agent: &AgentId, table: &str, capability: Capability) -> Result<()> {
        Err(Error::Unauthorized(format!(
            "agent {:?} denied {capability:?} on table `{table}`",
            agent.0
        )))
    }
}

/// Verifies that an [`AgentId`] presented to `Database::open_for_agent` is
/// backed by a currently-valid attestation. Not implemented here: a real
/// verifier checks a signature chain against the attestation ledger
/// (spec.md's explicit non-goal) and would return
/// `Error::Unauthorized` on an expired or forged attestation.
pub trait AttestationVerifier: Send + Sync {
    fn verify(&self, agent: &AgentId) -> Result<()>;
}

/// Accepts every identity unverified. The default verifier; an embedder
/// wiring in a real attestation ledger supplies its own.
pub struct NoopAttestation;

impl AttestationVerifier for NoopAttestation {
    fn verify(&self, _agent: &AgentId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_entitlements_grants_everything() {
        let ent = NoopEntitlements;
        let agent = AgentId("a1".into());
        assert!(ent.check(&agent, "t", Capability::Write).is_ok());
    }

    #[test]
    fn deny_all_surfaces_unauthorized() {
        let ent = DenyAll;
        let agent = AgentId("a1".into());
        let err = ent.check(&agent, "t", Capability::Read).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }
}
