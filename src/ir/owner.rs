//! Node identity and single-owner claims.
//!
//! Containers attach children by claiming them with their own [`NodeId`]. A
//! claim is a compare-and-set from "unowned" to the owner id, so two containers
//! racing for the same child see exactly one success.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

const UNOWNED: u64 = 0;

/// Process-unique identity of an IR node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The owner slot of a node that lives in exactly one container.
#[derive(Debug)]
pub struct Claim {
    owner: AtomicU64,
    what: &'static str,
}

impl Claim {
    pub const fn new(what: &'static str) -> Self {
        Claim {
            owner: AtomicU64::new(UNOWNED),
            what,
        }
    }

    /// Attach to `owner`; fails if any owner, including `owner` itself, holds the claim.
    pub fn claim(&self, owner: NodeId) -> Result<()> {
        self.owner
            .compare_exchange(UNOWNED, owner.0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::AlreadyOwned { what: self.what })
    }

    /// Detach from `owner` so the node can be attached elsewhere.
    pub fn release(&self, owner: NodeId) -> Result<()> {
        self.owner
            .compare_exchange(owner.0, UNOWNED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::NotOwned { what: self.what })
    }

    pub fn owner(&self) -> Option<NodeId> {
        match self.owner.load(Ordering::Acquire) {
            UNOWNED => None,
            id => Some(NodeId(id)),
        }
    }

    pub fn is_owned_by(&self, owner: NodeId) -> bool {
        self.owner() == Some(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_and_keeps_first_owner() {
        let claim = Claim::new("node");
        let first = NodeId::fresh();
        let second = NodeId::fresh();

        claim.claim(first).expect("first claim");
        assert!(matches!(
            claim.claim(second),
            Err(Error::AlreadyOwned { what: "node" })
        ));
        assert_eq!(claim.owner(), Some(first));
    }

    #[test]
    fn release_allows_reuse_in_another_place() {
        let claim = Claim::new("node");
        let first = NodeId::fresh();
        let second = NodeId::fresh();

        claim.claim(first).expect("claim");
        assert!(claim.release(second).is_err());
        claim.release(first).expect("release");
        claim.claim(second).expect("claim again");
        assert!(claim.is_owned_by(second));
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let claim = Claim::new("node");
        let owners: Vec<NodeId> = (0..16).map(|_| NodeId::fresh()).collect();
        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = owners
                .iter()
                .map(|owner| {
                    let claim = &claim;
                    scope.spawn(move || claim.claim(*owner).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("join"))
                .filter(|won| *won)
                .count()
        });
        assert_eq!(wins, 1);
    }
}
