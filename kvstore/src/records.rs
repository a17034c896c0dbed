use serde::{Deserialize, Serialize};
use types::primitives::{Epoch, Slot, H256};

/// Outcome of checking an attestation against the recorded history.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlashingKind {
    None,
    DoubleVote,
    SurroundingVote,
    SurroundedVote,
}

/// One signed attestation, indexed by its target epoch.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct AttestationRecord {
    pub source_epoch: Epoch,
    pub target_epoch: Epoch,
    pub signing_root: H256,
}

/// One signed block proposal, indexed by its slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProposalRecord {
    pub slot: Slot,
    pub signing_root: H256,
}

/// A zero stored root means the root of the recorded message is unknown,
/// so it must be treated as differing from any incoming root.
#[must_use]
pub fn signing_roots_differ(existing: Option<H256>, incoming: H256) -> bool {
    match existing {
        Some(existing) => existing.is_zero() || existing != incoming,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_absent_roots_differ_from_everything() {
        let root = H256::repeat_byte(1);

        assert!(signing_roots_differ(None, root));
        assert!(signing_roots_differ(Some(H256::zero()), root));
        assert!(signing_roots_differ(Some(H256::zero()), H256::zero()));
        assert!(signing_roots_differ(Some(H256::repeat_byte(2)), root));
        assert!(!signing_roots_differ(Some(root), root));
    }
}
