use kvstore::{AttestationRecord, ProposalRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::primitives::{Epoch, Slot};

/// Why a message must not be signed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum SlashingViolation {
    #[error(
        "attestation source epoch {source_epoch} is below \
         the lowest signed source epoch {lowest}"
    )]
    SourceEpochBelowMinimum { source_epoch: Epoch, lowest: Epoch },
    #[error(
        "attestation target epoch {target_epoch} is less than or equal to \
         the lowest signed target epoch {lowest}"
    )]
    TargetEpochAtOrBelowMinimum { target_epoch: Epoch, lowest: Epoch },
    #[error("attestation is a double vote for target epoch {target_epoch}")]
    DoubleVote { target_epoch: Epoch },
    #[error("attestation surrounds a previously signed attestation")]
    SurroundingVote,
    #[error("attestation is surrounded by a previously signed attestation")]
    SurroundedVote,
    #[error("block at slot {slot} was already signed with a different signing root")]
    DoubleProposal { slot: Slot },
    #[error(
        "block slot {slot} is less than or equal to \
         the lowest signed proposal slot {lowest}"
    )]
    SlotAtOrBelowMinimum { slot: Slot, lowest: Slot },
}

/// The verdict returned for every checked message. A slashable verdict is a
/// success for the service, not an error.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Check {
    pub slashable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slashing: Option<String>,
}

impl Check {
    #[must_use]
    pub const fn not_slashable() -> Self {
        Self {
            slashable: false,
            slashing: None,
        }
    }

    #[must_use]
    pub fn slashable(violation: SlashingViolation) -> Self {
        Self {
            slashable: true,
            slashing: Some(violation.to_string()),
        }
    }
}

/// A raw dump of one validator's recorded history, for diagnostics.
/// No ordering is guaranteed.
#[derive(Default, Debug)]
pub struct History {
    pub proposals: Vec<ProposalRecord>,
    pub attestations: Vec<AttestationRecord>,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Result, Value};

    use super::*;

    #[test]
    fn not_slashable_check_omits_the_reason() -> Result<()> {
        let actual = serde_json::to_value(Check::not_slashable())?;
        assert_eq!(actual, json!({ "slashable": false }));
        Ok(())
    }

    #[test]
    fn slashable_check_carries_the_reason() -> Result<()> {
        let check = Check::slashable(SlashingViolation::DoubleVote { target_epoch: 1 });
        let actual = serde_json::to_value(check)?;

        let expected: Value = json!({
            "slashable": true,
            "slashing": "attestation is a double vote for target epoch 1",
        });

        assert_eq!(actual, expected);

        Ok(())
    }
}
