pub use crate::{
    records::{signing_roots_differ, AttestationRecord, ProposalRecord, SlashingKind},
    store::{store_file_name, Error, Store},
};

mod records;
mod store;
