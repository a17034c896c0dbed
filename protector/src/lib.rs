pub use crate::{
    check::{Check, History, SlashingViolation},
    protector::{Error, KvProtector, PoolIntrospection, Protector},
};

mod check;
mod protector;
