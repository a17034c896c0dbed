use fixed_hash::construct_fixed_hash;
use impl_serde::impl_fixed_hash_serde;

pub use ethereum_types::H256;

pub type Slot = u64;
pub type Epoch = u64;
pub type CommitteeIndex = u64;
pub type UnixSeconds = i64;

pub const PUBLIC_KEY_SIZE: usize = 48;

construct_fixed_hash! {
    /// A compressed BLS public key. Treated as opaque bytes:
    /// the service never verifies signatures.
    pub struct PublicKeyBytes(PUBLIC_KEY_SIZE);
}

impl_fixed_hash_serde!(PublicKeyBytes, PUBLIC_KEY_SIZE);

impl hex::FromHex for PublicKeyBytes {
    type Error = <[u8; PUBLIC_KEY_SIZE] as hex::FromHex>::Error;

    fn from_hex<T: AsRef<[u8]>>(digits: T) -> Result<Self, Self::Error> {
        hex::FromHex::from_hex(digits).map(Self)
    }
}
