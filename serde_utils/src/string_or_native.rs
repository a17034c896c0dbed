//! Consensus APIs represent slots and epochs as JSON strings,
//! but some clients submit them as bare numbers. Accept both.
//! Non-human-readable formats pass the value through unchanged.

use core::{
    fmt::{Formatter, Result as FmtResult},
    marker::PhantomData,
};

use serde::{
    de::{Error, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct QuantityVisitor(PhantomData<u64>);

    impl Visitor<'_> for QuantityVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut Formatter) -> FmtResult {
            formatter.write_str("a u64 or a string containing one")
        }

        fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_str<E: Error>(self, string: &str) -> Result<Self::Value, E> {
            string.parse().map_err(E::custom)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_any(QuantityVisitor(PhantomData))
    } else {
        u64::deserialize(deserializer)
    }
}

pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.collect_str(value)
    } else {
        value.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Result, Value};

    #[derive(PartialEq, Eq, Debug, Deserialize, Serialize)]
    struct Wrapper {
        #[serde(with = "super")]
        value: u64,
    }

    #[test]
    fn deserializes_from_string_and_number() -> Result<()> {
        let from_string = serde_json::from_value::<Wrapper>(json!({ "value": "42" }))?;
        let from_number = serde_json::from_value::<Wrapper>(json!({ "value": 42 }))?;

        assert_eq!(from_string, Wrapper { value: 42 });
        assert_eq!(from_number, Wrapper { value: 42 });

        Ok(())
    }

    #[test]
    fn serializes_to_string() -> Result<()> {
        let actual = serde_json::to_value(Wrapper { value: 42 })?;
        assert_eq!(actual, json!({ "value": "42" }));
        Ok(())
    }

    #[test]
    fn rejects_garbage_strings() {
        serde_json::from_value::<Wrapper>(json!({ "value": "fast" }))
            .expect_err("non-numeric strings should be rejected");
    }
}
