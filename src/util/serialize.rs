//! Serde adapters shared by the store models, configuration files and DTOs.

use {
    serde::{de, Deserialize, Deserializer, Serializer},
    serde_with::{DeserializeAs, SerializeAs},
    std::borrow::Cow,
};

/// Serialize and deserialize [`ethereum_types::U256`] as a decimal string.
///
/// The store and the relayer exchange 256-bit amounts as decimal strings, so
/// the native `0x`-hex serde of `ethereum_types` cannot be used for them.
#[derive(Debug)]
pub struct U256;

impl<'de> DeserializeAs<'de, ethereum_types::U256> for U256 {
    fn deserialize_as<D>(deserializer: D) -> Result<ethereum_types::U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Cow::<str>::deserialize(deserializer)?;
        ethereum_types::U256::from_dec_str(&s).map_err(de::Error::custom)
    }
}

impl SerializeAs<ethereum_types::U256> for U256 {
    fn serialize_as<S>(value: &ethereum_types::U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

/// Serialize and deserialize binary data as a `0x`-prefixed hexadecimal
/// string.
#[derive(Debug)]
pub struct Hex;

impl<'de> DeserializeAs<'de, Vec<u8>> for Hex {
    fn deserialize_as<D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Cow::<str>::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").ok_or_else(|| {
            de::Error::custom(format!("failed to decode {s:?} as a hex string: missing \"0x\" prefix",))
        })?;
        hex::decode(stripped).map_err(|err| {
            de::Error::custom(format!("failed to decode {s:?} as a hex string: {err}",))
        })
    }
}

impl SerializeAs<Vec<u8>> for Hex {
    fn serialize_as<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde::Serialize, serde_json::json, serde_with::serde_as};

    #[serde_as]
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        #[serde_as(as = "U256")]
        amount: ethereum_types::U256,
        #[serde_as(as = "Hex")]
        data: Vec<u8>,
    }

    #[test]
    fn u256_as_decimal_string() {
        let record = Record {
            amount: ethereum_types::U256::from_dec_str("100000000000000000000").unwrap(),
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "amount": "100000000000000000000",
                "data": "0xdeadbeef",
            })
        );
        assert_eq!(serde_json::from_value::<Record>(value).unwrap(), record);
    }

    #[test]
    fn hex_requires_prefix() {
        assert!(serde_json::from_value::<Record>(json!({
            "amount": "1",
            "data": "deadbeef",
        }))
        .is_err());
    }
}
