//! Serialize u64 seeds as strings so JavaScript consumers never lose
//! precision past 2^53.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.parse::<u64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Wrapper {
        #[serde(with = "super")]
        seed: u64,
    }

    #[test]
    fn round_trips_large_seeds_as_strings() {
        let original = Wrapper {
            seed: u64::MAX - 17,
        };
        let json = serde_json::to_string(&original).expect("serialize");
        assert!(json.contains('"'), "seed should serialize as a string");
        let decoded: Wrapper = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(original, decoded);
    }

    #[test]
    fn accepts_bare_numbers_for_hand_written_configs() {
        let decoded: Wrapper = serde_json::from_str(r#"{"seed": 42}"#).expect("deserialize");
        assert_eq!(decoded.seed, 42);
    }
}
