use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Serialize a value using bincode.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a value from a byte slice using bincode.
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use crate::collection::Collection;
    use crate::config::Config;
    use crate::encoding::Value;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        owner: String,
        balance: u64,
        flags: Vec<u8>,
    }

    #[test]
    fn test_round_trip() {
        let account = Account {
            owner: "alice".to_string(),
            balance: 666,
            flags: vec![1, 2, 3],
        };

        let encoded = account.encode().expect("Failed to encode");
        let decoded = Account::decode(&encoded).expect("Failed to decode");
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_primitive_values() {
        let encoded = 42u64.encode().unwrap();
        assert_eq!(u64::decode(&encoded).unwrap(), 42);

        let encoded = "hello".to_string().encode().unwrap();
        assert_eq!(String::decode(&encoded).unwrap(), "hello");
    }

    #[test]
    fn test_truncated_input_rejected() {
        let encoded = Account {
            owner: "bob".to_string(),
            balance: 1,
            flags: vec![],
        }
        .encode()
        .unwrap();

        assert!(Account::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_typed_values_through_collection() {
        let dir = TempDir::new().unwrap();
        let config = Config::new()
            .max_keys(10)
            .max_size(4096)
            .max_per_dir(2)
            .index_capacity(1_000);
        let coll = Collection::open(dir.path(), config).unwrap();

        let account = Account {
            owner: "alice".to_string(),
            balance: 666,
            flags: vec![6, 6, 6],
        };
        coll.set(b"account:alice", &account.encode().unwrap()).unwrap();

        let raw = coll.get(b"account:alice").unwrap();
        assert_eq!(Account::decode(&raw).unwrap(), account);
    }
}
