use rusty_ulid::Ulid;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Correlation id of one bridge request. A ULID string, so ids sort by
/// creation time in the logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    pub fn new() -> Eid {
        Eid(Ulid::generate().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Eid {
    fn from(id: &str) -> Self {
        Eid(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique_ulids() {
        let a = Eid::new();
        let b = Eid::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let eid = Eid::from("01HZX");
        assert_eq!(serde_json::to_string(&eid).unwrap(), r#""01HZX""#);
        assert_eq!(eid.to_string(), "01HZX");
    }
}
