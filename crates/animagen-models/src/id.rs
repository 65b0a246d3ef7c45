//! Identifier newtypes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $ctor:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($ctor)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Batch job identifier (`batch_` + 12 hex chars).
    JobId,
    format!("batch_{}", &Uuid::new_v4().simple().to_string()[..12])
);

string_id!(
    /// Queue task identifier (8 hex chars, enough for log correlation).
    TaskId,
    Uuid::new_v4().simple().to_string()[..8].to_string()
);

string_id!(
    /// Storyboard shot identifier.
    ShotId,
    format!("shot_{}", &Uuid::new_v4().simple().to_string()[..8])
);

string_id!(
    /// Project identifier.
    ProjectId,
    format!("proj_{}", &Uuid::new_v4().simple().to_string()[..8])
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_has_prefix_and_length() {
        let id = JobId::new();
        assert!(id.as_str().starts_with("batch_"));
        assert_eq!(id.as_str().len(), "batch_".len() + 12);
    }

    #[test]
    fn task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ShotId::from("shot_001");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"shot_001\"");
        let back: ShotId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
