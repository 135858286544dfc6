use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Newtype around a remote-issued identifier. The value is opaque: it is only
/// ever passed back to the service, never parsed.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(SessionId);
opaque_id!(ExperimentId);
opaque_id!(ParticipantId);

impl SessionId {
    /// Mint a locally unique session id. Only stub services do this; real
    /// session ids always come from the remote service.
    pub fn generate() -> Self {
        Self(format!("sess_{}", Uuid::now_v7()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_id_has_prefix() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ExperimentId::from_raw("e3b0c442-98fc");
        assert_eq!(id.as_str(), "e3b0c442-98fc");
        assert_eq!(id.to_string(), "e3b0c442-98fc");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = SessionId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn empty_detection() {
        assert!(ParticipantId::from_raw("").is_empty());
        assert!(!ParticipantId::from_raw("p1").is_empty());
    }
}
