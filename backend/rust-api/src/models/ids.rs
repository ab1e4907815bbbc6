use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parses the dash-separated form. The nil id is reserved for "absent".
            pub fn parse(value: &str) -> Result<Self, DomainError> {
                let uuid = Uuid::parse_str(value.trim()).map_err(|_| {
                    DomainError::invalid(format!("{} '{}' is not a valid id", $label, value))
                })?;
                Self::from_uuid(uuid)
            }

            pub fn from_uuid(uuid: Uuid) -> Result<Self, DomainError> {
                if uuid.is_nil() {
                    return Err(DomainError::invalid(format!("{} must not be empty", $label)));
                }
                Ok(Self(uuid))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// First eight hex digits, used in share links and logs.
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.to_string()
            }
        }
    };
}

uuid_id!(QuizId, "quiz id");
uuid_id!(QuestionId, "question id");
uuid_id!(AnswerId, "answer id");
uuid_id!(CategoryId, "category id");
uuid_id!(SessionId, "session id");
uuid_id!(MarathonGameId, "marathon game id");
uuid_id!(PersonalBestId, "personal best id");
uuid_id!(DailyQuizId, "daily quiz id");
uuid_id!(DailyGameId, "daily game id");
uuid_id!(DuelMatchId, "duel match id");
uuid_id!(ChallengeId, "challenge id");
uuid_id!(ReferralId, "referral id");

const MAX_USER_ID_LEN: usize = 64;

/// Messaging-platform user id. Kept as text because the platform hands out
/// 64-bit integers that clients routinely pass around as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid("user id must not be empty"));
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(DomainError::invalid("user id is too long"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn from_platform(id: i64) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> String {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_id_is_rejected() {
        let err = QuizId::parse("00000000-0000-0000-0000-000000000000").unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn test_id_roundtrips_through_display() {
        let id = DuelMatchId::new();
        let parsed: DuelMatchId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = QuestionId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
        assert!(serde_json::from_str::<QuestionId>("\"not-a-uuid\"").is_err());
    }

    #[test]
    fn test_user_id_validation() {
        assert_eq!(UserId::parse(" 42 ").unwrap().as_str(), "42");
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse(&"9".repeat(65)).is_err());
        assert_eq!(UserId::from_platform(777).to_string(), "777");
    }
}
