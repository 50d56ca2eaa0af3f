//! Platform response shapes and the typed values the core works with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUser {
    pub id: u64,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProfile {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    pub created: DateTime<Utc>,
    pub is_banned: bool,
    pub has_verified_badge: bool,
}

impl ExternalProfile {
    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created).num_days().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BadgePage {
    pub count: u32,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: u64,
    pub group_name: String,
    pub role_id: i64,
    pub rank: u8,
}

// Wire formats

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsernameLookupRequest<'a> {
    pub usernames: [&'a str; 1],
    pub exclude_banned_users: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsernameLookupEntry {
    pub id: u64,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserDetails {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub has_verified_badge: bool,
}

impl From<UserDetails> for ExternalProfile {
    fn from(d: UserDetails) -> Self {
        Self {
            id: d.id,
            name: d.name,
            display_name: d.display_name,
            created: d.created,
            is_banned: d.is_banned,
            has_verified_badge: d.has_verified_badge,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BadgePageResponse {
    pub next_page_cursor: Option<String>,
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupRoleEntry {
    pub group: GroupRef,
    pub role: RoleRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoleRef {
    pub id: i64,
    pub rank: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MembershipList {
    #[serde(default)]
    pub group_memberships: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Membership {
    /// `groups/{group}/memberships/{membership}`
    pub path: String,
    /// `groups/{group}/roles/{role}`
    pub role: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct MembershipUpdate {
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_user_details_deserialize() {
        let raw = r#"{
            "description": "",
            "created": "2015-03-01T12:00:00.000Z",
            "isBanned": true,
            "hasVerifiedBadge": false,
            "id": 156,
            "name": "builderman",
            "displayName": "Builder"
        }"#;
        let details: UserDetails = serde_json::from_str(raw).unwrap();
        let profile = ExternalProfile::from(details);
        assert_eq!(profile.id, 156);
        assert!(profile.is_banned);
        assert!(!profile.has_verified_badge);
    }

    #[test]
    fn test_account_age_never_negative() {
        let now = Utc::now();
        let profile = ExternalProfile {
            id: 1,
            name: "a".into(),
            display_name: "a".into(),
            created: now + Duration::days(3),
            is_banned: false,
            has_verified_badge: false,
        };
        assert_eq!(profile.account_age_days(now), 0);

        let older = ExternalProfile { created: now - Duration::days(45), ..profile };
        assert_eq!(older.account_age_days(now), 45);
    }

    #[test]
    fn test_group_roles_deserialize() {
        let raw = r#"{"data":[{"group":{"id":7,"name":"Raiders","memberCount":10},"role":{"id":99,"name":"Member","rank":1}}]}"#;
        let parsed: DataEnvelope<GroupRoleEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].group.id, 7);
        assert_eq!(parsed.data[0].role.rank, 1);
    }
}
