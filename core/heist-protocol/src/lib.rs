//! IPC protocol types and validation for heist-daemon.
//!
//! Shared by the daemon and its clients so request shapes cannot drift. The
//! daemon stays the authority on domain rules; this crate only checks that a
//! request is well-formed before it reaches the heist service.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_FEED_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    StartEvent,
    JoinEvent,
    ResetEvent,
    ListTargets,
    UpsertTarget,
    GetMemberStats,
    Bailout,
    Revive,
    ClearMember,
    GetConfig,
    UpdateConfig,
    ListThemes,
    SetTheme,
    GetFeed,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Shape checks run on every parsed params payload.
pub trait Validate {
    fn validate(&self) -> Result<(), ErrorInfo>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommunityParams {
    pub community_id: String,
}

impl Validate for CommunityParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")
    }
}

/// Identifies one member of a community. `display_name` lets clients keep the
/// daemon's member directory current without a separate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberParams {
    pub community_id: String,
    pub member_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Validate for MemberParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")?;
        require_id(&self.member_id, "member_id")?;
        if let Some(name) = &self.display_name {
            if name.len() > MAX_ID_LEN {
                return Err(ErrorInfo::new(
                    "invalid_display_name",
                    format!("display_name must be {} characters or fewer", MAX_ID_LEN),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BailoutParams {
    pub community_id: String,
    pub payer_id: String,
    /// Defaults to the payer when absent.
    #[serde(default)]
    pub member_id: Option<String>,
}

impl Validate for BailoutParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")?;
        require_id(&self.payer_id, "payer_id")?;
        if let Some(member_id) = &self.member_id {
            require_id(member_id, "member_id")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetParams {
    pub community_id: String,
    pub target_id: String,
    pub crew_size: u32,
    pub success: f64,
    pub vault: i64,
    pub vault_max: i64,
}

impl Validate for TargetParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")?;
        require_id(&self.target_id, "target_id")?;
        if !self.success.is_finite() {
            return Err(ErrorInfo::new("invalid_params", "success must be a number"));
        }
        Ok(())
    }
}

/// Partial configuration update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdateParams {
    pub community_id: String,
    #[serde(default)]
    pub cost: Option<i64>,
    #[serde(default)]
    pub bail: Option<i64>,
    #[serde(default)]
    pub sentence_secs: Option<u64>,
    #[serde(default)]
    pub patrol_secs: Option<u64>,
    #[serde(default)]
    pub death_secs: Option<u64>,
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

impl Validate for ConfigUpdateParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThemeParams {
    pub community_id: String,
    pub theme_id: String,
}

impl Validate for ThemeParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")?;
        require_id(&self.theme_id, "theme_id")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedParams {
    pub community_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FeedParams {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(50).min(MAX_FEED_LIMIT)
    }
}

impl Validate for FeedParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.community_id, "community_id")
    }
}

pub fn parse_params<T>(params: Option<Value>) -> Result<T, ErrorInfo>
where
    T: DeserializeOwned + Validate,
{
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    let parsed: T = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new("invalid_params", format!("params are invalid: {}", err))
    })?;
    parsed.validate()?;
    Ok(parsed)
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_params",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_member_params() {
        let parsed: MemberParams = parse_params(Some(json!({
            "community_id": "guild-1",
            "member_id": "member-1",
            "display_name": "Rook"
        })))
        .expect("parse member params");
        assert_eq!(parsed.member_id, "member-1");
        assert_eq!(parsed.display_name.as_deref(), Some("Rook"));
    }

    #[test]
    fn rejects_missing_params() {
        let err = parse_params::<CommunityParams>(None).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_blank_member_id() {
        let err = parse_params::<MemberParams>(Some(json!({
            "community_id": "guild-1",
            "member_id": "   "
        })))
        .unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_params::<CommunityParams>(Some(json!({
            "community_id": "guild-1",
            "extra": true
        })))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_long_community_id() {
        let err = parse_params::<CommunityParams>(Some(json!({
            "community_id": "a".repeat(256)
        })))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn feed_limit_is_clamped() {
        let params = FeedParams {
            community_id: "guild-1".to_string(),
            limit: Some(10_000),
        };
        assert_eq!(params.effective_limit(), MAX_FEED_LIMIT);
    }

    #[test]
    fn method_names_are_snake_case() {
        let value = serde_json::to_value(Method::GetMemberStats).expect("serialize method");
        assert_eq!(value, json!("get_member_stats"));
    }
}
