//! Domain vocabulary shared by the store, the bridge, and the services.
//!
//! Enums carry their wire/storage spelling (`as_str` / `parse`) and a display
//! label. Ordering and classification rules live in `pipeline`, not here.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Messaging surface a prospect is worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Facebook,
    Sms,
    Whatsapp,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Instagram,
        Platform::Facebook,
        Platform::Sms,
        Platform::Whatsapp,
        Platform::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Sms => "sms",
            Platform::Whatsapp => "whatsapp",
            Platform::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "instagram" => Some(Platform::Instagram),
            "facebook" => Some(Platform::Facebook),
            "sms" => Some(Platform::Sms),
            "whatsapp" => Some(Platform::Whatsapp),
            "other" => Some(Platform::Other),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::Sms => "SMS",
            Platform::Whatsapp => "WhatsApp",
            Platform::Other => "Other",
        }
    }

    /// Profile link for a handle on this platform.
    ///
    /// SMS and WhatsApp need a phone number; a handle with no digits yields `None`.
    pub fn profile_url(&self, handle: &str) -> Option<String> {
        let clean = handle.trim().trim_start_matches('@');
        if clean.is_empty() {
            return None;
        }
        let digits: String = clean.chars().filter(|c| c.is_ascii_digit()).collect();
        match self {
            Platform::Instagram => Some(format!("https://instagram.com/{clean}")),
            Platform::Facebook => Some(format!("https://facebook.com/{clean}")),
            Platform::Whatsapp if !digits.is_empty() => Some(format!("https://wa.me/{digits}")),
            Platform::Sms if !digits.is_empty() => Some(format!("sms:{digits}")),
            _ => None,
        }
    }
}

/// Funnel position. `Dnd` is a side branch outside the linear pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunnelStage {
    New,
    Engaged,
    Presented,
    FollowUp,
    Client,
    Dnd,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 6] = [
        FunnelStage::New,
        FunnelStage::Engaged,
        FunnelStage::Presented,
        FunnelStage::FollowUp,
        FunnelStage::Client,
        FunnelStage::Dnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::New => "new",
            FunnelStage::Engaged => "engaged",
            FunnelStage::Presented => "presented",
            FunnelStage::FollowUp => "followUp",
            FunnelStage::Client => "client",
            FunnelStage::Dnd => "dnd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "new" => Some(FunnelStage::New),
            "engaged" => Some(FunnelStage::Engaged),
            "presented" => Some(FunnelStage::Presented),
            "followUp" => Some(FunnelStage::FollowUp),
            "client" => Some(FunnelStage::Client),
            "dnd" => Some(FunnelStage::Dnd),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FunnelStage::New => "New",
            FunnelStage::Engaged => "Engaged",
            FunnelStage::Presented => "Presented",
            FunnelStage::FollowUp => "Follow-Up",
            FunnelStage::Client => "Client",
            FunnelStage::Dnd => "DND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Message,
    Call,
    Meeting,
    Note,
    StageChange,
    Contacted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Message => "message",
            ActivityType::Call => "call",
            ActivityType::Meeting => "meeting",
            ActivityType::Note => "note",
            ActivityType::StageChange => "stage_change",
            ActivityType::Contacted => "contacted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(ActivityType::Message),
            "call" => Some(ActivityType::Call),
            "meeting" => Some(ActivityType::Meeting),
            "note" => Some(ActivityType::Note),
            "stage_change" => Some(ActivityType::StageChange),
            "contacted" => Some(ActivityType::Contacted),
            _ => None,
        }
    }

    /// Communication activities also refresh the prospect's last-contact time.
    pub fn counts_as_contact(&self) -> bool {
        matches!(
            self,
            ActivityType::Message | ActivityType::Call | ActivityType::Meeting
        )
    }

    /// Types a user may log by hand; the rest are written by other flows.
    pub fn is_loggable(&self) -> bool {
        matches!(
            self,
            ActivityType::Message | ActivityType::Call | ActivityType::Meeting | ActivityType::Note
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateCategory {
    InitialOutreach,
    FollowUp,
    ObjectionHandler,
    CheckIn,
    Custom,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::InitialOutreach => "initialOutreach",
            TemplateCategory::FollowUp => "followUp",
            TemplateCategory::ObjectionHandler => "objectionHandler",
            TemplateCategory::CheckIn => "checkIn",
            TemplateCategory::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initialOutreach" => Some(TemplateCategory::InitialOutreach),
            "followUp" => Some(TemplateCategory::FollowUp),
            "objectionHandler" => Some(TemplateCategory::ObjectionHandler),
            "checkIn" => Some(TemplateCategory::CheckIn),
            "custom" => Some(TemplateCategory::Custom),
            _ => None,
        }
    }

    pub fn order(&self) -> u8 {
        match self {
            TemplateCategory::InitialOutreach => 0,
            TemplateCategory::FollowUp => 1,
            TemplateCategory::ObjectionHandler => 2,
            TemplateCategory::CheckIn => 3,
            TemplateCategory::Custom => 4,
        }
    }
}

/// The sender's own details, substituted into `{{product}}` / `{{myName}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub offering: String,
}

/// Configuration stored in `<data_dir>/config.json`.
///
/// Every field is defaulted so a partial (or absent) file still loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// IANA timezone used for calendar-day classification. Falls back to UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Shared container directory visible to the capture process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_group_dir: Option<String>,
    #[serde(default)]
    pub notifications_enabled: bool,
    #[serde(default = "default_morning_reminder_hour")]
    pub morning_reminder_hour: u32,
    #[serde(default)]
    pub calendar_sync_enabled: bool,
    #[serde(default)]
    pub profile: UserProfile,
}

fn default_morning_reminder_hour() -> u32 {
    9
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: None,
            app_group_dir: None,
            notifications_enabled: false,
            morning_reminder_hour: default_morning_reminder_hour(),
            calendar_sync_enabled: false,
            profile: UserProfile::default(),
        }
    }
}

impl Config {
    /// Resolve the configured timezone, falling back to UTC on absence or typo.
    pub fn tz(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| match name.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    log::warn!("Unknown timezone '{}' in config, using UTC", name);
                    None
                }
            })
            .unwrap_or(Tz::UTC)
    }

    pub fn reminder_hour(&self) -> u32 {
        self.morning_reminder_hour.min(23)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trips_through_storage_spelling() {
        for stage in FunnelStage::ALL {
            assert_eq!(FunnelStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(FunnelStage::parse("follow_up"), None);
    }

    #[test]
    fn test_stage_serde_matches_storage_spelling() {
        let json = serde_json::to_string(&FunnelStage::FollowUp).unwrap();
        assert_eq!(json, "\"followUp\"");
    }

    #[test]
    fn test_platform_parse_rejects_display_names() {
        assert_eq!(Platform::parse("whatsapp"), Some(Platform::Whatsapp));
        assert_eq!(Platform::parse("WhatsApp"), None);
    }

    #[test]
    fn test_profile_url_strips_at_and_needs_digits_for_phone() {
        assert_eq!(
            Platform::Instagram.profile_url("@jane.doe").as_deref(),
            Some("https://instagram.com/jane.doe")
        );
        assert_eq!(
            Platform::Whatsapp.profile_url("+1 (555) 010-2000").as_deref(),
            Some("https://wa.me/15550102000")
        );
        assert_eq!(Platform::Sms.profile_url("jane"), None);
        assert_eq!(Platform::Other.profile_url("jane"), None);
    }

    #[test]
    fn test_contact_activity_types() {
        assert!(ActivityType::Call.counts_as_contact());
        assert!(!ActivityType::Note.counts_as_contact());
        assert!(!ActivityType::StageChange.is_loggable());
    }

    #[test]
    fn test_config_defaults_from_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.morning_reminder_hour, 9);
        assert!(!config.notifications_enabled);
        assert_eq!(config.tz(), Tz::UTC);
    }

    #[test]
    fn test_config_timezone_and_hour_clamp() {
        let config: Config = serde_json::from_str(
            r#"{"timezone":"America/Chicago","morningReminderHour":42}"#,
        )
        .unwrap();
        assert_eq!(config.tz(), chrono_tz::America::Chicago);
        assert_eq!(config.reminder_hour(), 23);

        let bad: Config = serde_json::from_str(r#"{"timezone":"Mars/Olympus"}"#).unwrap();
        assert_eq!(bad.tz(), Tz::UTC);
    }
}
