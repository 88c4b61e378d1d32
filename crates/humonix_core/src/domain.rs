//! crates/humonix_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! Field names serialize in camelCase, which is how the hosted document store keeps them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ports::PortError;

/// Languages assigned to a profile when the signup form leaves them empty.
pub const DEFAULT_LANGUAGE: &str = "English";

/// Display name given to the auth identity when the signup form has no name.
pub const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous User";

//=========================================================================================
// Identity
//=========================================================================================

/// The authentication provider's id for a logged-in principal.
///
/// The same string keys the principal's profile document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// User Profile
//=========================================================================================

/// The profile aggregate stored once per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: IdentityId,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub college: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub emotional_tags: Vec<String>,
    /// Ordered; the first entry is the primary language.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub kindness_points: u64,
    #[serde(default)]
    pub streak_days: u64,
    #[serde(default = "empty_settings")]
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_settings() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl UserRecord {
    /// Builds the initial record for a freshly created identity.
    ///
    /// Counters start at zero, no badges are earned and admin rights are never
    /// granted from the signup form.
    pub fn from_signup(id: IdentityId, fields: ProfileFields, now: DateTime<Utc>) -> Self {
        let languages = if fields.languages.is_empty() {
            vec![DEFAULT_LANGUAGE.to_string()]
        } else {
            fields.languages
        };

        Self {
            id,
            email: fields.email,
            name: fields.name.unwrap_or_default(),
            avatar: fields.avatar,
            is_anonymous: fields.is_anonymous,
            college: fields.college.unwrap_or_default(),
            phone: fields.phone.unwrap_or_default(),
            interests: fields.interests,
            emotional_tags: fields.emotional_tags,
            languages,
            is_admin: false,
            badges: Vec::new(),
            kindness_points: 0,
            streak_days: 0,
            settings: empty_settings(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn primary_language(&self) -> Option<&str> {
        self.languages.first().map(String::as_str)
    }
}

/// The onboarding form payload used at signup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileFields {
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub is_anonymous: bool,
    pub college: Option<String>,
    pub phone: Option<String>,
    pub interests: Vec<String>,
    pub emotional_tags: Vec<String>,
    pub languages: Vec<String>,
}

impl ProfileFields {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    /// The name the auth provider should display for this profile.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => ANONYMOUS_DISPLAY_NAME,
        }
    }
}

/// A partial update to a `UserRecord`.
///
/// Only the fields that are `Some` are written; the backend merges them shallowly.
/// The id and creation time are not part of the patch because they never change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_anonymous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub college: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badges: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kindness_points: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak_days: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

impl UserPatch {
    pub fn kindness_points(points: u64) -> Self {
        Self {
            kindness_points: Some(points),
            ..Default::default()
        }
    }

    pub fn streak_days(days: u64) -> Self {
        Self {
            streak_days: Some(days),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

//=========================================================================================
// Moods
//=========================================================================================

/// The fixed set of moods a user can pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodLabel {
    Overwhelmed,
    Anxious,
    Lonely,
    Excited,
    Confused,
    Peaceful,
    Tired,
    Motivated,
}

impl MoodLabel {
    pub const ALL: [MoodLabel; 8] = [
        MoodLabel::Overwhelmed,
        MoodLabel::Anxious,
        MoodLabel::Lonely,
        MoodLabel::Excited,
        MoodLabel::Confused,
        MoodLabel::Peaceful,
        MoodLabel::Tired,
        MoodLabel::Motivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodLabel::Overwhelmed => "overwhelmed",
            MoodLabel::Anxious => "anxious",
            MoodLabel::Lonely => "lonely",
            MoodLabel::Excited => "excited",
            MoodLabel::Confused => "confused",
            MoodLabel::Peaceful => "peaceful",
            MoodLabel::Tired => "tired",
            MoodLabel::Motivated => "motivated",
        }
    }
}

impl std::str::FromStr for MoodLabel {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoodLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PortError::InvalidInput(format!("unknown mood '{}'", s)))
    }
}

/// A self-reported mood intensity, always within `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Intensity(u8);

impl Intensity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Result<Self, PortError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PortError::InvalidIntensity(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Intensity {
    type Error = PortError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Intensity::new(value)
    }
}

impl From<Intensity> for u8 {
    fn from(value: Intensity) -> Self {
        value.0
    }
}

/// The mood a user just selected in the UI, before it is validated and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MoodState {
    pub mood: MoodLabel,
    /// Raw slider value; validated when the mood is stored.
    pub intensity: u8,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

impl MoodState {
    pub fn new(mood: MoodLabel, intensity: u8) -> Self {
        Self {
            mood,
            intensity,
            tags: Vec::new(),
            timestamp: Utc::now(),
            notes: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A stored mood report. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: IdentityId,
    pub mood: MoodLabel,
    pub intensity: Intensity,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

//=========================================================================================
// Conversations and Community
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Ai,
    Peer,
    Video,
}

/// A finished voice/video conversation, recorded for the wellness dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: IdentityId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    /// Length of the conversation in seconds.
    pub duration: u64,
    pub mood: String,
    pub satisfaction: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Text,
    Voice,
    Art,
    Poetry,
}

/// A post on the community feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: IdentityId,
    pub author_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: PostKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub is_anonymous: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intensity_accepts_only_one_through_ten() {
        assert!(Intensity::new(0).is_err());
        assert_eq!(Intensity::new(1).unwrap().get(), 1);
        assert_eq!(Intensity::new(10).unwrap().get(), 10);
        assert!(matches!(
            Intensity::new(11),
            Err(PortError::InvalidIntensity(11))
        ));
    }

    #[test]
    fn stored_intensity_out_of_range_is_rejected_on_decode() {
        let raw = json!({
            "userId": "u1",
            "mood": "tired",
            "intensity": 42,
            "tags": [],
            "timestamp": "2024-03-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<MoodEntry>(raw).is_err());
    }

    #[test]
    fn signup_record_starts_with_empty_counters() {
        let mut fields = ProfileFields::new("a@b.com");
        fields.name = Some("Asha".to_string());
        let record = UserRecord::from_signup(IdentityId::new("uid-1"), fields, Utc::now());

        assert_eq!(record.kindness_points, 0);
        assert_eq!(record.streak_days, 0);
        assert!(record.badges.is_empty());
        assert!(!record.is_admin);
        assert_eq!(record.primary_language(), Some(DEFAULT_LANGUAGE));
        assert_eq!(record.settings, json!({}));
    }

    #[test]
    fn display_name_falls_back_for_blank_names() {
        let mut fields = ProfileFields::new("a@b.com");
        assert_eq!(fields.display_name(), ANONYMOUS_DISPLAY_NAME);
        fields.name = Some("   ".to_string());
        assert_eq!(fields.display_name(), ANONYMOUS_DISPLAY_NAME);
        fields.name = Some("Ravi".to_string());
        assert_eq!(fields.display_name(), "Ravi");
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = UserPatch::kindness_points(15);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({ "kindnessPoints": 15 }));
        assert!(UserPatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn mood_labels_parse_case_insensitively() {
        assert_eq!("Peaceful".parse::<MoodLabel>().unwrap(), MoodLabel::Peaceful);
        assert!("grumpy".parse::<MoodLabel>().is_err());
    }
}
