//! Safety categories, thresholds and ratings.

use serde::{Deserialize, Serialize};

/// Harm category (closed enumeration; discriminants are the wire ordinals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_UNSPECIFIED")]
    Unspecified = 0,
    #[serde(rename = "HARM_CATEGORY_DEROGATORY")]
    Derogatory = 1,
    #[serde(rename = "HARM_CATEGORY_TOXICITY")]
    Toxicity = 2,
    #[serde(rename = "HARM_CATEGORY_VIOLENCE")]
    Violence = 3,
    #[serde(rename = "HARM_CATEGORY_SEXUAL")]
    Sexual = 4,
    #[serde(rename = "HARM_CATEGORY_MEDICAL")]
    Medical = 5,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS")]
    Dangerous = 6,
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment = 7,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech = 8,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit = 9,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent = 10,
    #[serde(rename = "HARM_CATEGORY_CIVIC_INTEGRITY")]
    CivicIntegrity = 11,
}

impl HarmCategory {
    pub const ALL: [HarmCategory; 12] = [
        HarmCategory::Unspecified,
        HarmCategory::Derogatory,
        HarmCategory::Toxicity,
        HarmCategory::Violence,
        HarmCategory::Sexual,
        HarmCategory::Medical,
        HarmCategory::Dangerous,
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
        HarmCategory::CivicIntegrity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "HARM_CATEGORY_UNSPECIFIED",
            Self::Derogatory => "HARM_CATEGORY_DEROGATORY",
            Self::Toxicity => "HARM_CATEGORY_TOXICITY",
            Self::Violence => "HARM_CATEGORY_VIOLENCE",
            Self::Sexual => "HARM_CATEGORY_SEXUAL",
            Self::Medical => "HARM_CATEGORY_MEDICAL",
            Self::Dangerous => "HARM_CATEGORY_DANGEROUS",
            Self::Harassment => "HARM_CATEGORY_HARASSMENT",
            Self::HateSpeech => "HARM_CATEGORY_HATE_SPEECH",
            Self::SexuallyExplicit => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            Self::DangerousContent => "HARM_CATEGORY_DANGEROUS_CONTENT",
            Self::CivicIntegrity => "HARM_CATEGORY_CIVIC_INTEGRITY",
        }
    }

    pub fn from_ordinal(n: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as i64 == n)
    }
}

/// Block threshold (closed enumeration; discriminants are the wire ordinals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarmBlockThreshold {
    #[serde(rename = "HARM_BLOCK_THRESHOLD_UNSPECIFIED")]
    Unspecified = 0,
    #[serde(rename = "BLOCK_LOW_AND_ABOVE")]
    BlockLowAndAbove = 1,
    #[serde(rename = "BLOCK_MEDIUM_AND_ABOVE")]
    BlockMediumAndAbove = 2,
    #[serde(rename = "BLOCK_ONLY_HIGH")]
    BlockOnlyHigh = 3,
    #[serde(rename = "BLOCK_NONE")]
    BlockNone = 4,
    #[serde(rename = "OFF")]
    Off = 5,
}

impl HarmBlockThreshold {
    pub const ALL: [HarmBlockThreshold; 6] = [
        HarmBlockThreshold::Unspecified,
        HarmBlockThreshold::BlockLowAndAbove,
        HarmBlockThreshold::BlockMediumAndAbove,
        HarmBlockThreshold::BlockOnlyHigh,
        HarmBlockThreshold::BlockNone,
        HarmBlockThreshold::Off,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "HARM_BLOCK_THRESHOLD_UNSPECIFIED",
            Self::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
            Self::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            Self::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            Self::BlockNone => "BLOCK_NONE",
            Self::Off => "OFF",
        }
    }

    pub fn from_ordinal(n: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as i64 == n)
    }
}

/// Probability that content is harmful, as rated by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmProbability {
    #[default]
    #[serde(rename = "HARM_PROBABILITY_UNSPECIFIED")]
    Unspecified,
    Negligible,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

impl SafetySetting {
    pub fn new(category: HarmCategory, threshold: HarmBlockThreshold) -> Self {
        Self {
            category,
            threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRating {
    pub category: HarmCategory,
    #[serde(default)]
    pub probability: HarmProbability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}
