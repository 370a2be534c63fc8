//! Supported model ids.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Error returned for a model id the gateway does not serve.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported model: {0}")]
pub struct UnsupportedModel(pub String);

/// Models the `claude` CLI can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedModel {
    Opus4,
    Sonnet4,
    Sonnet37,
    Haiku35,
}

impl SupportedModel {
    pub const ALL: [Self; 4] = [Self::Opus4, Self::Sonnet4, Self::Sonnet37, Self::Haiku35];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opus4 => "claude-opus-4-20250514",
            Self::Sonnet4 => "claude-sonnet-4-20250514",
            Self::Sonnet37 => "claude-3-7-sonnet-20250219",
            Self::Haiku35 => "claude-3-5-haiku-20241022",
        }
    }

    /// Release date encoded in the id, as a unix timestamp.
    #[must_use]
    pub fn released(self) -> i64 {
        self.as_str()
            .rsplit('-')
            .next()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map_or(0, |dt| dt.and_utc().timestamp())
    }
}

impl fmt::Display for SupportedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportedModel {
    type Err = UnsupportedModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| UnsupportedModel(s.to_string()))
    }
}

/// Entry of `GET /v1/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl From<SupportedModel> for ModelCard {
    fn from(model: SupportedModel) -> Self {
        Self {
            id: model.as_str().to_string(),
            object: "model".to_string(),
            created: model.released(),
            owned_by: "anthropic".to_string(),
        }
    }
}

/// Body of `GET /v1/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    /// Every supported model.
    #[must_use]
    pub fn supported() -> Self {
        Self {
            object: "list".to_string(),
            data: SupportedModel::ALL.into_iter().map(ModelCard::from).collect(),
        }
    }
}
