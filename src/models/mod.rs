// Domain records shared by the vector store, matching engine and alert loop


use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Metadata `type` value for opportunity records
pub const OPPORTUNITY_TYPE: &str = "opportunity";
/// Metadata `type` value for company profile records
pub const COMPANY_PROFILE_TYPE: &str = "company_profile";

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single metadata value attached to a vector record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl MetadataValue {
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text values as a one-element list, lists as-is
    #[inline]
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Self::Text(text) => vec![text.clone()],
            Self::List(items) => items.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for MetadataValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for MetadataValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    #[inline]
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A vector with its identifier and metadata, as stored in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    #[inline]
    pub fn new(id: impl Into<String>, values: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            values,
            metadata,
        }
    }

    #[inline]
    pub fn record_type(&self) -> Option<&str> {
        self.metadata.get("type").and_then(MetadataValue::as_text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

/// Business identity and capabilities, owned by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompanyProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    pub naics_codes: Vec<String>,
    pub certifications: Vec<String>,
    pub capabilities: Vec<String>,
    pub past_performance: Option<String>,
    pub contact: ContactInfo,
}

impl CompanyProfile {
    /// Text used to derive the profile's vector.
    ///
    /// Contact details carry no capability signal and are left out.
    #[inline]
    pub fn capability_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.name.trim().is_empty() {
            parts.push(self.name.trim().to_string());
        }
        if !self.description.trim().is_empty() {
            parts.push(self.description.trim().to_string());
        }
        if !self.capabilities.is_empty() {
            parts.push(format!("Capabilities: {}", self.capabilities.join(", ")));
        }
        if !self.naics_codes.is_empty() {
            parts.push(format!("NAICS: {}", self.naics_codes.join(", ")));
        }
        if !self.certifications.is_empty() {
            parts.push(format!("Certifications: {}", self.certifications.join(", ")));
        }
        if let Some(past_performance) = self
            .past_performance
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            parts.push(format!("Past performance: {}", past_performance.trim()));
        }
        parts.join("\n")
    }

    #[inline]
    pub fn to_record(&self, values: Vec<f32>) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), COMPANY_PROFILE_TYPE.into());
        metadata.insert("name".to_string(), self.name.clone().into());
        metadata.insert("naicsCodes".to_string(), self.naics_codes.clone().into());
        metadata.insert(
            "certifications".to_string(),
            self.certifications.clone().into(),
        );
        VectorRecord::new(self.id.clone(), values, metadata)
    }
}

/// A candidate contract opportunity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub synopsis: String,
    pub agency: Option<String>,
    pub naics_codes: Vec<String>,
    pub set_aside: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub response_deadline: Option<NaiveDate>,
    pub status: Option<String>,
    pub url: Option<String>,
}

impl Opportunity {
    /// Text used to derive the opportunity's vector
    #[inline]
    pub fn embedding_text(&self) -> String {
        let mut text = self.title.trim().to_string();
        if !self.synopsis.trim().is_empty() {
            text.push('\n');
            text.push_str(self.synopsis.trim());
        }
        if !self.naics_codes.is_empty() {
            text.push_str("\nNAICS: ");
            text.push_str(&self.naics_codes.join(", "));
        }
        text
    }

    #[inline]
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), OPPORTUNITY_TYPE.into());
        metadata.insert("title".to_string(), self.title.clone().into());
        metadata.insert("synopsis".to_string(), self.synopsis.clone().into());
        match self.naics_codes.as_slice() {
            [] => {}
            [single] => {
                metadata.insert("naicsCode".to_string(), single.clone().into());
            }
            codes => {
                metadata.insert("naicsCode".to_string(), codes.to_vec().into());
            }
        }
        let optional_fields = [
            ("agency", self.agency.clone()),
            ("setAside", self.set_aside.clone()),
            (
                "postedDate",
                self.posted_date.map(|d| d.format(DATE_FORMAT).to_string()),
            ),
            (
                "responseDeadline",
                self.response_deadline
                    .map(|d| d.format(DATE_FORMAT).to_string()),
            ),
            ("status", self.status.clone()),
            ("url", self.url.clone()),
        ];
        for (key, value) in optional_fields {
            if let Some(value) = value {
                metadata.insert(key.to_string(), value.into());
            }
        }
        metadata
    }

    #[inline]
    pub fn to_record(&self, values: Vec<f32>) -> VectorRecord {
        VectorRecord::new(self.id.clone(), values, self.to_metadata())
    }

    /// Rebuild an opportunity from stored metadata.
    ///
    /// Missing fields are tolerated; the title falls back to the record id.
    #[inline]
    pub fn from_metadata(id: &str, metadata: &Metadata) -> Self {
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(MetadataValue::as_text)
                .map(ToString::to_string)
        };
        let date = |key: &str| {
            metadata
                .get(key)
                .and_then(MetadataValue::as_text)
                .and_then(parse_date)
        };

        Self {
            id: id.to_string(),
            title: text("title").unwrap_or_else(|| id.to_string()),
            synopsis: text("synopsis").unwrap_or_default(),
            agency: text("agency"),
            naics_codes: metadata
                .get("naicsCode")
                .map(MetadataValue::to_string_list)
                .unwrap_or_default(),
            set_aside: text("setAside"),
            posted_date: date("postedDate"),
            response_deadline: date("responseDeadline"),
            status: text("status"),
            url: text("url"),
        }
    }
}

/// Accepts plain dates as well as RFC 3339 timestamps
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// An opportunity scored against a query vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub opportunity: Opportunity,
    /// Backend-native similarity, higher is better
    pub score: f32,
}

/// Ranked results of one search, with observability counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub results: Vec<MatchResult>,
    pub total_results: usize,
    /// Records excluded because their dimension disagreed with the query
    pub skipped_records: usize,
    #[serde(skip)]
    pub from_cache: bool,
}

impl SearchOutcome {
    #[inline]
    pub fn new(results: Vec<MatchResult>, skipped_records: usize) -> Self {
        Self {
            total_results: results.len(),
            results,
            skipped_records,
            from_cache: false,
        }
    }
}

/// A deduplicated notice that a profile matches an opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAlert {
    pub id: String,
    pub company_profile_id: String,
    pub opportunity_id: String,
    pub opportunity_title: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub action_taken: Option<String>,
}

impl MatchAlert {
    #[inline]
    pub fn new(company_profile_id: &str, result: &MatchResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_profile_id: company_profile_id.to_string(),
            opportunity_id: result.opportunity.id.clone(),
            opportunity_title: result.opportunity.title.clone(),
            score: result.score,
            created_at: Utc::now(),
            read: false,
            action_taken: None,
        }
    }
}
