// src/record.rs
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::country::CountryKey;

/// Scores strictly above this are POSITIVE, strictly below the negation are NEGATIVE.
pub const LABEL_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > LABEL_THRESHOLD {
            Self::Positive
        } else if score < -LABEL_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HeadlineCategory {
    Good,
    Bad,
    #[serde(other)]
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headline {
    pub title: String,
    pub category: HeadlineCategory,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Latest computed sentiment for one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentRecord {
    pub country_name: CountryKey,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub summary: String,
    #[serde(default)]
    pub headlines: Vec<Headline>,
    pub last_updated: DateTime<Utc>,
}

impl SentimentRecord {
    /// Build a record, clamping the score and deriving the label from it.
    pub fn new(
        country_name: CountryKey,
        score: f64,
        summary: impl Into<String>,
        headlines: Vec<Headline>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let sentiment_score = clamp_score(score);
        Self {
            country_name,
            sentiment_score,
            sentiment_label: SentimentLabel::from_score(sentiment_score),
            summary: summary.into(),
            headlines,
            last_updated,
        }
    }
}

/// Keep scores inside [-1.0, 1.0]; NaN collapses to neutral.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(-1.0, 1.0)
    }
}

// ------------------------------------------------------------
// Model output shape
// ------------------------------------------------------------

/// One element of the array the text-generation service returns.
/// Lenient on purpose: missing fields default, and validation happens in
/// [`WireCountryRecord::into_record`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCountryRecord {
    #[serde(default)]
    pub country_name: String,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub headlines: Vec<WireHeadline>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHeadline {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl WireCountryRecord {
    /// `None` when the record has no usable country name or score.
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> Option<SentimentRecord> {
        let key = CountryKey::new(&self.country_name);
        if key.is_empty() {
            return None;
        }
        let score = self.sentiment_score?;
        let headlines = self
            .headlines
            .into_iter()
            .filter_map(WireHeadline::into_headline)
            .collect();
        Some(SentimentRecord::new(
            key,
            score,
            clean_text(&self.summary),
            headlines,
            fetched_at,
        ))
    }
}

impl WireHeadline {
    fn into_headline(self) -> Option<Headline> {
        let title = clean_text(&self.title);
        if title.is_empty() {
            return None;
        }
        let category = match self.category.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("GOOD") => HeadlineCategory::Good,
            Some("BAD") => HeadlineCategory::Bad,
            _ => HeadlineCategory::Neutral,
        };
        Some(Headline {
            title,
            category,
            snippet: clean_text(&self.snippet),
            source: self.source.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            url: self.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
        })
    }
}

/// Decode entities, strip tags, collapse whitespace, cap length.
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_thresholds_are_exclusive() {
        assert_eq!(SentimentLabel::from_score(0.05), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(0.0501), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_score(-0.05), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(-0.06), SentimentLabel::Negative);
    }

    #[test]
    fn new_clamps_and_relabels() {
        let r = SentimentRecord::new("Chile".into(), 4.2, "s", vec![], Utc::now());
        assert_eq!(r.sentiment_score, 1.0);
        assert_eq!(r.sentiment_label, SentimentLabel::Positive);
        let nan = SentimentRecord::new("Chile".into(), f64::NAN, "s", vec![], Utc::now());
        assert_eq!(nan.sentiment_score, 0.0);
    }

    #[test]
    fn wire_record_normalizes_name_and_headlines() {
        let raw = serde_json::json!({
            "countryName": "United States of America",
            "sentimentScore": -0.4,
            "sentimentLabel": "POSITIVE",
            "summary": "  Tariff&nbsp;talks <b>stall</b> ",
            "headlines": [
                {"title": "Markets dip", "category": "bad", "snippet": "x"},
                {"title": "   ", "category": "GOOD", "snippet": "dropped"},
                {"title": "Rain", "category": "WEIRD", "snippet": "", "url": " "}
            ]
        });
        let wire: WireCountryRecord = serde_json::from_value(raw).unwrap();
        let rec = wire.into_record(Utc::now()).unwrap();
        assert_eq!(rec.country_name.as_str(), "United States");
        assert_eq!(rec.sentiment_label, SentimentLabel::Negative);
        assert_eq!(rec.summary, "Tariff talks stall");
        assert_eq!(rec.headlines.len(), 2);
        assert_eq!(rec.headlines[0].category, HeadlineCategory::Bad);
        assert_eq!(rec.headlines[1].category, HeadlineCategory::Neutral);
        assert!(rec.headlines[1].url.is_none());
    }

    #[test]
    fn wire_record_without_score_is_rejected() {
        let wire: WireCountryRecord =
            serde_json::from_value(serde_json::json!({"countryName": "Peru"})).unwrap();
        assert!(wire.into_record(Utc::now()).is_none());
    }

    #[test]
    fn record_serializes_camel_case() {
        let r = SentimentRecord::new("Iceland".into(), 0.3, "calm", vec![], Utc::now());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["countryName"], "Iceland");
        assert_eq!(v["sentimentLabel"], "POSITIVE");
        assert!(v.get("lastUpdated").is_some());
    }
}
