// src/record.rs
//! Canonical article record and subscription row types.

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

pub const TITLE_MAX_CHARS: usize = 70;
pub const DESCRIPTION_MAX_CHARS: usize = 160;

/// Classification tag attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    #[default]
    #[serde(rename = "")]
    None,
    Ad,
    Live,
    Short,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::None => "",
            Tag::Ad => "ad",
            Tag::Live => "live",
            Tag::Short => "short",
        }
    }
}

/// Normalized, validated representation of one ingested piece of content.
/// `source` is the unique URI and primary key at the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source: String,
    pub title: String,
    pub description: String,
    pub byline: String,
    /// Publication time, epoch milliseconds.
    pub published_at: i64,
    /// Deduplicated, lowercased keyword set, first-seen order preserved.
    pub keywords: Vec<String>,
    /// 0 when not applicable (non-video content).
    pub duration_ms: u64,
    pub tag: Tag,
    /// Small base64 data URI used as a blurred preview.
    pub placeholder_image: String,
    /// URL of the transcoded, stored full image.
    pub full_image_ref: String,
    /// Optional sponsor contact.
    pub email: Option<String>,
    pub active: bool,
}

impl CanonicalRecord {
    /// Validity gate: every displayed field must be present before the
    /// record may reach the persistence collaborator.
    pub fn validate(&self) -> Result<(), IngestError> {
        let mut missing = Vec::new();
        if self.placeholder_image.is_empty() {
            missing.push("placeholder_image");
        }
        if self.byline.is_empty() {
            missing.push("byline");
        }
        if self.full_image_ref.is_empty() {
            missing.push("full_image_ref");
        }
        if self.description.is_empty() {
            missing.push("description");
        }
        if self.source.is_empty() {
            missing.push("source");
        }
        if self.title.is_empty() {
            missing.push("title");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Validation {
                record_source: self.source.clone(),
                missing: missing.join(", "),
            })
        }
    }

    /// Return a new record with the enrichment patch applied. Fields absent
    /// from the patch keep their base values; patched keywords replace the
    /// page-derived set.
    pub fn merged(&self, patch: &RecordPatch) -> CanonicalRecord {
        let mut out = self.clone();
        if let Some(byline) = &patch.byline {
            out.byline = byline.clone();
        }
        if let Some(duration_ms) = patch.duration_ms {
            out.duration_ms = duration_ms;
        }
        if let Some(keywords) = &patch.keywords {
            if !keywords.is_empty() {
                out.keywords = keywords.clone();
            }
        }
        if let Some(tag) = patch.tag {
            out.tag = tag;
        }
        if let Some(email) = &patch.email {
            out.email = Some(email.clone());
        }
        out
    }
}

/// Enrichment produced by the video enricher or a caller-supplied override.
/// Applied over a base record via [`CanonicalRecord::merged`]; the base is
/// never mutated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub byline: Option<String>,
    pub duration_ms: Option<u64>,
    pub keywords: Option<Vec<String>>,
    pub tag: Option<Tag>,
    pub email: Option<String>,
}

impl RecordPatch {
    pub fn ad_override(email: Option<String>) -> Self {
        Self {
            tag: Some(Tag::Ad),
            email,
            ..Self::default()
        }
    }
}

/// One hub subscription row. A topic whose `expires_at` lies in the past is
/// logically inactive but stays stored until a sweep issues an explicit
/// unsubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Channel id or feed URL; unique.
    pub topic: String,
    pub email: Option<String>,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

impl SubscriptionRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Cap `s` at `max` characters, appending `...` when truncated.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> CanonicalRecord {
        CanonicalRecord {
            source: "https://example.com/post".into(),
            title: "A post".into(),
            description: "Something happened".into(),
            byline: "Example Blog".into(),
            published_at: 1_700_000_000_000,
            keywords: vec!["rust".into()],
            duration_ms: 0,
            tag: Tag::None,
            placeholder_image: "data:image/webp;base64,AAAA".into(),
            full_image_ref: "https://blob.example.com/post.webp".into(),
            email: None,
            active: true,
        }
    }

    #[test]
    fn complete_record_passes_gate() {
        assert!(full_record().validate().is_ok());
    }

    #[test]
    fn missing_byline_is_rejected() {
        let mut r = full_record();
        r.byline.clear();
        let err = r.validate().unwrap_err();
        assert!(err.to_string().contains("byline"));
    }

    #[test]
    fn merge_overrides_without_mutating_base() {
        let base = full_record();
        let patch = RecordPatch {
            byline: Some("Some Channel".into()),
            duration_ms: Some(42_000),
            keywords: Some(vec!["video".into()]),
            tag: Some(Tag::Short),
            email: None,
        };
        let merged = base.merged(&patch);
        assert_eq!(merged.byline, "Some Channel");
        assert_eq!(merged.duration_ms, 42_000);
        assert_eq!(merged.keywords, vec!["video".to_string()]);
        assert_eq!(merged.tag, Tag::Short);
        // base untouched
        assert_eq!(base.byline, "Example Blog");
        assert_eq!(base.tag, Tag::None);
    }

    #[test]
    fn empty_patch_keyword_list_keeps_page_keywords() {
        let base = full_record();
        let patch = RecordPatch {
            keywords: Some(vec![]),
            ..RecordPatch::default()
        };
        assert_eq!(base.merged(&patch).keywords, vec!["rust".to_string()]);
    }

    #[test]
    fn truncation_appends_ellipsis_only_when_over_cap() {
        assert_eq!(truncate_with_ellipsis("short", 70), "short");
        let long = "x".repeat(200);
        let out = truncate_with_ellipsis(&long, DESCRIPTION_MAX_CHARS);
        assert_eq!(out.chars().count(), DESCRIPTION_MAX_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn expiry_check_uses_now() {
        let sub = SubscriptionRecord {
            topic: "UCabc".into(),
            email: None,
            expires_at: 1_000,
        };
        assert!(sub.is_expired(1_000));
        assert!(sub.is_expired(2_000));
        assert!(!sub.is_expired(999));
    }
}
