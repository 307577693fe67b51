//! Serde types for the App Store Connect JSON:API surface.
//!
//! Only the attributes this tool reads are modeled; everything else in a
//! response is ignored. Attribute names follow the wire format (camelCase).

use serde::Deserialize;
use serde_json::Value;

/// JSON:API response envelope.
#[derive(Debug, Deserialize)]
pub struct Document<T> {
    pub data: T,
    /// Side-loaded resources requested with `include=`.
    #[serde(default)]
    pub included: Vec<RawResource>,
    #[serde(default)]
    pub links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
pub struct PageLinks {
    /// Absolute URL of the next page, when one exists.
    #[serde(default)]
    pub next: Option<String>,
}

/// An included resource kept in raw form; attribute shape varies by type.
#[derive(Debug, Deserialize)]
pub struct RawResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Value,
}

/// `{type, id}` linkage inside a relationship.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<ResourceRef>,
}

// ── apps ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct App {
    pub id: String,
    pub attributes: AppAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppAttributes {
    pub bundle_id: String,
    pub name: String,
}

// ── appStoreVersions ─────────────────────────────────────────────────

/// Version states that mean "live in the store".
pub const LIVE_STATES: &[&str] = &["READY_FOR_SALE"];

/// Version states that mean "a review is underway or pending release".
pub const REVIEW_STATES: &[&str] = &[
    "WAITING_FOR_REVIEW",
    "IN_REVIEW",
    "PENDING_DEVELOPER_RELEASE",
];

/// Version states that mean "the review ended in a rejection".
pub const REJECTED_STATES: &[&str] = &["REJECTED", "DEVELOPER_REJECTED", "METADATA_REJECTED"];

#[derive(Debug, Deserialize)]
pub struct AppStoreVersion {
    pub id: String,
    pub attributes: AppStoreVersionAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreVersionAttributes {
    pub version_string: String,
    pub app_store_state: String,
}

// ── builds ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Build {
    pub id: String,
    pub attributes: BuildAttributes,
    #[serde(default)]
    pub relationships: Option<BuildRelationships>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAttributes {
    /// The build number ("1400"), not the marketing version.
    pub version: String,
    #[serde(default)]
    pub processing_state: Option<String>,
    #[serde(default)]
    pub expired: bool,
}

impl BuildAttributes {
    /// A build is usable once processing finished cleanly and it has not
    /// expired out of TestFlight.
    pub fn is_eligible(&self) -> bool {
        self.processing_state.as_deref() == Some("VALID") && !self.expired
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRelationships {
    #[serde(default)]
    pub pre_release_version: Option<Relationship>,
    #[serde(default)]
    pub build_beta_detail: Option<Relationship>,
}

// ── ciProducts / ciWorkflows / ciBuildRuns ───────────────────────────

#[derive(Debug, Deserialize)]
pub struct CiProduct {
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Deserialize)]
pub struct CiWorkflow {
    pub id: String,
    pub attributes: CiWorkflowAttributes,
}

#[derive(Debug, Deserialize)]
pub struct CiWorkflowAttributes {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CiBuildRun {
    pub id: String,
    pub attributes: CiBuildRunAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiBuildRunAttributes {
    /// Xcode Cloud reports the run number as an integer; builds uploaded by
    /// other pipelines have been observed with string values.
    #[serde(default)]
    pub number: Option<Value>,
    #[serde(default)]
    pub source_commit: Option<SourceCommit>,
}

impl CiBuildRunAttributes {
    pub fn number_string(&self) -> Option<String> {
        match &self.number {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Key names under which different pipeline versions have exposed the
/// commit, in lookup priority order.
pub const COMMIT_KEY_CANDIDATES: &[&str] = &["commitSha", "sha", "commitHash", "hash"];

/// The recorded source commit of a CI run: either a bare string or a
/// structured object carrying the hash under one of several key names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceCommit {
    Text(String),
    Structured(serde_json::Map<String, Value>),
}

impl SourceCommit {
    /// First non-empty candidate wins; a bare string is used as-is.
    pub fn commit_ref(&self) -> Option<String> {
        match self {
            SourceCommit::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            SourceCommit::Text(_) => None,
            SourceCommit::Structured(map) => COMMIT_KEY_CANDIDATES.iter().find_map(|key| {
                map.get(*key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            }),
        }
    }
}

// ── submissions / localizations ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AppStoreVersionSubmission {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppStoreVersionLocalization {
    pub id: String,
    pub attributes: LocalizationAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizationAttributes {
    pub locale: String,
    #[serde(default)]
    pub whats_new: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_store_version_deserialize() {
        let json = r#"{
            "id": "ver-1",
            "type": "appStoreVersions",
            "attributes": {"versionString": "1.4", "appStoreState": "READY_FOR_SALE"}
        }"#;
        let version: AppStoreVersion = serde_json::from_str(json).unwrap();
        assert_eq!(version.attributes.version_string, "1.4");
        assert!(LIVE_STATES.contains(&version.attributes.app_store_state.as_str()));
    }

    #[test]
    fn test_build_eligibility() {
        let valid = BuildAttributes {
            version: "100".into(),
            processing_state: Some("VALID".into()),
            expired: false,
        };
        assert!(valid.is_eligible());

        let expired = BuildAttributes {
            expired: true,
            ..valid
        };
        assert!(!expired.is_eligible());

        let processing = BuildAttributes {
            version: "100".into(),
            processing_state: Some("PROCESSING".into()),
            expired: false,
        };
        assert!(!processing.is_eligible());

        let unknown = BuildAttributes {
            version: "100".into(),
            processing_state: None,
            expired: false,
        };
        assert!(!unknown.is_eligible());
    }

    #[test]
    fn test_source_commit_plain_string() {
        let commit: SourceCommit = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(commit.commit_ref().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_source_commit_structured_priority_order() {
        let commit: SourceCommit =
            serde_json::from_str(r#"{"hash": "low", "sha": "high"}"#).unwrap();
        // "sha" outranks "hash" in the candidate list.
        assert_eq!(commit.commit_ref().as_deref(), Some("high"));
    }

    #[test]
    fn test_source_commit_skips_empty_candidates() {
        let commit: SourceCommit =
            serde_json::from_str(r#"{"commitSha": "", "hash": "fallback"}"#).unwrap();
        assert_eq!(commit.commit_ref().as_deref(), Some("fallback"));
    }

    #[test]
    fn test_source_commit_no_candidates() {
        let commit: SourceCommit = serde_json::from_str(r#"{"branch": "main"}"#).unwrap();
        assert!(commit.commit_ref().is_none());

        let empty: SourceCommit = serde_json::from_str(r#""  ""#).unwrap();
        assert!(empty.commit_ref().is_none());
    }

    #[test]
    fn test_ci_build_run_number_forms() {
        let as_int: CiBuildRun = serde_json::from_str(
            r#"{"id": "run-1", "attributes": {"number": 1400}}"#,
        )
        .unwrap();
        assert_eq!(as_int.attributes.number_string().as_deref(), Some("1400"));

        let as_string: CiBuildRun = serde_json::from_str(
            r#"{"id": "run-2", "attributes": {"number": "1401"}}"#,
        )
        .unwrap();
        assert_eq!(as_string.attributes.number_string().as_deref(), Some("1401"));

        let absent: CiBuildRun =
            serde_json::from_str(r#"{"id": "run-3", "attributes": {}}"#).unwrap();
        assert!(absent.attributes.number_string().is_none());
    }

    #[test]
    fn test_document_with_included() {
        let json = r#"{
            "data": [],
            "included": [
                {"id": "pv-1", "type": "preReleaseVersions", "attributes": {"version": "1.5"}}
            ],
            "links": {"next": "https://api.example.com/v1/builds?cursor=abc"}
        }"#;
        let doc: Document<Vec<Build>> = serde_json::from_str(json).unwrap();
        assert_eq!(doc.included.len(), 1);
        assert_eq!(doc.included[0].kind, "preReleaseVersions");
        assert!(doc.links.unwrap().next.is_some());
    }

    #[test]
    fn test_localization_deserialize() {
        let json = r#"{
            "id": "loc-1",
            "attributes": {"locale": "en-US", "whatsNew": "Bug fixes"}
        }"#;
        let loc: AppStoreVersionLocalization = serde_json::from_str(json).unwrap();
        assert_eq!(loc.attributes.locale, "en-US");
        assert_eq!(loc.attributes.whats_new.as_deref(), Some("Bug fixes"));
    }
}
