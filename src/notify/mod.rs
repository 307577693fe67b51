//! Change-request notification: find the request behind a commit and post
//! one-time comments to it.

pub mod github;

use async_trait::async_trait;
use regex::Regex;

/// Fallback "what's new" text when a change request offers nothing usable.
pub const DEFAULT_RELEASE_NOTES: &str = "Bug fixes and performance improvements.";

/// A merged change request, as much of it as the reconcilers need.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// The change request merged at `sha`, when one can be found.
    async fn request_for_commit(&self, sha: &str) -> anyhow::Result<Option<ChangeRequest>>;

    async fn post_comment(&self, number: u64, body: &str) -> anyhow::Result<()>;
}

/// Release notes for a submission, in falling priority: the request's
/// `## Release Notes` section, its title, a generic default.
pub fn extract_release_notes(request: Option<&ChangeRequest>) -> String {
    let Some(request) = request else {
        return DEFAULT_RELEASE_NOTES.to_string();
    };

    if let Some(body) = &request.body {
        let section = Regex::new(r"(?ms)^#{2,3}\s*Release Notes\s*$(.*?)(?:^#{1,3}\s|\z)")
            .expect("static regex compiles");
        if let Some(captures) = section.captures(body) {
            let notes = captures[1].trim();
            if !notes.is_empty() {
                return notes.to_string();
            }
        }
    }

    let title = request.title.trim();
    if !title.is_empty() {
        return title.to_string();
    }
    DEFAULT_RELEASE_NOTES.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, body: Option<&str>) -> ChangeRequest {
        ChangeRequest {
            number: 42,
            title: title.to_string(),
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn test_extract_release_notes_section() {
        let body = "Fixes the login flow.\n\n## Release Notes\nFaster login and fewer crashes.\n\n## Testing\nManual.";
        let notes = extract_release_notes(Some(&request("Fix login", Some(body))));
        assert_eq!(notes, "Faster login and fewer crashes.");
    }

    #[test]
    fn test_extract_release_notes_section_at_end_of_body() {
        let body = "Intro\n\n### Release Notes\nLine one.\nLine two.";
        let notes = extract_release_notes(Some(&request("t", Some(body))));
        assert_eq!(notes, "Line one.\nLine two.");
    }

    #[test]
    fn test_extract_release_notes_empty_section_falls_back_to_title() {
        let body = "## Release Notes\n\n## Testing\nManual.";
        let notes = extract_release_notes(Some(&request("Fix login", Some(body))));
        assert_eq!(notes, "Fix login");
    }

    #[test]
    fn test_extract_release_notes_no_section_uses_title() {
        let notes = extract_release_notes(Some(&request("Fix login", Some("Just a body."))));
        assert_eq!(notes, "Fix login");
    }

    #[test]
    fn test_extract_release_notes_no_body_no_title() {
        let notes = extract_release_notes(Some(&request("   ", None)));
        assert_eq!(notes, DEFAULT_RELEASE_NOTES);
    }

    #[test]
    fn test_extract_release_notes_no_request() {
        assert_eq!(extract_release_notes(None), DEFAULT_RELEASE_NOTES);
    }
}
