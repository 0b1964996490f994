//! Repository file contents.

use crate::client::{ApiClient, ApiResponse};
use crate::errors::{ErrorKind, RuntimeError, RuntimeResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a file lives: an optional repository, a path, and an optional branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    /// `owner/repo`; the caller's default repository is used when absent.
    pub repo_slug: Option<String>,
    /// Path of the file inside the repository.
    pub path: String,
    /// Branch or other ref; the repository default branch when absent.
    pub branch: Option<String>,
}

impl FileLocation {
    /// Creates a location in the caller's default repository.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            repo_slug: None,
            path: path.into(),
            branch: None,
        }
    }

    /// Sets the repository.
    pub fn in_repo(mut self, repo_slug: impl Into<String>) -> Self {
        self.repo_slug = Some(repo_slug.into());
        self
    }

    /// Sets the branch.
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Parses `owner/repo@path/to/file#branch`; the repo and branch parts are optional.
impl FromStr for FileLocation {
    type Err = RuntimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (rest, branch) = match value.split_once('#') {
            Some((rest, branch)) => (rest, Some(branch)),
            None => (value, None),
        };
        let (repo_slug, path) = match rest.split_once('@') {
            Some((repo, path)) => (Some(repo), path),
            None => (None, rest),
        };

        if path.is_empty() {
            return Err(RuntimeError::new(
                ErrorKind::InvalidParameter,
                format!("File reference {:?} does not name a path", value),
            ));
        }

        let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
        Ok(Self {
            repo_slug: repo_slug.and_then(non_empty),
            path: path.to_string(),
            branch: branch.and_then(non_empty),
        })
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref repo) = self.repo_slug {
            write!(f, "{}@", repo)?;
        }
        f.write_str(&self.path)?;
        if let Some(ref branch) = self.branch {
            write!(f, "#{}", branch)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ContentPayload {
    content: Option<String>,
}

/// Service for reading files out of repositories.
///
/// Every read is a soft miss: a file that cannot be fetched yields an empty
/// string. Only configuration problems and exhausted retries are errors.
pub struct ContentsService<'a> {
    client: &'a ApiClient,
}

impl<'a> ContentsService<'a> {
    /// Creates a new contents service.
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Gets the decoded contents of a file, or `""` if the API refused.
    ///
    /// With `report_errors` set, refusals are logged with the response URL and body.
    pub async fn get_file_contents(
        &self,
        token: Option<&SecretString>,
        repo_slug: &str,
        path: &str,
        git_ref: Option<&str>,
        report_errors: bool,
    ) -> RuntimeResult<String> {
        let mut url = format!("repos/{}/contents/{}", repo_slug, path.trim_start_matches('/'));
        if let Some(r) = git_ref.filter(|r| !r.is_empty()) {
            let query = serde_urlencoded::to_string(&[("ref", r)]).map_err(|e| {
                RuntimeError::new(ErrorKind::InvalidParameter, format!("Invalid ref {:?}: {}", r, e))
            })?;
            url = format!("{}?{}", url, query);
        }

        let response = self.client.get(token, &url).await?;
        if !response.is_success() {
            if report_errors {
                tracing::error!(
                    url = response.url(),
                    status = response.status().as_u16(),
                    body = %response.text(),
                    "Getting GitHub file failed"
                );
            }
            return Ok(String::new());
        }

        decode_content(&response)
    }

    /// Gets a file described by a [`FileLocation`], defaulting the repository.
    pub async fn get_file_contents_from_location(
        &self,
        token: Option<&SecretString>,
        location: &FileLocation,
        default_repo: &str,
    ) -> RuntimeResult<String> {
        let repo = location.repo_slug.as_deref().unwrap_or(default_repo);
        self.get_file_contents(token, repo, &location.path, location.branch.as_deref(), true)
            .await
    }

    /// Gets a file when the caller holds no token.
    ///
    /// Public repositories are tried anonymously first. Otherwise the
    /// organisation installation id is exchanged for a token; a missing id is
    /// a configuration error raised before any further network traffic.
    pub async fn get_file_contents_without_token(&self, repo: &str, path: &str) -> RuntimeResult<String> {
        let file = self.get_file_contents(None, repo, path, None, false).await?;
        if !file.is_empty() {
            return Ok(file);
        }

        let credentials = self.client.credentials();
        credentials.require_installation_id()?;
        tracing::debug!(repo, path, "Anonymous read came back empty, using installation token");

        let token = credentials.fallback_token().await?;
        self.get_file_contents(Some(&token), repo, path, None, true).await
    }
}

fn decode_content(response: &ApiResponse) -> RuntimeResult<String> {
    let payload: ContentPayload = response.json()?;
    let encoded = payload.content.ok_or_else(|| {
        RuntimeError::new(
            ErrorKind::UnexpectedFormat,
            "Response has no file content; the path may be a directory",
        )
        .with_url(response.url())
    })?;

    // GitHub wraps base64 content at 60 columns.
    let compact: String = encoded.split_ascii_whitespace().collect();
    let bytes = STANDARD.decode(compact).map_err(|e| {
        RuntimeError::deserialization(format!("File content is not valid base64: {}", e))
            .with_url(response.url())
    })?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_reference() {
        let location: FileLocation = "org/settings@config/rules.json#main".parse().unwrap();

        assert_eq!(
            location,
            FileLocation::new("config/rules.json").in_repo("org/settings").on_branch("main")
        );
    }

    #[test]
    fn test_parse_path_only() {
        let location: FileLocation = "checks.ts".parse().unwrap();

        assert_eq!(location.repo_slug, None);
        assert_eq!(location.path, "checks.ts");
        assert_eq!(location.branch, None);
    }

    #[test]
    fn test_parse_empty_parts() {
        let location: FileLocation = "@rules.json#".parse().unwrap();
        assert_eq!(location, FileLocation::new("rules.json"));

        assert!("org/repo@".parse::<FileLocation>().is_err());
        assert!("".parse::<FileLocation>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        let text = "org/repo@a/b.ts#dev";
        let location: FileLocation = text.parse().unwrap();
        assert_eq!(location.to_string(), text);
        assert_eq!(FileLocation::new("x.json").to_string(), "x.json");
    }
}
