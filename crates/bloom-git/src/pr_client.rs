//! Hosted-platform PR client (A4): GitHub via `octocrab`, Forgejo via a
//! plain `reqwest` REST call (octocrab does not speak Forgejo's API).
//!
//! Grounded on `at-integrations/github/{client,pull_requests}.rs`'s
//! `GitHubClient` + `create_pull_request` pattern, extended with a second,
//! hand-rolled REST implementation for Forgejo and a host-detection
//! dispatcher per §6.4/§4.11.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PrClientError;

/// A small set of hosts known to run Forgejo without the literal substring
/// `forgejo` in their remote URL. Extend as new self-hosted instances show
/// up; `forgejo` itself is always checked first regardless of this list.
const KNOWN_FORGEJO_HOSTS: &[&str] = &["codeberg.org"];

#[derive(Debug, Clone)]
pub struct CreatePrRequest {
    pub title: String,
    pub body: String,
    pub base_branch: String,
    pub head_branch: String,
}

#[derive(Debug, Clone)]
pub struct CreatePrResponse {
    pub success: bool,
    pub url: Option<String>,
    pub already_existed: bool,
}

#[async_trait]
pub trait PrClient: Send + Sync {
    async fn create_pull_request(
        &self,
        req: &CreatePrRequest,
    ) -> Result<CreatePrResponse, PrClientError>;
}

/// Which hosted platform a repo's `origin` remote points at, decided by a
/// substring match on the remote URL (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostedPlatform {
    GitHub,
    Forgejo,
}

pub fn detect_host(remote_url: &str) -> HostedPlatform {
    let lower = remote_url.to_lowercase();
    if lower.contains("forgejo") || KNOWN_FORGEJO_HOSTS.iter().any(|h| lower.contains(h)) {
        HostedPlatform::Forgejo
    } else {
        HostedPlatform::GitHub
    }
}

/// Parse `owner/repo` out of a `git@host:owner/repo.git` or
/// `https://host/owner/repo.git` remote URL.
pub fn parse_owner_repo(remote_url: &str) -> Result<(String, String), PrClientError> {
    let trimmed = remote_url.trim_end_matches(".git");
    let path = trimmed
        .rsplit_once(':')
        .map(|(_, rest)| rest)
        .or_else(|| trimmed.rsplit_once("://").and_then(|(_, rest)| rest.split_once('/').map(|(_, r)| r)))
        .ok_or_else(|| PrClientError::UnparsableRemote(remote_url.to_string()))?;

    let mut parts = path.rsplitn(2, '/');
    let repo = parts.next();
    let owner = parts.next();
    match (owner, repo) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(PrClientError::UnparsableRemote(remote_url.to_string())),
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

pub struct GitHubPrClient {
    octocrab: octocrab::Octocrab,
    owner: String,
    repo: String,
}

impl GitHubPrClient {
    pub fn new(owner: String, repo: String) -> Result<Self, PrClientError> {
        let token =
            std::env::var("GITHUB_TOKEN").map_err(|_| PrClientError::MissingGitHubToken)?;
        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token)
            .build()?;
        Ok(Self { octocrab, owner, repo })
    }
}

#[async_trait]
impl PrClient for GitHubPrClient {
    async fn create_pull_request(
        &self,
        req: &CreatePrRequest,
    ) -> Result<CreatePrResponse, PrClientError> {
        let result = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .create(&req.title, &req.head_branch, &req.base_branch)
            .body(&req.body)
            .send()
            .await;

        match result {
            Ok(pr) => Ok(CreatePrResponse {
                success: true,
                url: pr.html_url.map(|u| u.to_string()),
                already_existed: false,
            }),
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                Ok(CreatePrResponse { success: true, url: None, already_existed: true })
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Forgejo
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ForgejoCreatePrBody<'a> {
    title: &'a str,
    body: &'a str,
    base: &'a str,
    head: &'a str,
}

pub struct ForgejoPrClient {
    client: reqwest::Client,
    base_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl ForgejoPrClient {
    pub fn new(base_url: String, owner: String, repo: String) -> Result<Self, PrClientError> {
        let token = std::env::var("FORGEJO_TOKEN")
            .or_else(|_| std::env::var("GITHUB_TOKEN"))
            .unwrap_or_default();
        Ok(Self { client: reqwest::Client::new(), base_url, owner, repo, token })
    }
}

#[async_trait]
impl PrClient for ForgejoPrClient {
    async fn create_pull_request(
        &self,
        req: &CreatePrRequest,
    ) -> Result<CreatePrResponse, PrClientError> {
        let url = format!(
            "{}/api/v1/repos/{}/{}/pulls",
            self.base_url.trim_end_matches('/'),
            self.owner,
            self.repo
        );
        let body = ForgejoCreatePrBody {
            title: &req.title,
            body: &req.body,
            base: &req.base_branch,
            head: &req.head_branch,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            let json: serde_json::Value = response.json().await?;
            let pr_url = json.get("html_url").and_then(|v| v.as_str()).map(str::to_string);
            return Ok(CreatePrResponse { success: true, url: pr_url, already_existed: false });
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if text.to_lowercase().contains("already exists") {
            return Ok(CreatePrResponse { success: true, url: None, already_existed: true });
        }

        Err(PrClientError::ForgejoApi { status: status.as_u16(), body: text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_forgejo_by_literal_substring() {
        assert_eq!(
            detect_host("https://forgejo.example.com/org/repo.git"),
            HostedPlatform::Forgejo
        );
    }

    #[test]
    fn detects_forgejo_by_known_host() {
        assert_eq!(detect_host("git@codeberg.org:org/repo.git"), HostedPlatform::Forgejo);
    }

    #[test]
    fn defaults_to_github() {
        assert_eq!(detect_host("git@github.com:org/repo.git"), HostedPlatform::GitHub);
        assert_eq!(detect_host("https://gitlab.com/org/repo.git"), HostedPlatform::GitHub);
    }

    #[test]
    fn parses_ssh_remote() {
        let (owner, repo) = parse_owner_repo("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn parses_https_remote() {
        let (owner, repo) = parse_owner_repo("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }
}
