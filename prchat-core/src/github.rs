use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::model::{IssueComment, PullRequest, PullRequestState, Repository, ReviewComment};
use crate::platform::CodeHost;
use crate::recording::{RecordingLogger, RecordingMiddleware, ServiceType, CORRELATION_ID_HEADER};
use crate::relay::is_link_comment;

pub const GITHUB_API_BASE: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_base: String,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentResponse {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<UserResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewCommentResponse {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub user: Option<UserResponse>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub user: Option<UserResponse>,
    #[serde(default)]
    pub requested_reviewers: Vec<UserResponse>,
    pub html_url: String,
}

/// Deleted accounts come back without a user.
const GHOST_LOGIN: &str = "ghost";

fn login_of(user: Option<UserResponse>) -> String {
    user.map(|u| u.login)
        .unwrap_or_else(|| GHOST_LOGIN.to_string())
}

impl From<PullRequestResponse> for PullRequest {
    fn from(pr: PullRequestResponse) -> Self {
        let mut requested_reviewers: Vec<String> = Vec::new();
        for reviewer in pr.requested_reviewers {
            if !requested_reviewers.contains(&reviewer.login) {
                requested_reviewers.push(reviewer.login);
            }
        }
        PullRequest {
            number: pr.number,
            title: pr.title,
            body: pr.body,
            state: PullRequestState::from_github(&pr.state),
            author: login_of(pr.user),
            requested_reviewers,
            html_url: pr.html_url,
        }
    }
}

impl From<ReviewCommentResponse> for ReviewComment {
    fn from(comment: ReviewCommentResponse) -> Self {
        ReviewComment {
            id: comment.id,
            author: login_of(comment.user),
            body: comment.body,
            created_at: comment.created_at,
            in_reply_to_id: comment.in_reply_to_id,
            html_url: comment.html_url,
        }
    }
}

impl From<CommentResponse> for IssueComment {
    fn from(comment: CommentResponse) -> Self {
        IssueComment {
            id: comment.id,
            author: login_of(comment.user),
            body: comment.body.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Result<Self> {
        Self::new_with_recording(GITHUB_API_BASE.to_string(), app_id, private_key, None)
    }

    pub fn new_with_recording(
        api_base: String,
        app_id: u64,
        private_key: String,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        let client = create_github_client(recording_logger)?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Reuse the cached token unless it expires within 5 minutes
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub App token request failed: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub App token request failed: {} - {}",
                status,
                error_text
            ));
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);

        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    async fn authorized(
        &self,
        request: RequestBuilder,
        correlation_id: Option<&str>,
        installation_id: u64,
    ) -> Result<RequestBuilder> {
        let token = self.get_installation_token(installation_id).await?;
        let mut request = request
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(cid) = correlation_id {
            request = request.header(CORRELATION_ID_HEADER, cid);
        }
        Ok(request)
    }

    /// Send and decode; `Ok(None)` on 404.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error {}: {} - {}", what, status, error_text);
            return Err(anyhow!(
                "GitHub API error {}: {} - {}",
                what,
                status,
                error_text
            ));
        }

        let parsed = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))?;
        Ok(Some(parsed))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.send_optional(request, what)
            .await?
            .ok_or_else(|| anyhow!("GitHub API error {}: 404 Not Found", what))
    }

    /// Follow `page`/`per_page` until a short page comes back.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        path_and_query: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let separator = if path_and_query.contains('?') { '&' } else { '?' };
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}{}{}page={}&per_page={}",
                self.api_base, path_and_query, separator, page, PER_PAGE
            );
            let request = self
                .authorized(self.client.get(&url), correlation_id, installation_id)
                .await?;
            let items: Vec<T> = self.send(request, what).await?;
            let count = items.len();
            all.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    pub async fn list_open_pull_requests(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
    ) -> Result<Vec<PullRequestResponse>> {
        let prs: Vec<PullRequestResponse> = self
            .get_all_pages(
                correlation_id,
                installation_id,
                &format!("/repos/{}/pulls?state=open", repo.full_name()),
                "listing open pull requests",
            )
            .await?;
        info!("Found {} open PRs in {}", prs.len(), repo.full_name());
        Ok(prs)
    }

    pub async fn get_pull_request(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
        pr_number: u64,
    ) -> Result<Option<PullRequestResponse>> {
        let url = format!(
            "{}/repos/{}/pulls/{}",
            self.api_base,
            repo.full_name(),
            pr_number
        );
        info!("Fetching PR #{} from {}", pr_number, repo.full_name());
        let request = self
            .authorized(self.client.get(&url), correlation_id, installation_id)
            .await?;
        self.send_optional(request, "fetching PR").await
    }

    pub async fn get_review_comments(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
        pr_number: u64,
    ) -> Result<Vec<ReviewCommentResponse>> {
        self.get_all_pages(
            correlation_id,
            installation_id,
            &format!("/repos/{}/pulls/{}/comments", repo.full_name(), pr_number),
            "fetching review comments",
        )
        .await
    }

    pub async fn get_pr_comments(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
        pr_number: u64,
    ) -> Result<Vec<CommentResponse>> {
        let comments: Vec<CommentResponse> = self
            .get_all_pages(
                correlation_id,
                installation_id,
                &format!("/repos/{}/issues/{}/comments", repo.full_name(), pr_number),
                "fetching comments",
            )
            .await?;
        info!(
            "Found {} total comments on PR #{}",
            comments.len(),
            pr_number
        );
        Ok(comments)
    }

    pub async fn post_pr_comment(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
        pr_number: u64,
        comment_body: &str,
    ) -> Result<CommentResponse> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_base,
            repo.full_name(),
            pr_number
        );

        info!("Posting comment to PR #{} in {}", pr_number, repo.full_name());

        let request = self
            .client
            .post(&url)
            .body(serde_json::to_string(&CommentRequest { body: comment_body })?)
            .header("Content-Type", "application/json");
        let request = self
            .authorized(request, correlation_id, installation_id)
            .await?;
        let comment: CommentResponse = self.send(request, "posting comment").await?;
        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(comment)
    }

    pub async fn update_comment(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
        comment_id: u64,
        comment_body: &str,
    ) -> Result<CommentResponse> {
        let url = format!(
            "{}/repos/{}/issues/comments/{}",
            self.api_base,
            repo.full_name(),
            comment_id
        );

        info!("Updating comment {} in {}", comment_id, repo.full_name());

        let request = self
            .client
            .patch(&url)
            .body(serde_json::to_string(&CommentRequest { body: comment_body })?)
            .header("Content-Type", "application/json");
        let request = self
            .authorized(request, correlation_id, installation_id)
            .await?;
        let comment: CommentResponse = self.send(request, "updating comment").await?;
        info!("Successfully updated comment with ID: {}", comment.id);
        Ok(comment)
    }

    pub async fn reply_to_review_comment(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &Repository,
        pr_number: u64,
        comment_id: u64,
        reply_body: &str,
    ) -> Result<ReviewCommentResponse> {
        let url = format!(
            "{}/repos/{}/pulls/{}/comments/{}/replies",
            self.api_base,
            repo.full_name(),
            pr_number,
            comment_id
        );

        info!("Replying to review comment {} on PR #{}", comment_id, pr_number);

        let request = self
            .client
            .post(&url)
            .body(serde_json::to_string(&CommentRequest { body: reply_body })?)
            .header("Content-Type", "application/json");
        let request = self
            .authorized(request, correlation_id, installation_id)
            .await?;
        self.send(request, "replying to review comment").await
    }

    /// Login the app comments as, e.g. `prchat[bot]`.
    pub async fn get_bot_login(&self) -> Result<String> {
        let url = format!("{}/app", self.api_base);

        let jwt = self.generate_jwt()?;
        let request = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json");
        let app_info: AppInfoResponse = self.send(request, "fetching app info").await?;
        Ok(format!("{}[bot]", app_info.slug))
    }

    #[cfg(test)]
    pub(crate) async fn seed_token(&self, installation_id: u64, token: &str) {
        let expires = SystemTime::now() + std::time::Duration::from_secs(3600);
        self.token_cache
            .write()
            .await
            .insert(installation_id, (token.to_string(), expires));
    }
}

/// A [`GitHubClient`] bound to the one installation and repository this
/// deployment serves.
#[derive(Clone)]
pub struct RepositoryHandle {
    client: GitHubClient,
    installation_id: u64,
    repo: Repository,
    bot_login: String,
    correlation_id: Option<String>,
}

impl RepositoryHandle {
    pub fn new(
        client: GitHubClient,
        installation_id: u64,
        repo: Repository,
        bot_login: String,
    ) -> Self {
        Self {
            client,
            installation_id,
            repo,
            bot_login,
            correlation_id: None,
        }
    }

    /// Tag every request made through this handle.
    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..self.clone()
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    fn cid(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

#[async_trait]
impl CodeHost for RepositoryHandle {
    async fn open_pull_requests(&self) -> Result<Vec<PullRequest>> {
        let prs = self
            .client
            .list_open_pull_requests(self.cid(), self.installation_id, &self.repo)
            .await?;
        Ok(prs.into_iter().map(PullRequest::from).collect())
    }

    async fn pull_request(&self, number: u64) -> Result<Option<PullRequest>> {
        let pr = self
            .client
            .get_pull_request(self.cid(), self.installation_id, &self.repo, number)
            .await?;
        Ok(pr.map(PullRequest::from))
    }

    async fn review_comments(&self, number: u64) -> Result<Vec<ReviewComment>> {
        let comments = self
            .client
            .get_review_comments(self.cid(), self.installation_id, &self.repo, number)
            .await?;
        Ok(comments.into_iter().map(ReviewComment::from).collect())
    }

    async fn find_link_comment(&self, number: u64) -> Result<Option<IssueComment>> {
        let comments = self
            .client
            .get_pr_comments(self.cid(), self.installation_id, &self.repo, number)
            .await?;
        Ok(comments
            .into_iter()
            .map(IssueComment::from)
            .find(|c| c.author == self.bot_login && is_link_comment(&c.body)))
    }

    async fn create_issue_comment(&self, number: u64, body: &str) -> Result<u64> {
        let comment = self
            .client
            .post_pr_comment(self.cid(), self.installation_id, &self.repo, number, body)
            .await?;
        Ok(comment.id)
    }

    async fn update_issue_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        self.client
            .update_comment(self.cid(), self.installation_id, &self.repo, comment_id, body)
            .await?;
        Ok(())
    }

    async fn reply_to_review_comment(
        &self,
        number: u64,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        self.client
            .reply_to_review_comment(
                self.cid(),
                self.installation_id,
                &self.repo,
                number,
                comment_id,
                body,
            )
            .await?;
        Ok(())
    }
}

pub fn create_github_client(
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware> {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(concat!("prchat/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create GitHub HTTP client")?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        let recording_middleware = RecordingMiddleware::new(logger, ServiceType::GitHub);
        builder = builder.with(recording_middleware);
    }

    Ok(builder.build())
}
