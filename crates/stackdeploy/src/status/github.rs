//! GitHub commit status API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::CommitStatusConfig;
use crate::error::{DeployError, DeployResult};
use crate::types::CommitInfo;

use super::{CommitState, CommitStatus, CommitStatusClient};

const USER_AGENT: &str = concat!("stackdeploy/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct StatusBody<'a> {
    state: CommitState,
    target_url: &'a str,
    description: &'a str,
    context: &'a str,
}

/// Posts statuses to `POST /repos/{owner}/{repo}/statuses/{ref}`.
#[derive(Debug, Clone)]
pub struct GithubStatusClient {
    client: Client,
    api_url: String,
    token: Option<SecretString>,
}

impl GithubStatusClient {
    /// Create a client from configuration.
    pub fn new(config: &CommitStatusConfig) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
        })
    }

    fn statuses_url(&self, commit: &CommitInfo) -> String {
        format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, commit.owner, commit.repository, commit.git_ref
        )
    }
}

#[async_trait]
impl CommitStatusClient for GithubStatusClient {
    async fn report(&self, commit: &CommitInfo, status: &CommitStatus) -> DeployResult<()> {
        let body = StatusBody {
            state: status.state,
            target_url: &status.target_url,
            description: &status.description,
            context: &status.context,
        };

        let mut request = self
            .client
            .post(self.statuses_url(commit))
            .header("accept", "application/vnd.github+json")
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(DeployError::CommitStatus(format!("{status}: {text}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_url_for_commit() {
        let client = GithubStatusClient::new(&CommitStatusConfig {
            api_url: "https://github.example.com/api/v3/".to_owned(),
            ..CommitStatusConfig::default()
        })
        .unwrap();

        let commit = CommitInfo {
            owner: "acme".to_owned(),
            repository: "orders".to_owned(),
            git_ref: "abc123".to_owned(),
        };
        assert_eq!(
            client.statuses_url(&commit),
            "https://github.example.com/api/v3/repos/acme/orders/statuses/abc123"
        );
    }

    #[test]
    fn status_body_wire_format() {
        let json = serde_json::to_value(StatusBody {
            state: CommitState::Failure,
            target_url: "https://console",
            description: "failed",
            context: "AWS CloudFormation (prod)",
        })
        .unwrap();
        assert_eq!(json["state"], "failure");
        assert_eq!(json["context"], "AWS CloudFormation (prod)");
    }
}
