// GitHub API endpoint functions.
// Typed fetches for the user profile and repository list behind the stats widget.

use crate::error::Result;

use super::client::GitHubClient;
use super::types::{GitHubStats, Repository, User};

/// Repositories fetched per stats refresh.
pub const REPOS_PER_PAGE: u32 = 100;

impl GitHubClient {
    /// Get a user's public profile.
    pub async fn get_user(&self, username: &str) -> Result<User> {
        let response = self.get(&format!("/users/{}", username)).await?;
        Ok(response.json().await?)
    }

    /// Get the first page of a user's public repositories.
    pub async fn get_user_repos(&self, username: &str) -> Result<Vec<Repository>> {
        let per_page = REPOS_PER_PAGE.to_string();
        let response = self
            .get_with_params(
                &format!("/users/{}/repos", username),
                &[("per_page", per_page.as_str())],
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Fetch profile and repositories concurrently and aggregate them.
    pub async fn get_stats(&self, username: &str) -> Result<GitHubStats> {
        let (user, repos) = tokio::try_join!(self.get_user(username), self.get_user_repos(username))?;
        Ok(GitHubStats::aggregate(&user, &repos))
    }
}
