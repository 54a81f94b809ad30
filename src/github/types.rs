// GitHub API response types.
// Only the fields the stats widget aggregates are deserialized.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Public profile of a GitHub user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub followers: u64,
}

/// A repository as listed under `/users/{user}/repos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    pub language: Option<String>,
    #[serde(default)]
    pub fork: bool,
}

/// Rate limit information from response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

/// Aggregated numbers shown by the stats widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubStats {
    pub public_repos: u64,
    pub total_stars: u64,
    pub total_forks: u64,
    pub top_language: String,
}

impl GitHubStats {
    /// Sum stars and forks and pick the most common language.
    ///
    /// Language ties go to the alphabetically first name; no languages at
    /// all yields `"None"`.
    pub fn aggregate(user: &User, repos: &[Repository]) -> Self {
        let mut languages: HashMap<&str, usize> = HashMap::new();
        for language in repos.iter().filter_map(|r| r.language.as_deref()) {
            *languages.entry(language).or_default() += 1;
        }

        let top_language = languages
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(language, _)| language.to_string())
            .unwrap_or_else(|| "None".to_string());

        Self {
            public_repos: user.public_repos,
            total_stars: repos.iter().map(|r| r.stargazers_count).sum(),
            total_forks: repos.iter().map(|r| r.forks_count).sum(),
            top_language,
        }
    }
}
