// GitHub API module.
// Client and types for the public user and repository endpoints.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::GitHubClient;
pub use types::{GitHubStats, RateLimit, Repository, User};
