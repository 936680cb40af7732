//! Clusterpool Job Client
//!
//! A thin, type-safe HTTP client for the Jenkins-compatible job server that
//! hosts the pool-management jobs.
//!
//! The [`JobClient`] trait is the capability the rest of the system depends on;
//! [`JenkinsClient`] is its HTTP implementation.
//!
//! # Example
//!
//! ```no_run
//! use clusterpool_client::{Credentials, JenkinsClient, JobClient};
//! use clusterpool_core::domain::job::{JobName, JobParameters};
//!
//! #[tokio::main]
//! async fn main() -> clusterpool_client::Result<()> {
//!     let client = JenkinsClient::new(
//!         "https://jenkins.example.com",
//!         Credentials::new("user", "api-token"),
//!     );
//!
//!     let handle = client
//!         .trigger(&JobName::new("pool/destroy-cluster"), &JobParameters::new())
//!         .await?;
//!     println!("Triggered {}", handle);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod server;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use jobs::JobClient;

use clusterpool_core::domain::job::JobName;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

/// Username and API token sent with every request
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// HTTP client for a Jenkins job server
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    /// Base URL of the server (e.g., "https://jenkins.example.com")
    base_url: String,
    credentials: Credentials,
    /// HTTP client instance
    client: Client,
}

impl JenkinsClient {
    /// Create a new client with a default HTTP client
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self::with_client(base_url, credentials, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        credentials: Credentials,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// URL of a job, expanding folder segments (`a/b` -> `/job/a/job/b`)
    pub fn job_url(&self, job: &JobName) -> String {
        let mut url = self.base_url.clone();
        for segment in job.segments() {
            url.push_str("/job/");
            url.push_str(segment);
        }
        url
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.client
            .post(url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Turn a non-success status into an API error
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is plain text
    async fn handle_text_response(&self, response: reqwest::Response) -> Result<String> {
        Ok(self.check_status(response).await?.text().await?)
    }

    /// Like `handle_response`, but maps 404 to `None`
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }
}
