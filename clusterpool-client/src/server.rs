//! Server identity endpoints

use crate::JenkinsClient;
use crate::error::Result;
use clusterpool_core::dto::jenkins::WhoAmI;

/// Header carrying the server version on every API response
const VERSION_HEADER: &str = "X-Jenkins";

impl JenkinsClient {
    /// Get the user the credentials authenticate as
    pub async fn whoami(&self) -> Result<WhoAmI> {
        let url = format!("{}/me/api/json", self.base_url);
        let response = self.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the server version, if the server advertises one
    pub async fn version(&self) -> Result<Option<String>> {
        let url = format!("{}/api/json", self.base_url);
        let response = self.get(&url).send().await?;
        let response = self.check_status(response).await?;

        Ok(response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
