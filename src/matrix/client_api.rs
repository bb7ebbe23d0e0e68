use anyhow::{Result, anyhow};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

/// Thin wrapper over the client-server API for the calls `matrix-bot-sdk`
/// does not cover. Requests carry the appservice token and, when given,
/// `?user_id=` to act as a namespaced user.
#[derive(Clone)]
pub struct ClientApi {
    http: Client,
    homeserver_url: String,
    as_token: SecretString,
}

impl ClientApi {
    pub fn new(http: Client, homeserver_url: &str, as_token: SecretString) -> Self {
        Self {
            http,
            homeserver_url: homeserver_url.trim_end_matches('/').to_string(),
            as_token,
        }
    }

    pub fn homeserver_url(&self) -> &str {
        &self.homeserver_url
    }

    pub fn access_token(&self) -> &str {
        self.as_token.expose_secret()
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn call(
        &self,
        method: Method,
        path: &str,
        as_user: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut url = format!("{}{}", self.homeserver_url, path);
        if let Some(user_id) = as_user {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str("user_id=");
            url.push_str(&urlencoding::encode(user_id));
        }

        debug!("matrix api {} {}", method, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(self.as_token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("matrix request {} {} failed: {}", method, path, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "matrix request {} {} failed: HTTP {} {}",
                method,
                path,
                status,
                body.chars().take(300).collect::<String>()
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| anyhow!("failed to parse response: {}", e))
    }
}

pub mod urlencoding {
    pub fn encode(s: &str) -> String {
        url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
    }
}
