use anyhow::{Result, anyhow};
use tracing::debug;

use crate::matrix::client_api::{ClientApi, urlencoding};

const MAX_MATRIX_FILE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
    pub size: usize,
}

/// Copies remote media into the homeserver's content repository.
#[derive(Clone)]
pub struct MediaHandler {
    api: ClientApi,
}

impl MediaHandler {
    pub fn new(api: ClientApi) -> Self {
        Self { api }
    }

    pub async fn download_from_url(&self, url: &str) -> Result<MediaInfo> {
        debug!("downloading media from {}", url);

        let response = self
            .api
            .http()
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("failed to download from {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to download from {}: status {}",
                url,
                response.status()
            ));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?
            .to_vec();

        let size = data.len();
        let filename = filename_from_url(url);

        debug!("downloaded {} bytes from {}", size, url);

        Ok(MediaInfo {
            data,
            content_type,
            filename,
            size,
        })
    }

    /// Uploads as `as_user`, returning the `mxc://` content URI.
    pub async fn upload_to_matrix(&self, media: &MediaInfo, as_user: &str) -> Result<String> {
        if media.size > MAX_MATRIX_FILE_SIZE {
            return Err(anyhow!(
                "file too large for Matrix: {} bytes (max {})",
                media.size,
                MAX_MATRIX_FILE_SIZE
            ));
        }

        let upload_url = format!(
            "{}/_matrix/media/v3/upload?filename={}&user_id={}",
            self.api.homeserver_url(),
            urlencoding::encode(&media.filename),
            urlencoding::encode(as_user)
        );

        debug!("uploading {} to Matrix as {}", media.filename, as_user);

        let response = self
            .api
            .http()
            .post(&upload_url)
            .bearer_auth(self.api.access_token())
            .header("Content-Type", &media.content_type)
            .body(media.data.clone())
            .send()
            .await
            .map_err(|e| anyhow!("failed to upload to Matrix: {}", e))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to upload to Matrix: {} - {}", status, body));
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?;
        let json: serde_json::Value = serde_json::from_slice(&body_bytes)
            .map_err(|e| anyhow!("failed to parse upload response: {}", e))?;

        let content_uri = json
            .get("content_uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("no content_uri in upload response"))?
            .to_string();

        debug!("uploaded to Matrix: {}", content_uri);
        Ok(content_uri)
    }

    pub async fn copy_to_matrix(&self, url: &str, as_user: &str) -> Result<String> {
        let media = self.download_from_url(url).await?;
        self.upload_to_matrix(&media, as_user).await
    }
}

/// Last path segment without the CDN query string.
fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("attachment")
        .to_string()
}
