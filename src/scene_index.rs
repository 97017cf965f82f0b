//! Existence checks for candidate scene identifiers.
use anyhow::Context;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::{Endpoints, FetchConfig};
use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::scene::SceneIdentifier;
use crate::session;

/// Answers whether the archive holds a given scene.
pub trait SceneIndex {
    async fn scene_exists(&self, scene: &SceneIdentifier) -> Result<bool, FetchError>;
}

impl<T: SceneIndex> SceneIndex for &T {
    async fn scene_exists(&self, scene: &SceneIdentifier) -> Result<bool, FetchError> {
        (**self).scene_exists(scene).await
    }
}

/// Checks existence against the archive's public FGDC metadata pages. No login needed.
pub struct MetadataIndex {
    client: Client,
    endpoints: Endpoints,
    policy: RetryPolicy,
}

impl MetadataIndex {
    pub fn new(client: Client, endpoints: Endpoints, policy: RetryPolicy) -> Self {
        Self {
            client,
            endpoints,
            policy,
        }
    }

    pub fn from_config(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = session::build_client(config, config.proxy.as_ref(), None)
            .context("Failed to create HTTP client")?;
        Ok(Self::new(
            client,
            config.endpoints.clone(),
            config.retry.clone(),
        ))
    }

    async fn query(&self, url: &str) -> Result<bool, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.policy.transport_error(url, e))?;

        match response.status() {
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| self.policy.transport_error(url, e))?;
                Ok(is_fgdc_metadata(&body))
            }
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.policy.status_error(url, status)),
        }
    }
}

impl SceneIndex for MetadataIndex {
    async fn scene_exists(&self, scene: &SceneIdentifier) -> Result<bool, FetchError> {
        let scene_id = scene.to_string();
        let url = self.endpoints.metadata_url(scene.satellite(), &scene_id);
        let exists = self
            .policy
            .run("Metadata lookup", || self.query(&url))
            .await?;
        debug!(scene = %scene_id, exists, "Checked scene");
        Ok(exists)
    }
}

/// A metadata page for a scene that exists is an XML document rooted at `<metadata>`.
/// Missing scenes come back as an HTML page or an empty body.
pub fn is_fgdc_metadata(body: &str) -> bool {
    roxmltree::Document::parse(body.trim())
        .map(|doc| doc.root_element().has_tag_name("metadata"))
        .unwrap_or(false)
}
