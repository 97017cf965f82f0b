//! Best-effort download of a list of scenes.
//!
//! Only a failure to authenticate stops a batch. Every other problem with a scene is
//! recorded against that scene and the batch moves on.
use anyhow::Result;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::config::FetchConfig;
use crate::credentials::Credentials;
use crate::download_plan::{DownloadPlan, ScenePlan};
use crate::downloader::{ChunkedDownloader, ProgressCallback};
use crate::error::FetchError;
use crate::extract::ArchiveBundle;
use crate::session::{self, DownloadSession};

const DOWNLOAD_NOT_FOUND_MARKER: &str = "Download Not Found";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SceneFailure {
    pub scene_id: String,
    pub reason: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    /// Already unpacked before the batch started.
    pub skipped: Vec<String>,
    pub failed: Vec<SceneFailure>,
}

impl BatchResult {
    pub fn record_failure(&mut self, scene_id: &str, reason: impl ToString) {
        self.failed.push(SceneFailure {
            scene_id: scene_id.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn merge(&mut self, other: BatchResult) {
        self.succeeded.extend(other.succeeded);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

enum SceneOutcome {
    Succeeded,
    Skipped,
    Failed(String),
}

pub struct BatchOrchestrator {
    config: FetchConfig,
    progress: Option<ProgressCallback>,
}

impl BatchOrchestrator {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Download and unpack every scene into `output_dir`.
    ///
    /// Returns an error only when a session cannot be established; in that case no
    /// result is reported for the scenes.
    pub async fn run<S: AsRef<str>>(
        &self,
        scene_ids: &[S],
        output_dir: &Path,
        credentials: &Credentials,
    ) -> Result<BatchResult, FetchError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let (plan, rejected) = DownloadPlan::build(scene_ids, output_dir, &self.config.endpoints);
        if let Err(e) = plan.write(output_dir.join("download_plan.json")) {
            warn!(error = %e, "Unable to write download plan");
        }

        let mut result = BatchResult::default();
        for (scene_id, e) in rejected {
            warn!(scene = %scene_id, error = %e, "Not a scene identifier");
            result.record_failure(&scene_id, e);
        }
        result.merge(self.execute(&plan, credentials).await?);

        info!(
            succeeded = result.succeeded.len(),
            skipped = result.skipped.len(),
            failed = result.failed.len(),
            "Batch finished"
        );
        Ok(result)
    }

    /// Execute a plan, spreading scenes over the configured number of workers.
    pub async fn execute(
        &self,
        plan: &DownloadPlan,
        credentials: &Credentials,
    ) -> Result<BatchResult, FetchError> {
        if plan.is_empty() {
            return Ok(BatchResult::default());
        }

        let workers = self.config.workers.clamp(1, plan.len());
        let mut queues: Vec<Vec<&ScenePlan>> = vec![Vec::new(); workers];
        for (i, scene) in plan.scenes().iter().enumerate() {
            queues[i % workers].push(scene);
        }

        let results = try_join_all(
            queues
                .into_iter()
                .enumerate()
                .map(|(worker, queue)| self.run_worker(worker, queue, credentials)),
        )
        .await?;

        let mut merged = BatchResult::default();
        for result in results {
            merged.merge(result);
        }
        Ok(merged)
    }

    async fn connect(&self, credentials: &Credentials) -> Result<DownloadSession, FetchError> {
        session::connect(credentials, self.config.proxy.as_ref(), &self.config).await
    }

    async fn run_worker(
        &self,
        worker: usize,
        queue: Vec<&ScenePlan>,
        credentials: &Credentials,
    ) -> Result<BatchResult, FetchError> {
        let mut downloader = ChunkedDownloader::new(self.config.retry.clone());
        if let Some(progress) = &self.progress {
            downloader = downloader.with_progress(progress.clone());
        }

        let mut session = self.connect(credentials).await?;
        let mut result = BatchResult::default();

        for scene in queue {
            let outcome = match self.process_scene(&session, &downloader, scene).await {
                Err(e) if e.is_fatal() => {
                    // The archive dropped the session mid-batch; one fresh login is allowed.
                    warn!(worker, scene = %scene.scene_id, error = %e, "Session rejected, logging in again");
                    session = self.connect(credentials).await?;
                    self.process_scene(&session, &downloader, scene).await?
                }
                other => other?,
            };

            match outcome {
                SceneOutcome::Succeeded => result.succeeded.push(scene.scene_id.clone()),
                SceneOutcome::Skipped => result.skipped.push(scene.scene_id.clone()),
                SceneOutcome::Failed(reason) => result.record_failure(&scene.scene_id, reason),
            }
        }
        Ok(result)
    }

    /// Returns `Err` only for errors that end the batch.
    #[instrument(skip_all, fields(scene = %scene.scene_id))]
    async fn process_scene(
        &self,
        session: &DownloadSession,
        downloader: &ChunkedDownloader,
        scene: &ScenePlan,
    ) -> Result<SceneOutcome, FetchError> {
        if scene.extraction_dir.exists() {
            info!(path = %scene.extraction_dir.display(), "Scene already unpacked, skipping");
            return Ok(SceneOutcome::Skipped);
        }

        match downloader.download(session, &scene.url, &scene.archive).await {
            Ok(_) => {
                let bundle = ArchiveBundle::new(&scene.archive, &scene.extraction_dir);
                if bundle.unpack().await {
                    Ok(SceneOutcome::Succeeded)
                } else {
                    Ok(SceneOutcome::Failed(format!(
                        "Unable to extract {}",
                        scene.archive.display()
                    )))
                }
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(FetchError::InvalidResponse {
                url,
                content_type,
                body,
            }) => {
                if body.contains(DOWNLOAD_NOT_FOUND_MARKER) {
                    warn!(url = %url, "Archive reports the download does not exist");
                }
                let page = scene.error_page();
                match fs::write(&page, &body) {
                    Ok(()) => warn!(path = %page.display(), "Saved unexpected HTML response"),
                    Err(e) => warn!(error = %e, "Unable to save unexpected HTML response"),
                }
                Ok(SceneOutcome::Failed(format!(
                    "Expected a binary archive from {} but got {}",
                    url, content_type
                )))
            }
            Err(e) => {
                warn!(error = %e, "Scene failed");
                Ok(SceneOutcome::Failed(e.to_string()))
            }
        }
    }
}
