use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Endpoints;
use crate::error::SceneIdError;
use crate::scene::SceneIdentifier;

/// Where one scene comes from and where it ends up.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScenePlan {
    pub scene_id: String,
    pub url: String,
    pub archive: PathBuf,
    pub extraction_dir: PathBuf,
}

impl ScenePlan {
    pub fn new(scene_id: &str, output_dir: &Path, endpoints: &Endpoints) -> Result<Self, SceneIdError> {
        let scene: SceneIdentifier = scene_id.parse()?;
        let scene_id = scene.to_string();
        Ok(Self {
            url: endpoints.download_url(scene.satellite(), &scene_id),
            archive: output_dir.join(format!("{}.tgz", scene_id)),
            extraction_dir: output_dir.join(&scene_id),
            scene_id,
        })
    }

    /// Where an HTML page returned instead of the archive is saved.
    pub fn error_page(&self) -> PathBuf {
        self.archive.with_file_name(format!("{}.error.html", self.scene_id))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    scenes: Vec<ScenePlan>,
}

impl DownloadPlan {
    pub fn new(scenes: Vec<ScenePlan>) -> Self {
        Self { scenes }
    }

    /// Plan every parseable id, returning the ids that could not be planned beside it.
    /// Repeated ids are planned once.
    pub fn build<S: AsRef<str>>(
        scene_ids: &[S],
        output_dir: &Path,
        endpoints: &Endpoints,
    ) -> (Self, Vec<(String, SceneIdError)>) {
        let mut scenes: Vec<ScenePlan> = vec![];
        let mut rejected = vec![];
        for id in scene_ids {
            let id = id.as_ref().trim();
            match ScenePlan::new(id, output_dir, endpoints) {
                Ok(plan) if scenes.iter().any(|s| s.scene_id == plan.scene_id) => {}
                Ok(plan) => scenes.push(plan),
                Err(e) => rejected.push((id.to_string(), e)),
            }
        }
        (Self { scenes }, rejected)
    }

    pub fn scenes(&self) -> &[ScenePlan] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_download_plan(output_dir: &Path) -> DownloadPlan {
        let ids = [
            "LT50370272007121PAC01",
            "LE70370272007129EDC00",
            "LC80370272014124LGN01",
        ];
        let (plan, rejected) = DownloadPlan::build(&ids, output_dir, &Endpoints::default());
        assert!(rejected.is_empty());
        plan
    }

    #[test]
    fn test_scene_plan_layout() {
        let plan = ScenePlan::new(
            "LE70370272007129EDC00",
            Path::new("/data/landsat"),
            &Endpoints::default(),
        )
        .unwrap();
        assert_eq!(
            plan.url,
            "https://earthexplorer.usgs.gov/download/3373/LE70370272007129EDC00/STANDARD/EE"
        );
        assert_eq!(
            plan.archive,
            PathBuf::from("/data/landsat/LE70370272007129EDC00.tgz")
        );
        assert_eq!(
            plan.extraction_dir,
            PathBuf::from("/data/landsat/LE70370272007129EDC00")
        );
        assert_eq!(
            plan.error_page(),
            PathBuf::from("/data/landsat/LE70370272007129EDC00.error.html")
        );
    }

    #[test]
    fn test_build_rejects_and_dedupes() {
        let ids = [
            "LT50370272007121PAC01",
            "not-a-scene",
            "LT50370272007121PAC01",
            "S2A_MSIL2A_20240504T195901",
        ];
        let (plan, rejected) =
            DownloadPlan::build(&ids, Path::new("/out"), &Endpoints::default());
        assert_eq!(plan.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].0, "not-a-scene");
    }

    #[test]
    fn test_write_then_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_plan.json");
        let plan = mock_download_plan(dir.path());
        plan.write(&path).unwrap();

        let read = DownloadPlan::read(&path).unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read, plan);
    }
}
