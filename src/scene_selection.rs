use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml;

use crate::error::FetchError;
use crate::resolver::{generate_series, Resolver};
use crate::scene::{Satellite, REVISIT_INTERVAL_DAYS};
use crate::scene_index::SceneIndex;

/// What to fetch: a path/row over a date range, or an explicit list of scene ids.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SceneSelection {
    pub satellite: Satellite,
    pub path: u16,
    pub row: u16,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Known overpass date; skips the search for the first acquisition after `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<NaiveDate>,
    #[serde(default)]
    pub scene_ids: Vec<String>,
}

pub fn scene_selection_toml() -> toml::Table {
    toml::toml! {
        satellite = "LT5"

        // WRS2 ascending path/row
        path = 37
        row = 27

        start = "2007-05-01"
        end = "2007-05-30"

        scene_ids = []
    }
}

impl SceneSelection {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let selection: Self = toml::from_str(&content)?;
        selection.validate()?;
        Ok(selection)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        let selection: Self = toml::from_str(&table.to_string())?;
        selection.validate()?;
        Ok(selection)
    }

    fn validate(&self) -> Result<()> {
        if self.end <= self.start {
            bail!("Selection end {} is not after start {}", self.end, self.start);
        }
        Ok(())
    }

    /// Explicit ids with duplicates removed, first occurrence kept.
    pub fn ids_to_download(&self) -> Option<Vec<String>> {
        if self.scene_ids.is_empty() {
            return None;
        }
        let mut ids: Vec<String> = vec![];
        for id in &self.scene_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        Some(ids)
    }

    /// The explicit ids if any, otherwise the series resolved against the archive.
    pub async fn resolve_scene_ids(
        &self,
        resolver: &Resolver<impl SceneIndex>,
    ) -> Result<Vec<String>, FetchError> {
        if let Some(ids) = self.ids_to_download() {
            return Ok(ids);
        }

        let series = match self.reference_date {
            Some(reference) => {
                let (station, version) = resolver
                    .resolve_first_valid(self.satellite, self.path, self.row, reference)
                    .await?;
                generate_series(
                    reference,
                    (self.path, self.row),
                    self.end,
                    self.satellite,
                    station,
                    version,
                    REVISIT_INTERVAL_DAYS as u32,
                )?
            }
            None => {
                resolver
                    .candidate_series(self.satellite, self.path, self.row, self.start, self.end)
                    .await?
            }
        };
        Ok(series.map(|scene| scene.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneIdentifier;

    struct OnlyIndex(&'static str);

    impl SceneIndex for OnlyIndex {
        async fn scene_exists(&self, scene: &SceneIdentifier) -> Result<bool, FetchError> {
            Ok(scene.to_string() == self.0)
        }
    }

    #[test]
    fn test_template() {
        let selection = SceneSelection::from_template(&scene_selection_toml()).unwrap();
        assert_eq!(selection.satellite, Satellite::Landsat5);
        assert_eq!((selection.path, selection.row), (37, 27));
        assert_eq!(selection.ids_to_download(), None);
    }

    #[test]
    fn test_write_then_read_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene_selection.toml");
        let mut selection = SceneSelection::from_template(&scene_selection_toml()).unwrap();
        selection.reference_date = NaiveDate::from_ymd_opt(2007, 5, 1);
        selection.write(&path).unwrap();

        let read = SceneSelection::read(&path).unwrap();
        assert_eq!(read, selection);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut table = scene_selection_toml();
        table.insert("end".to_string(), toml::Value::String("2007-04-01".to_string()));
        assert!(SceneSelection::from_template(&table).is_err());
    }

    #[test]
    fn test_ids_deduplicated_in_order() {
        let mut selection = SceneSelection::from_template(&scene_selection_toml()).unwrap();
        selection.scene_ids = vec![
            "LT50370272007137PAC01".to_string(),
            "LT50370272007121PAC01".to_string(),
            "LT50370272007137PAC01".to_string(),
        ];
        assert_eq!(
            selection.ids_to_download().unwrap(),
            vec!["LT50370272007137PAC01", "LT50370272007121PAC01"]
        );
    }

    #[tokio::test]
    async fn test_resolve_from_reference_date() {
        let mut selection = SceneSelection::from_template(&scene_selection_toml()).unwrap();
        selection.reference_date = NaiveDate::from_ymd_opt(2007, 5, 1);
        let resolver = Resolver::new(OnlyIndex("LT50370272007121PAC01"));

        let ids = selection.resolve_scene_ids(&resolver).await.unwrap();
        assert_eq!(ids, vec!["LT50370272007121PAC01", "LT50370272007137PAC01"]);
    }

    #[tokio::test]
    async fn test_resolve_by_searching_from_start() {
        let mut selection = SceneSelection::from_template(&scene_selection_toml()).unwrap();
        selection.start = NaiveDate::from_ymd_opt(2007, 4, 25).unwrap();
        let resolver = Resolver::new(OnlyIndex("LT50370272007121PAC01"));

        let ids = selection.resolve_scene_ids(&resolver).await.unwrap();
        assert_eq!(ids, vec!["LT50370272007121PAC01", "LT50370272007137PAC01"]);
    }
}
