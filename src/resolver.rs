//! Reconstruction of archive scene identifiers.
//!
//! The station and version parts of an identifier cannot be derived from the
//! acquisition, so they are found by asking the archive about each candidate in a
//! fixed order: versions `00`, `01`, `02`, and within each version the satellite's
//! stations in table order. The first candidate the archive confirms is used and no
//! further candidates are checked. Callers depend on this order, because more than
//! one combination can exist for the same acquisition.
use chrono::{Days, NaiveDate};
use tracing::{debug, info};

use crate::error::{FetchError, SceneIdError};
use crate::scene::{Satellite, SceneIdentifier, ARCHIVE_VERSIONS, REVISIT_INTERVAL_DAYS};
use crate::scene_index::SceneIndex;

/// Every station/version combination for one acquisition, in search order.
pub fn candidates(
    satellite: Satellite,
    path: u16,
    row: u16,
    date: NaiveDate,
) -> Result<impl Iterator<Item = SceneIdentifier>, SceneIdError> {
    let seed = SceneIdentifier::new(
        satellite,
        path,
        row,
        date,
        satellite.stations()[0],
        ARCHIVE_VERSIONS[0],
    )?;

    Ok(ARCHIVE_VERSIONS.into_iter().flat_map(move |version| {
        let seed = seed.clone();
        satellite
            .stations()
            .iter()
            .copied()
            .map(move |station| seed.with_station_version(station, version))
    }))
}

/// First candidate the index confirms, or `None` once all are exhausted.
pub async fn first_existing<I>(
    index: &impl SceneIndex,
    candidates: I,
) -> Result<Option<SceneIdentifier>, FetchError>
where
    I: IntoIterator<Item = SceneIdentifier>,
{
    for candidate in candidates {
        if index.scene_exists(&candidate).await? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Identifiers of one path/row at a fixed revisit interval, sharing a single
/// station/version pair.
#[derive(Debug)]
pub struct SceneSeries {
    template: SceneIdentifier,
    next: NaiveDate,
    end: NaiveDate,
    interval: Days,
}

impl Iterator for SceneSeries {
    type Item = SceneIdentifier;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let scene = self.template.with_date(self.next).ok()?;
        self.next = self.next.checked_add_days(self.interval).unwrap_or(self.end);
        Some(scene)
    }
}

/// Identifiers from `reference_date` every `revisit_interval_days`, stopping before
/// `end_date`. An interval of zero is treated as one day.
///
/// The same `station` and `version` are used for every date. The archive may have
/// changed either within a long range; this is not checked.
pub fn generate_series(
    reference_date: NaiveDate,
    (path, row): (u16, u16),
    end_date: NaiveDate,
    satellite: Satellite,
    station: &str,
    version: u8,
    revisit_interval_days: u32,
) -> Result<SceneSeries, SceneIdError> {
    let template = SceneIdentifier::new(satellite, path, row, reference_date, station, version)?;
    Ok(SceneSeries {
        template,
        next: reference_date,
        end: end_date,
        interval: Days::new(u64::from(revisit_interval_days.max(1))),
    })
}

pub struct Resolver<I> {
    index: I,
}

impl<I: SceneIndex> Resolver<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }

    /// Station and version of the first identifier the archive holds for this
    /// acquisition.
    pub async fn resolve_first_valid(
        &self,
        satellite: Satellite,
        path: u16,
        row: u16,
        date: NaiveDate,
    ) -> Result<(&'static str, u8), FetchError> {
        let found = first_existing(&self.index, candidates(satellite, path, row, date)?).await?;
        match found {
            Some(scene) => {
                debug!(scene = %scene, "Resolved station and version");
                Ok((scene.station(), scene.version()))
            }
            None => Err(FetchError::NotFound {
                satellite,
                path,
                row,
                date,
            }),
        }
    }

    /// First acquisition on or after `start` that the archive holds, found by trying
    /// each day of one revisit interval.
    pub async fn locate_reference(
        &self,
        satellite: Satellite,
        path: u16,
        row: u16,
        start: NaiveDate,
    ) -> Result<SceneIdentifier, FetchError> {
        for offset in 0..REVISIT_INTERVAL_DAYS as u64 {
            let Some(date) = start.checked_add_days(Days::new(offset)) else {
                break;
            };
            match self.resolve_first_valid(satellite, path, row, date).await {
                Ok((station, version)) => {
                    let scene = SceneIdentifier::new(satellite, path, row, date, station, version)?;
                    info!(scene = %scene, "Found reference overpass");
                    return Ok(scene);
                }
                Err(FetchError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(FetchError::NotFound {
            satellite,
            path,
            row,
            date: start,
        })
    }

    /// Reference overpass at or after `start`, then every revisit before `end`.
    pub async fn candidate_series(
        &self,
        satellite: Satellite,
        path: u16,
        row: u16,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SceneSeries, FetchError> {
        let reference = self.locate_reference(satellite, path, row, start).await?;
        let series = generate_series(
            reference.date(),
            (path, row),
            end,
            satellite,
            reference.station(),
            reference.version(),
            REVISIT_INTERVAL_DAYS as u32,
        )?;
        Ok(series)
    }
}
