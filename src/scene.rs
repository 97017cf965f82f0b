//! Landsat scene identifiers and the fixed satellite table they are built from.
use chrono::{Datelike, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SceneIdError;

/// Length of a rendered scene identifier, e.g. `LT50370272007121PAC01`.
pub const SCENE_ID_LEN: usize = 21;

pub const MAX_PATH: u16 = 233;
pub const MAX_ROW: u16 = 248;

/// Days between successive overpasses of the same path/row.
pub const REVISIT_INTERVAL_DAYS: i64 = 16;

/// Archive versions in the order they are tried.
pub const ARCHIVE_VERSIONS: [u8; 3] = [0, 1, 2];

const LT5_STATIONS: [&str; 13] = [
    "GLC", "ASA", "KIR", "MOR", "KHC", "PAC", "KIS", "CHM", "LGS", "MGR", "COA", "MPS", "CUB",
];
const LE7_STATIONS: [&str; 7] = ["EDC", "SGS", "AGS", "ASN", "SG1", "CUB", "COA"];
const LC8_STATIONS: [&str; 1] = ["LGN"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Satellite {
    #[serde(rename = "LT5")]
    Landsat5,
    #[serde(rename = "LE7")]
    Landsat7,
    #[serde(rename = "LC8")]
    Landsat8,
}

impl Satellite {
    pub const ALL: [Satellite; 3] = [Self::Landsat5, Self::Landsat7, Self::Landsat8];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Landsat5 => "LT5",
            Self::Landsat7 => "LE7",
            Self::Landsat8 => "LC8",
        }
    }

    /// Numeric product family used in download URLs.
    pub fn product_family_id(&self) -> u32 {
        match self {
            Self::Landsat5 => 3119,
            Self::Landsat7 => 3373,
            Self::Landsat8 => 4923,
        }
    }

    /// Dataset id of the FGDC metadata pages used to check whether a scene exists.
    pub fn metadata_dataset_id(&self) -> u32 {
        match self {
            Self::Landsat5 => 12266,
            Self::Landsat7 => 13350,
            Self::Landsat8 => 13400,
        }
    }

    /// Ground stations in search order. The order decides which identifier the
    /// resolver settles on, so it must not be sorted or deduplicated.
    pub fn stations(&self) -> &'static [&'static str] {
        match self {
            Self::Landsat5 => &LT5_STATIONS,
            Self::Landsat7 => &LE7_STATIONS,
            Self::Landsat8 => &LC8_STATIONS,
        }
    }

    pub fn station(&self, code: &str) -> Option<&'static str> {
        self.stations().iter().copied().find(|s| *s == code)
    }

    /// Satellite owning a scene identifier, judged by its three character prefix.
    pub fn from_scene_id(scene_id: &str) -> Result<Self, SceneIdError> {
        let prefix = scene_id.get(0..3).unwrap_or(scene_id);
        prefix.parse()
    }
}

impl fmt::Display for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Satellite {
    type Err = SceneIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sat| sat.code() == s)
            .ok_or_else(|| SceneIdError::UnknownSatellite(s.to_string()))
    }
}

/// One satellite acquisition as keyed by the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct SceneIdentifier {
    satellite: Satellite,
    path: u16,
    row: u16,
    date: NaiveDate,
    station: &'static str,
    version: u8,
}

impl SceneIdentifier {
    pub fn new(
        satellite: Satellite,
        path: u16,
        row: u16,
        date: NaiveDate,
        station: &str,
        version: u8,
    ) -> Result<Self, SceneIdError> {
        if path > MAX_PATH {
            return Err(SceneIdError::PathOutOfRange(path));
        }
        if row > MAX_ROW {
            return Err(SceneIdError::RowOutOfRange(row));
        }
        if !(1000..=9999).contains(&date.year()) {
            return Err(SceneIdError::Date(date.to_string()));
        }
        if version > 99 {
            return Err(SceneIdError::Version(version.to_string()));
        }
        let station = satellite
            .station(station)
            .ok_or_else(|| SceneIdError::UnknownStation {
                satellite,
                station: station.to_string(),
            })?;

        Ok(Self {
            satellite,
            path,
            row,
            date,
            station,
            version,
        })
    }

    pub fn satellite(&self) -> Satellite {
        self.satellite
    }

    pub fn path(&self) -> u16 {
        self.path
    }

    pub fn row(&self) -> u16 {
        self.row
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn station(&self) -> &'static str {
        self.station
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// `station` must come from this satellite's table and `version` from
    /// [`ARCHIVE_VERSIONS`].
    pub(crate) fn with_station_version(&self, station: &'static str, version: u8) -> Self {
        Self {
            station,
            version,
            ..self.clone()
        }
    }

    /// Same path/row, station and version on another date.
    pub fn with_date(&self, date: NaiveDate) -> Result<Self, SceneIdError> {
        Self::new(
            self.satellite,
            self.path,
            self.row,
            date,
            self.station,
            self.version,
        )
    }
}

impl fmt::Display for SceneIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:03}{:03}{:04}{:03}{}{:02}",
            self.satellite,
            self.path,
            self.row,
            self.date.year(),
            self.date.ordinal(),
            self.station,
            self.version
        )
    }
}

fn parse_digits<T: FromStr>(field: &'static str, value: &str) -> Result<T, SceneIdError> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SceneIdError::Digits {
            field,
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| SceneIdError::Digits {
        field,
        value: value.to_string(),
    })
}

impl FromStr for SceneIdentifier {
    type Err = SceneIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SCENE_ID_LEN || !s.is_ascii() {
            return Err(SceneIdError::Length(s.chars().count()));
        }

        let satellite: Satellite = s[0..3].parse()?;
        let path: u16 = parse_digits("path", &s[3..6])?;
        let row: u16 = parse_digits("row", &s[6..9])?;
        let year: i32 = parse_digits("year", &s[9..13])?;
        let ordinal: u32 = parse_digits("day of year", &s[13..16])?;
        let date = NaiveDate::from_yo_opt(year, ordinal)
            .ok_or_else(|| SceneIdError::Date(s[9..16].to_string()))?;
        let version: u8 = parse_digits("version", &s[19..21])
            .map_err(|_| SceneIdError::Version(s[19..21].to_string()))?;

        Self::new(satellite, path, row, date, &s[16..19], version)
    }
}

impl TryFrom<String> for SceneIdentifier {
    type Error = SceneIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// `station` points into the static tables, so this cannot be derived.
impl<'de> Deserialize<'de> for SceneIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl From<SceneIdentifier> for String {
    fn from(value: SceneIdentifier) -> Self {
        value.to_string()
    }
}
