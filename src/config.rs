//! Settings of an atlas comparison run.

use serde::{Deserialize, Serialize};

use std::fs;
use std::path::{Path, PathBuf};

use crate::atlas::BACKGROUND_LABEL;
use crate::coords::Hemisphere;
use crate::error::Result;
use crate::masker::MaskerConfig;
use crate::plotting::EdgeThreshold;

/// Where data is stored and how connectomes are computed and plotted.
///
/// Missing fields in a JSON settings file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Downloaded atlases and datasets.
    pub data_dir: PathBuf,
    /// Memoized time series extraction results.
    pub cache_dir: PathBuf,
    /// Rendered figures.
    pub output_dir: PathBuf,
    pub n_subjects: usize,
    /// A percentile like `"80%"` or an absolute value like `"0.3"`.
    pub edge_threshold: String,
    pub standardize: bool,
    /// Side preferred for the coordinates of bilateral parcels, `"left"` or `"right"`.
    pub hemisphere: Hemisphere,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_dir: PathBuf::from("neuroconnectome_data"),
            cache_dir: PathBuf::from("connectome_cache"),
            output_dir: PathBuf::from("connectome_figures"),
            n_subjects: 10,
            edge_threshold: String::from("80%"),
            standardize: true,
            hemisphere: Hemisphere::Left,
        }
    }
}

impl Config {
    /// Read settings from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn masker_config(&self) -> MaskerConfig {
        MaskerConfig { standardize: self.standardize, background_label: BACKGROUND_LABEL }
    }

    pub fn edge_threshold(&self) -> Result<EdgeThreshold> {
        EdgeThreshold::parse(&self.edge_threshold)
    }
}
