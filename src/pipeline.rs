//! The atlas comparison: one connectome per atlas, computed from the same functional dataset.

use log::info;
use ndarray::Array2;

use std::fmt;
use std::path::Path;

use crate::atlas::AtlasSet;
use crate::cache::Memory;
use crate::config::Config;
use crate::connectivity::{concatenate_time_series, correlation_matrix};
use crate::coords::find_parcellation_cut_coords;
use crate::datasets::FunctionalDataset;
use crate::error::{ConnectomeError, Result};
use crate::masker::LabelsMasker;
use crate::plotting::{ConnectomeFigure, EdgeThreshold, FigureQueue};

/// The functional connectome of one atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasConnectome {
    pub name: String,
    /// Parcel labels, one per column of `time_series` and row of `correlation`.
    pub labels: Vec<i32>,
    /// Time series of all subjects, stacked along the time axis.
    pub time_series: Array2<f64>,
    pub correlation: Array2<f64>,
    /// World coordinates of the parcels.
    pub coords: Vec<[f64; 3]>,
}

impl AtlasConnectome {
    pub fn num_parcels(&self) -> usize {
        self.labels.len()
    }
}

impl fmt::Display for AtlasConnectome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Connectome of atlas '{}' with {} parcels over {} timepoints.",
            self.name,
            self.num_parcels(),
            self.time_series.nrows()
        )
    }
}

/// Compute the connectome of the atlas image at `atlas_path` for all subjects of `dataset`.
pub fn atlas_connectome<P: AsRef<Path>>(
    name: &str,
    atlas_path: P,
    dataset: &FunctionalDataset,
    config: &Config,
    memory: &dyn Memory,
) -> Result<AtlasConnectome> {
    let masker = LabelsMasker::from_file(atlas_path.as_ref(), config.masker_config())?;
    info!("Atlas '{}': {}", name, masker);

    let mut subject_series: Vec<Array2<f64>> = Vec::with_capacity(dataset.len());
    for subject in dataset.subjects() {
        subject_series.push(masker.transform_cached(&subject.func, Some(&subject.confounds), memory)?);
    }
    let time_series = concatenate_time_series(&subject_series)?;
    let correlation = correlation_matrix(&time_series)?;
    let coords = find_parcellation_cut_coords(masker.labels_img(), config.hemisphere)?;
    if coords.len() != correlation.nrows() {
        return Err(ConnectomeError::ShapeMismatch(format!(
            "atlas '{}' has {} parcel coordinates, but {} time series",
            name,
            coords.len(),
            correlation.nrows()
        )));
    }

    let connectome = AtlasConnectome { name: name.to_string(), labels: masker.labels().to_vec(), time_series, correlation, coords };
    info!("{}", connectome);
    Ok(connectome)
}

/// Compute the connectomes of all atlases, in atlas name order.
pub fn compare_atlases(atlases: &AtlasSet, dataset: &FunctionalDataset, config: &Config, memory: &dyn Memory) -> Result<Vec<AtlasConnectome>> {
    if dataset.is_empty() {
        return Err(ConnectomeError::EmptyInput(String::from("the functional dataset has no subjects")));
    }
    atlases
        .iter()
        .map(|atlas| atlas_connectome(&atlas.name, &atlas.image, dataset, config, memory))
        .collect()
}

/// Queue one connectome figure per atlas, titled with the atlas name.
pub fn plot_connectomes(connectomes: &[AtlasConnectome], threshold: &EdgeThreshold, queue: &mut FigureQueue) -> Result<()> {
    for connectome in connectomes {
        let figure = ConnectomeFigure::new(&connectome.name, &connectome.correlation, &connectome.coords, threshold)?;
        queue.push(figure);
    }
    Ok(())
}
