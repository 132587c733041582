//! Extraction of region-averaged time series from 4D functional images, using a label atlas.
//!
//! The [`LabelsMasker`] averages the signal of all voxels of each parcel at every timepoint,
//! removes nuisance confounds and optionally standardizes the result. The output has one
//! column per atlas parcel, in the order of [`LabelImage::labels`].

use log::{debug, warn};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::atlas::{LabelImage, BACKGROUND_LABEL};
use crate::cache::{CacheKey, Memory};
use crate::confounds::{read_confounds, Confounds};
use crate::error::{ConnectomeError, Result};
use crate::signal::clean;
use crate::volume::{read_volume, BrainVolume};

/// Settings of a [`LabelsMasker`]. Part of the cache key of extracted time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskerConfig {
    /// Z-score each extracted time series.
    pub standardize: bool,
    /// The label of voxels that belong to no parcel.
    pub background_label: i32,
}

impl Default for MaskerConfig {
    fn default() -> MaskerConfig {
        MaskerConfig { standardize: false, background_label: BACKGROUND_LABEL }
    }
}


/// Extracts one time series per atlas parcel from functional images.
#[derive(Debug, Clone)]
pub struct LabelsMasker {
    labels_img: LabelImage,
    config: MaskerConfig,
    labels: Vec<i32>,
    atlas_digest: Vec<u8>,
}

impl LabelsMasker {

    pub fn new(mut labels_img: LabelImage, config: MaskerConfig) -> LabelsMasker {
        labels_img.background_label = config.background_label;
        let labels = labels_img.labels();
        let atlas_digest = digest_label_image(&labels_img);
        LabelsMasker { labels_img, config, labels, atlas_digest }
    }

    /// Build a masker for the label atlas stored in a NIfTI or MGH file.
    pub fn from_file<P: AsRef<Path>>(path: P, config: MaskerConfig) -> Result<LabelsMasker> {
        Ok(LabelsMasker::new(LabelImage::from_file(path)?, config))
    }

    pub fn config(&self) -> &MaskerConfig {
        &self.config
    }

    pub fn labels_img(&self) -> &LabelImage {
        &self.labels_img
    }

    /// The labels of the parcels, one per output column.
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn num_parcels(&self) -> usize {
        self.labels.len()
    }

    /// Average the signal over every parcel, without any cleaning.
    ///
    /// The atlas is resampled onto the grid of `func` by nearest-neighbour lookup if the grids differ.
    /// A parcel that covers no voxel of the functional image yields a column of zeros.
    pub fn region_signals(&self, func: &BrainVolume) -> Result<Array2<f64>> {
        let labels_img = if func.same_grid(self.labels_img.shape(), &self.labels_img.affine) {
            Cow::Borrowed(&self.labels_img)
        } else {
            debug!("Resampling the atlas onto the functional grid of shape {:?}.", func.spatial_shape());
            Cow::Owned(self.labels_img.resample_to(func.spatial_shape(), &func.affine)?)
        };
        let num_frames = func.num_frames();

        let column_of: HashMap<i32, usize> = self.labels.iter().enumerate().map(|(idx, l)| (*l, idx)).collect();
        let mut sums: Array2<f64> = Array2::zeros((num_frames, self.labels.len()));
        let mut counts: Vec<usize> = vec![0; self.labels.len()];

        for ((i, j, k), label) in labels_img.labels.indexed_iter() {
            let col = match column_of.get(label) {
                Some(col) => *col,
                None => continue,
            };
            counts[col] += 1;
            let voxel_ts = func.data.slice(s![i, j, k, ..]);
            Zip::from(sums.column_mut(col)).and(&voxel_ts).for_each(|sum, v| *sum += *v as f64);
        }

        for (col, count) in counts.iter().enumerate() {
            if *count == 0 {
                warn!("Parcel with label {} covers no voxel of the functional image, its signal is set to zero.", self.labels[col]);
                continue;
            }
            let n = *count as f64;
            sums.column_mut(col).mapv_inplace(|v| v / n);
        }
        Ok(sums)
    }

    /// Extract the cleaned parcel time series of shape (timepoints, parcels) from a functional image.
    ///
    /// If confounds are given, they must have one row per timepoint of `func`.
    pub fn transform(&self, func: &BrainVolume, confounds: Option<&Confounds>) -> Result<Array2<f64>> {
        if let Some(conf) = confounds {
            if conf.num_timepoints() != func.num_frames() {
                return Err(ConnectomeError::ShapeMismatch(format!(
                    "functional image has {} timepoints, but the confounds table has {} rows",
                    func.num_frames(),
                    conf.num_timepoints()
                )));
            }
        }
        let signals = self.region_signals(func)?;
        clean(signals, confounds.map(|c| &c.values), self.config.standardize)
    }

    /// Like [`LabelsMasker::transform`], but reads the inputs from files and memoizes the result.
    ///
    /// The cache key covers the masker configuration, the atlas content and the identity of the input files.
    pub fn transform_cached<P, Q>(&self, func_path: P, confounds_path: Option<Q>, memory: &dyn Memory) -> Result<Array2<f64>>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let func_path = func_path.as_ref();
        let confounds_path: Option<&Path> = confounds_path.as_ref().map(|p| p.as_ref());

        let mut key = CacheKey::builder("labels_masker.transform")
            .json(&self.config)?
            .bytes(&self.atlas_digest)
            .file(func_path)?;
        key = match confounds_path {
            Some(p) => key.file(p)?,
            None => key.bytes(b"no confounds"),
        };
        let key = key.finish();

        memory.get_or_compute(&key, &mut || -> Result<Array2<f64>> {
            debug!("Extracting {} parcel signals from '{}'.", self.num_parcels(), func_path.display());
            let func = read_volume(func_path)?;
            let confounds = match confounds_path {
                Some(p) => Some(read_confounds(p)?),
                None => None,
            };
            self.transform(&func, confounds.as_ref())
        })
    }
}

impl fmt::Display for LabelsMasker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Labels masker for {} parcels (standardize: {}).", self.num_parcels(), self.config.standardize)
    }
}

/// Hash the content of a label image, so that cached results are invalidated when the atlas changes.
fn digest_label_image(img: &LabelImage) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for d in img.shape().iter() {
        hasher.update(&(*d as u64).to_le_bytes());
    }
    for row in img.affine.0.iter() {
        for v in row.iter() {
            hasher.update(&v.to_le_bytes());
        }
    }
    for l in img.labels.iter() {
        hasher.update(&l.to_le_bytes());
    }
    hasher.finalize().to_vec()
}
