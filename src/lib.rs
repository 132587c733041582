//! Functional connectomes of volumetric brain atlases.
//!
//! This package extracts region-averaged time series from 4D functional MRI volumes for label
//! atlases, computes parcel-by-parcel correlation matrices and renders them as connectome plots.
//! NIfTI-1 and FreeSurfer MGH/MGZ volumes are supported as inputs.

pub mod atlas;
pub mod cache;
pub mod config;
pub mod confounds;
pub mod connectivity;
pub mod coords;
pub mod datasets;
pub mod error;
pub mod fs_mgh;
pub mod masker;
pub mod nifti;
pub mod pipeline;
pub mod plotting;
pub mod signal;
pub mod util;
pub mod volume;

pub use atlas::{AtlasRef, AtlasSet, LabelImage};
pub use cache::{CacheKey, DiskMemory, Memory, NoMemory};
pub use config::Config;
pub use confounds::{read_confounds, Confounds};
pub use connectivity::{concatenate_time_series, correlation_matrix};
pub use coords::{find_parcellation_cut_coords, find_probabilistic_atlas_cut_coords, Hemisphere};
pub use datasets::{default_atlases, Fetcher, FunctionalDataset, SubjectRecord};
pub use error::{ConnectomeError, Result};
pub use fs_mgh::{read_mgh, FsMgh, FsMghHeader};
pub use masker::{LabelsMasker, MaskerConfig};
pub use nifti::{read_nifti, write_nifti, NiftiHeader, NiftiImage};
pub use pipeline::{atlas_connectome, compare_atlases, plot_connectomes, AtlasConnectome};
pub use plotting::{ConnectomeFigure, EdgeThreshold, FigureQueue};
pub use volume::{read_volume, Affine, BrainVolume};
