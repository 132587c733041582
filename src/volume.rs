//! In-memory brain volumes and their voxel-to-world transforms.
//!
//! Both NIfTI and FreeSurfer MGH files are decoded into a [`BrainVolume`], so that the
//! rest of the crate does not need to care about the on-disk format.

use ndarray::{s, Array3, Array4, ArrayView3};

use std::fmt;
use std::path::Path;

use crate::error::{ConnectomeError, Result};
use crate::fs_mgh::read_mgh;
use crate::nifti::read_nifti;

/// A 4x4 affine transform mapping voxel indices (i, j, k) to world coordinates (x, y, z) in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(pub [[f64; 4]; 4]);

impl Default for Affine {
    fn default() -> Affine {
        Affine::identity()
    }
}

impl Affine {
    pub fn identity() -> Affine {
        Affine([
            [1., 0., 0., 0.],
            [0., 1., 0., 0.],
            [0., 0., 1., 0.],
            [0., 0., 0., 1.],
        ])
    }

    /// A diagonal affine with the given voxel sizes and translation.
    pub fn from_zooms(zooms: [f64; 3], offset: [f64; 3]) -> Affine {
        Affine([
            [zooms[0], 0., 0., offset[0]],
            [0., zooms[1], 0., offset[1]],
            [0., 0., zooms[2], offset[2]],
            [0., 0., 0., 1.],
        ])
    }

    /// Map a (possibly fractional) voxel index to world coordinates.
    pub fn apply(&self, ijk: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        let mut xyz = [0.; 3];
        for (row, out) in xyz.iter_mut().enumerate() {
            *out = m[row][0] * ijk[0] + m[row][1] * ijk[1] + m[row][2] * ijk[2] + m[row][3];
        }
        xyz
    }

    /// Inverse of the affine. Only the upper 3x4 part is used, the last row is assumed to be (0, 0, 0, 1).
    pub fn inverse(&self) -> Result<Affine> {
        let m = &self.0;
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        if det.abs() < 1e-12 {
            return Err(ConnectomeError::ShapeMismatch(String::from("affine is singular and cannot be inverted")));
        }
        let mut inv = [[0.; 4]; 4];
        inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det;
        inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det;
        inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det;
        inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det;
        inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det;
        inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det;
        inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det;
        inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det;
        inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det;
        for row in 0..3 {
            inv[row][3] = -(inv[row][0] * m[0][3] + inv[row][1] * m[1][3] + inv[row][2] * m[2][3]);
        }
        inv[3][3] = 1.;
        Ok(Affine(inv))
    }

    /// Whether two affines agree up to `tol` in every entry.
    pub fn approx_eq(&self, other: &Affine, tol: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}


/// A volumetric image with 4 dimensions (x, y, z, t). 3D images are stored with a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BrainVolume {
    pub data: Array4<f32>,
    pub affine: Affine,
}

impl BrainVolume {
    pub fn new(data: Array4<f32>, affine: Affine) -> BrainVolume {
        BrainVolume { data, affine }
    }

    /// Wrap a 3D array as a single-frame volume.
    pub fn from_3d(data: Array3<f32>, affine: Affine) -> BrainVolume {
        let data = data.insert_axis(ndarray::Axis(3));
        BrainVolume { data, affine }
    }

    /// The spatial shape (x, y, z).
    pub fn spatial_shape(&self) -> [usize; 3] {
        let sh = self.data.shape();
        [sh[0], sh[1], sh[2]]
    }

    /// The number of frames, or timepoints for functional images.
    pub fn num_frames(&self) -> usize {
        self.data.shape()[3]
    }

    /// A view of a single 3D frame.
    ///
    /// # Panics
    ///
    /// If `frame` is out of range, see [`BrainVolume::num_frames`].
    pub fn frame(&self, frame: usize) -> ArrayView3<f32> {
        self.data.slice(s![.., .., .., frame])
    }

    /// Whether this volume lives on the same voxel grid as `other`.
    pub fn same_grid(&self, other_shape: [usize; 3], other_affine: &Affine) -> bool {
        self.spatial_shape() == other_shape && self.affine.approx_eq(other_affine, 1e-4)
    }
}

impl fmt::Display for BrainVolume {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [x, y, z] = self.spatial_shape();
        write!(f, "Brain volume with {}x{}x{} voxels and {} frames.", x, y, z, self.num_frames())
    }
}


/// Read a brain volume from a NIfTI-1 (`.nii`, `.nii.gz`) or FreeSurfer MGH (`.mgh`, `.mgz`) file.
///
/// The format is determined from the file name.
///
/// # Examples
///
/// ```no_run
/// let vol = neuroconnectome::read_volume("/path/to/func.nii.gz").unwrap();
/// println!("{}", vol);
/// ```
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<BrainVolume> {
    let name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".mgh") || name.ends_with(".mgz") {
        Ok(read_mgh(path)?.to_volume())
    } else {
        Ok(read_nifti(path)?.to_volume())
    }
}
