//! Brain atlases: named references to atlas images, and label images loaded from them.
//!
//! A label atlas assigns each voxel of a brain volume to exactly one parcel, identified by a
//! positive integer label. The background, i.e. voxels outside of all parcels, has label `0`.

use ndarray::{Array3, Zip};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConnectomeError, Result};
use crate::volume::{read_volume, Affine, BrainVolume};

pub const BACKGROUND_LABEL: i32 = 0;

/// A display name together with the path of the atlas image.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasRef {
    pub name: String,
    pub image: PathBuf,
}

/// A collection of atlases with unique display names, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtlasSet {
    atlases: BTreeMap<String, PathBuf>,
}

impl AtlasSet {
    pub fn new() -> AtlasSet {
        AtlasSet::default()
    }

    /// Register an atlas. Fails with [`ConnectomeError::DuplicateAtlasName`] if the name is already taken.
    pub fn insert<S, P>(&mut self, name: S, image: P) -> Result<()>
    where
        S: Into<String>,
        P: Into<PathBuf>,
    {
        let name = name.into();
        if self.atlases.contains_key(&name) {
            return Err(ConnectomeError::DuplicateAtlasName(name));
        }
        self.atlases.insert(name, image.into());
        Ok(())
    }

    /// Build a set from (name, image) pairs, rejecting duplicate names.
    pub fn from_pairs<I, S, P>(pairs: I) -> Result<AtlasSet>
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<PathBuf>,
    {
        let mut set = AtlasSet::new();
        for (name, image) in pairs {
            set.insert(name, image)?;
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.atlases.get(name).map(|p| p.as_path())
    }

    pub fn len(&self) -> usize {
        self.atlases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atlases.is_empty()
    }

    /// The atlases, sorted by display name.
    pub fn iter(&self) -> impl Iterator<Item = AtlasRef> + '_ {
        self.atlases.iter().map(|(name, image)| AtlasRef { name: name.clone(), image: image.clone() })
    }

    pub fn names(&self) -> Vec<String> {
        self.atlases.keys().cloned().collect()
    }
}

impl fmt::Display for AtlasSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Atlas set with {} atlases: {}.", self.len(), self.names().join(", "))
    }
}


/// A 3D label image, i.e. a hard parcellation of a brain volume.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelImage {
    pub labels: Array3<i32>,
    pub affine: Affine,
    pub background_label: i32,
}

impl LabelImage {

    pub fn new(labels: Array3<i32>, affine: Affine) -> LabelImage {
        LabelImage { labels, affine, background_label: BACKGROUND_LABEL }
    }

    /// Build a label image from the first frame of a volume. Voxel values are rounded to the nearest integer.
    ///
    /// Fails if the volume has more than one frame, as probabilistic atlases with one map per region are not label images.
    pub fn from_volume(volume: &BrainVolume) -> Result<LabelImage> {
        if volume.num_frames() != 1 {
            return Err(ConnectomeError::ShapeMismatch(format!(
                "a label image must be 3D, but the volume has {} frames",
                volume.num_frames()
            )));
        }
        let labels = volume.frame(0).mapv(|v| v.round() as i32);
        Ok(LabelImage::new(labels, volume.affine))
    }

    /// Read a label image from a NIfTI or MGH file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<LabelImage> {
        LabelImage::from_volume(&read_volume(path)?)
    }

    pub fn shape(&self) -> [usize; 3] {
        let sh = self.labels.shape();
        [sh[0], sh[1], sh[2]]
    }

    /// The sorted, unique labels of all parcels, excluding the background label.
    ///
    /// This is the parcel order used for extracted time series columns and parcel coordinates.
    pub fn labels(&self) -> Vec<i32> {
        let mut labels: Vec<i32> = self.labels.iter().copied().filter(|l| *l != self.background_label).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    pub fn num_parcels(&self) -> usize {
        self.labels().len()
    }

    /// The number of voxels assigned to each label, in [`LabelImage::labels`] order.
    pub fn parcel_sizes(&self) -> Vec<usize> {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for l in self.labels.iter().filter(|l| **l != self.background_label) {
            *counts.entry(*l).or_insert(0) += 1;
        }
        counts.values().copied().collect()
    }

    /// Resample the labels onto another voxel grid by nearest-neighbour lookup.
    ///
    /// Every target voxel is mapped to world space with `target_affine`, and then into this image
    /// with the inverse of its affine. Target voxels outside of this image get the background label.
    pub fn resample_to(&self, target_shape: [usize; 3], target_affine: &Affine) -> Result<LabelImage> {
        let world_to_src = self.affine.inverse()?;
        let src_shape = self.shape();
        let background = self.background_label;

        let mut resampled = Array3::from_elem((target_shape[0], target_shape[1], target_shape[2]), background);
        Zip::indexed(&mut resampled).for_each(|(i, j, k), out| {
            let xyz = target_affine.apply([i as f64, j as f64, k as f64]);
            let src = world_to_src.apply(xyz);
            let mut idx = [0usize; 3];
            for dim in 0..3 {
                let r = src[dim].round();
                if r < 0. || r >= src_shape[dim] as f64 {
                    return;
                }
                idx[dim] = r as usize;
            }
            *out = self.labels[[idx[0], idx[1], idx[2]]];
        });

        Ok(LabelImage { labels: resampled, affine: *target_affine, background_label: background })
    }
}

impl fmt::Display for LabelImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Label image of shape {:?} with {} parcels.", self.shape(), self.num_parcels())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array;

    #[test]
    fn atlas_names_must_be_unique() {
        let mut set = AtlasSet::new();
        set.insert("Yeo", "/data/yeo.nii.gz").unwrap();
        let res = set.insert("Yeo", "/data/other.nii.gz");
        assert!(matches!(res, Err(ConnectomeError::DuplicateAtlasName(_))));
        assert_eq!(1, set.len());
        assert_eq!(Some(Path::new("/data/yeo.nii.gz")), set.get("Yeo"));
    }

    #[test]
    fn atlases_are_iterated_sorted_by_name() {
        let set = AtlasSet::from_pairs(vec![("b", "/b.nii"), ("c", "/c.nii"), ("a", "/a.nii")]).unwrap();
        let names: Vec<String> = set.iter().map(|a| a.name).collect();
        assert_eq!(vec!["a", "b", "c"], names);
    }

    #[test]
    fn labels_exclude_the_background_and_are_sorted() {
        let labels = Array::from_shape_vec((2, 2, 2), vec![0, 5, 5, 2, 0, 2, 9, 2]).unwrap();
        let img = LabelImage::new(labels, Affine::identity());
        assert_eq!(vec![2, 5, 9], img.labels());
        assert_eq!(3, img.num_parcels());
        assert_eq!(vec![3, 2, 1], img.parcel_sizes());
    }

    #[test]
    fn a_label_image_is_built_from_a_3d_volume_only() {
        let vol = BrainVolume::from_3d(Array3::from_elem((2, 2, 2), 2.9), Affine::identity());
        let img = LabelImage::from_volume(&vol).unwrap();
        assert_eq!(vec![3], img.labels());

        let vol4 = BrainVolume::new(ndarray::Array4::zeros((2, 2, 2, 3)), Affine::identity());
        assert!(LabelImage::from_volume(&vol4).is_err());
    }

    #[test]
    fn labels_are_resampled_to_a_coarser_grid() {
        // 4x4x4 at 1mm, left half label 1, right half label 2.
        let labels = Array3::from_shape_fn((4, 4, 4), |(i, _, _)| if i < 2 { 1 } else { 2 });
        let img = LabelImage::new(labels, Affine::identity());

        let target = Affine::from_zooms([2., 2., 2.], [0., 0., 0.]);
        let res = img.resample_to([3, 2, 2], &target).unwrap();
        assert_eq!([3, 2, 2], res.shape());
        assert_eq!(1, res.labels[[0, 0, 0]]);
        assert_eq!(2, res.labels[[1, 1, 1]]);
        // Voxel 2 is at x = 4mm, outside of the source image.
        assert_eq!(BACKGROUND_LABEL, res.labels[[2, 0, 0]]);
    }
}
