//! Representative world coordinates for atlas parcels, used to place connectome nodes.

use log::debug;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, VecDeque};

use crate::atlas::LabelImage;
use crate::error::{ConnectomeError, Result};
use crate::util::percentile;
use crate::volume::BrainVolume;

/// Percentile of the non-zero absolute map values above which voxels count as part of a probabilistic region.
pub const PROBABILISTIC_MAP_PERCENTILE: f64 = 80.0;

/// Which side of the brain to prefer for parcels that are present in both hemispheres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    Left,
    Right,
}

impl Default for Hemisphere {
    fn default() -> Hemisphere {
        Hemisphere::Left
    }
}

type Voxel = [usize; 3];

/// Find one world coordinate per parcel of a label atlas, in the order of [`LabelImage::labels`].
///
/// Voxels with world coordinate x < 0 belong to the left hemisphere, all others to the right one,
/// whatever the orientation of the voxel axes. If a parcel has voxels on the preferred side, only
/// those are considered. Of the remaining voxels, the largest 6-connected component is taken and
/// its centre of mass is mapped to world space.
///
/// # Examples
///
/// ```no_run
/// use neuroconnectome::{find_parcellation_cut_coords, Hemisphere, LabelImage};
/// let atlas = LabelImage::from_file("/path/to/atlas.nii.gz").unwrap();
/// let coords = find_parcellation_cut_coords(&atlas, Hemisphere::Left).unwrap();
/// assert_eq!(coords.len(), atlas.num_parcels());
/// ```
pub fn find_parcellation_cut_coords(img: &LabelImage, hemisphere: Hemisphere) -> Result<Vec<[f64; 3]>> {
    let mut parcel_voxels: BTreeMap<i32, Vec<Voxel>> = BTreeMap::new();
    for ((i, j, k), label) in img.labels.indexed_iter() {
        if *label != img.background_label {
            parcel_voxels.entry(*label).or_insert_with(Vec::new).push([i, j, k]);
        }
    }

    let mut coords: Vec<[f64; 3]> = Vec::with_capacity(parcel_voxels.len());
    for (label, voxels) in parcel_voxels.iter() {
        let preferred: Vec<Voxel> = voxels
            .iter()
            .copied()
            .filter(|v| {
                let x = img.affine.apply([v[0] as f64, v[1] as f64, v[2] as f64])[0];
                match hemisphere {
                    Hemisphere::Left => x < 0.,
                    Hemisphere::Right => x >= 0.,
                }
            })
            .collect();
        let candidates = if preferred.is_empty() { voxels.clone() } else { preferred };
        let component = largest_component(&candidates);
        let com = centre_of_mass(&component, |_| 1.0);
        debug!("Parcel {} with {} voxels has its centre at voxel {:?}.", label, voxels.len(), com);
        coords.push(img.affine.apply(com));
    }
    Ok(coords)
}

/// Find one world coordinate per map of a probabilistic atlas, i.e. a 4D volume with one 3D map per region.
///
/// Every map is thresholded at the 80th percentile of its non-zero absolute values. The centre of mass of the
/// largest connected component above the threshold, weighted by the absolute map values, is used.
pub fn find_probabilistic_atlas_cut_coords(maps: &BrainVolume) -> Result<Vec<[f64; 3]>> {
    let mut coords: Vec<[f64; 3]> = Vec::with_capacity(maps.num_frames());
    for frame in 0..maps.num_frames() {
        let map = maps.frame(frame).mapv(|v| (v as f64).abs());
        let non_zero: Vec<f64> = map.iter().copied().filter(|v| *v > 0.).collect();
        if non_zero.is_empty() {
            return Err(ConnectomeError::EmptyInput(format!("probabilistic map {} contains only zeros", frame)));
        }
        let threshold = percentile(&non_zero, PROBABILISTIC_MAP_PERCENTILE)?;
        let above: Vec<Voxel> = map
            .indexed_iter()
            .filter(|(_, v)| **v >= threshold && **v > 0.)
            .map(|((i, j, k), _)| [i, j, k])
            .collect();
        let component = largest_component(&above);
        let com = centre_of_mass(&component, |v| map[[v[0], v[1], v[2]]]);
        coords.push(maps.affine.apply(com));
    }
    Ok(coords)
}

/// Find the largest 6-connected component of a set of voxels. On ties, the component found first in
/// scan order wins.
fn largest_component(voxels: &[Voxel]) -> Vec<Voxel> {
    if voxels.is_empty() {
        return Vec::new();
    }
    // Work in the bounding box only, atlases are large and parcels small.
    let mut lo = [usize::MAX; 3];
    let mut hi = [0usize; 3];
    for v in voxels {
        for d in 0..3 {
            lo[d] = lo[d].min(v[d]);
            hi[d] = hi[d].max(v[d]);
        }
    }
    let shape = (hi[0] - lo[0] + 1, hi[1] - lo[1] + 1, hi[2] - lo[2] + 1);
    let mut unvisited: Array3<bool> = Array3::from_elem(shape, false);
    let mut sorted: Vec<Voxel> = voxels.iter().map(|v| [v[0] - lo[0], v[1] - lo[1], v[2] - lo[2]]).collect();
    sorted.sort_unstable();
    for v in sorted.iter() {
        unvisited[[v[0], v[1], v[2]]] = true;
    }

    let mut best: Vec<Voxel> = Vec::new();
    let mut queue: VecDeque<Voxel> = VecDeque::new();
    for seed in sorted.iter() {
        if !unvisited[[seed[0], seed[1], seed[2]]] {
            continue;
        }
        unvisited[[seed[0], seed[1], seed[2]]] = false;
        queue.push_back(*seed);
        let mut component: Vec<Voxel> = Vec::new();
        while let Some(v) = queue.pop_front() {
            component.push(v);
            for n in neighbours(v, [shape.0, shape.1, shape.2]) {
                if unvisited[[n[0], n[1], n[2]]] {
                    unvisited[[n[0], n[1], n[2]]] = false;
                    queue.push_back(n);
                }
            }
        }
        if component.len() > best.len() {
            best = component;
        }
    }
    best.iter().map(|v| [v[0] + lo[0], v[1] + lo[1], v[2] + lo[2]]).collect()
}

/// The face neighbours of a voxel that lie inside a grid of the given shape.
fn neighbours(v: Voxel, shape: [usize; 3]) -> Vec<Voxel> {
    let mut result = Vec::with_capacity(6);
    for d in 0..3 {
        if v[d] > 0 {
            let mut n = v;
            n[d] -= 1;
            result.push(n);
        }
        if v[d] + 1 < shape[d] {
            let mut n = v;
            n[d] += 1;
            result.push(n);
        }
    }
    result
}

/// Weighted mean voxel index.
fn centre_of_mass<F>(voxels: &[Voxel], weight: F) -> [f64; 3]
where
    F: Fn(&Voxel) -> f64,
{
    let mut sum = [0.; 3];
    let mut total = 0.;
    for v in voxels {
        let w = weight(v);
        for d in 0..3 {
            sum[d] += w * v[d] as f64;
        }
        total += w;
    }
    if total <= 0. {
        return sum;
    }
    [sum[0] / total, sum[1] / total, sum[2] / total]
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::volume::Affine;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    #[test]
    fn the_largest_component_is_used() {
        // Label 1: a 3-voxel bar and an isolated voxel. Label 2: a single voxel.
        let mut labels = Array3::zeros((6, 3, 3));
        labels[[0, 0, 0]] = 1;
        labels[[1, 0, 0]] = 1;
        labels[[2, 0, 0]] = 1;
        labels[[5, 2, 2]] = 1;
        labels[[4, 1, 1]] = 2;
        let img = LabelImage::new(labels, Affine::identity());

        let coords = find_parcellation_cut_coords(&img, Hemisphere::Left).unwrap();
        assert_eq!(2, coords.len());
        assert_eq!([1., 0., 0.], coords[0]);
        assert_eq!([4., 1., 1.], coords[1]);
    }

    #[test]
    fn the_preferred_hemisphere_is_used_for_bilateral_parcels() {
        // World x = 0 is at voxel 5. Label 1 has a big blob on the right and a small one on the left.
        let mut labels = Array3::zeros((10, 1, 1));
        labels[[1, 0, 0]] = 1;
        for i in 6..10 {
            labels[[i, 0, 0]] = 1;
        }
        let img = LabelImage::new(labels, Affine::from_zooms([2., 2., 2.], [-10., 0., 0.]));

        let left = find_parcellation_cut_coords(&img, Hemisphere::Left).unwrap();
        assert_eq!([-8., 0., 0.], left[0]);
        let right = find_parcellation_cut_coords(&img, Hemisphere::Right).unwrap();
        assert_eq!([5., 0., 0.], right[0]);
    }

    #[test]
    fn hemispheres_follow_world_coordinates_for_flipped_x_axes() {
        // x = -2 * i + 10: voxel 1 is at x = 8 (right), voxel 8 at x = -6 (left).
        let mut labels = Array3::zeros((10, 1, 1));
        labels[[1, 0, 0]] = 1;
        labels[[8, 0, 0]] = 1;
        let img = LabelImage::new(labels, Affine::from_zooms([-2., 2., 2.], [10., 0., 0.]));

        let left = find_parcellation_cut_coords(&img, Hemisphere::Left).unwrap();
        assert_eq!([-6., 0., 0.], left[0]);
        let right = find_parcellation_cut_coords(&img, Hemisphere::Right).unwrap();
        assert_eq!([8., 0., 0.], right[0]);
    }

    #[test]
    fn hemispheres_follow_world_coordinates_for_lia_volumes() {
        // FreeSurfer conformed orientation: i runs to the left, j to inferior, k to anterior.
        let lia = Affine([
            [-1., 0., 0., 4.],
            [0., 0., 1., -3.],
            [0., -1., 0., 5.],
            [0., 0., 0., 1.],
        ]);
        let mut labels = Array3::zeros((8, 2, 2));
        // A 2-voxel blob at x = 3 and x = 2, and a single voxel at x = -2.
        labels[[1, 0, 1]] = 5;
        labels[[2, 0, 1]] = 5;
        labels[[6, 1, 0]] = 5;
        let img = LabelImage::new(labels, lia);

        let left = find_parcellation_cut_coords(&img, Hemisphere::Left).unwrap();
        assert_eq!(1, left.len());
        assert_eq!([-2., -3., 4.], left[0]);
        let right = find_parcellation_cut_coords(&img, Hemisphere::Right).unwrap();
        assert_eq!([2.5, -2., 5.], right[0]);
    }

    #[test]
    fn hemisphere_names_are_lowercase_in_settings() {
        assert_eq!("\"right\"", serde_json::to_string(&Hemisphere::Right).unwrap());
        let h: Hemisphere = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(Hemisphere::Left, h);
    }

    #[test]
    fn coordinates_follow_the_label_order() {
        let mut labels = Array3::zeros((3, 1, 1));
        labels[[0, 0, 0]] = 9;
        labels[[1, 0, 0]] = 4;
        labels[[2, 0, 0]] = 6;
        let img = LabelImage::new(labels, Affine::identity());
        let coords = find_parcellation_cut_coords(&img, Hemisphere::default()).unwrap();
        assert_eq!(img.labels(), vec![4, 6, 9]);
        assert_eq!(vec![[1., 0., 0.], [2., 0., 0.], [0., 0., 0.]], coords);
    }

    #[test]
    fn probabilistic_maps_are_located_at_their_peak_blob() {
        let mut data = Array4::zeros((5, 5, 1, 2));
        // Map 0: a few weak voxels and a strong 2-voxel blob. The threshold is 2.0.
        for (i, j) in [(0, 0), (0, 1), (1, 0), (0, 2)].iter() {
            data[[*i, *j, 0, 0]] = 0.1;
        }
        data[[3, 3, 0, 0]] = 2.0;
        data[[3, 4, 0, 0]] = 3.0;
        // Map 1: a single voxel.
        data[[1, 2, 0, 1]] = 0.5;
        let maps = BrainVolume::new(data, Affine::identity());

        let coords = find_probabilistic_atlas_cut_coords(&maps).unwrap();
        assert_eq!(2, coords.len());
        assert_abs_diff_eq!(3.0, coords[0][0], epsilon = 1e-12);
        assert_abs_diff_eq!(3.6, coords[0][1], epsilon = 1e-12);
        assert_eq!([1., 2., 0.], coords[1]);
    }

    #[test]
    fn empty_probabilistic_maps_are_rejected() {
        let maps = BrainVolume::new(Array4::zeros((2, 2, 2, 1)), Affine::identity());
        assert!(find_probabilistic_atlas_cut_coords(&maps).is_err());
    }
}
