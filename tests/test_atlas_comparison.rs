use approx::assert_abs_diff_eq;
use ndarray::{Array3, Array4};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use neuroconnectome::{
    compare_atlases, plot_connectomes, read_volume, write_nifti, Affine, AtlasSet, BrainVolume, Config, DiskMemory,
    EdgeThreshold, FigureQueue, FunctionalDataset,
};

/// A 6x2x2 label atlas with 3 parcels made of two x-slabs each.
fn write_atlas(path: &Path, labels: [f32; 3]) {
    let data = Array3::from_shape_fn((6, 2, 2), |(i, _, _)| labels[i / 2]);
    write_nifti(path, &BrainVolume::from_3d(data, Affine::from_zooms([2., 2., 2.], [-6., -2., -2.]))).unwrap();
}

/// A functional image with 5 timepoints on the atlas grid, plus a confounds table.
fn write_subject(dir: &Path, idx: usize) -> (PathBuf, PathBuf) {
    let func = dir.join(format!("sub{}_func.nii.gz", idx));
    let data = Array4::from_shape_fn((6, 2, 2, 5), |(i, j, k, t)| {
        let region = (i / 2) as f32;
        ((t as f32 + 1.) * (region + 1.) * 0.7 + idx as f32).sin() + 0.01 * (j + k) as f32
    });
    write_nifti(&func, &BrainVolume::new(data, Affine::from_zooms([2., 2., 2.], [-6., -2., -2.]))).unwrap();

    let confounds = dir.join(format!("sub{}_regressors.csv", idx));
    fs::write(&confounds, "csf\twm\n0.1\t1.0\n0.3\t0.0\n0.2\t1.0\n0.5\t0.0\n0.4\t1.0\n").unwrap();
    (func, confounds)
}

#[test]
fn two_atlases_give_two_titled_connectome_figures() {
    let dir = tempdir().unwrap();
    let mut atlases = AtlasSet::new();
    write_atlas(&dir.path().join("b.nii"), [1., 2., 3.]);
    write_atlas(&dir.path().join("a.nii.gz"), [10., 30., 20.]);
    atlases.insert("Second atlas", dir.path().join("b.nii")).unwrap();
    atlases.insert("First atlas", dir.path().join("a.nii.gz")).unwrap();
    assert!(atlases.insert("First atlas", dir.path().join("b.nii")).is_err());

    let (func0, conf0) = write_subject(dir.path(), 0);
    let (func1, conf1) = write_subject(dir.path(), 1);
    let dataset = FunctionalDataset::new(vec![func0, func1], vec![conf0, conf1]).unwrap();

    let config = Config { output_dir: dir.path().join("figures"), ..Config::default() };
    let memory = DiskMemory::new(dir.path().join("cache"));
    let connectomes = compare_atlases(&atlases, &dataset, &config, &memory).unwrap();

    assert_eq!(2, connectomes.len());
    assert_eq!("First atlas", connectomes[0].name);
    assert_eq!(vec![10, 20, 30], connectomes[0].labels);
    for connectome in connectomes.iter() {
        assert_eq!(&[10, 3], connectome.time_series.shape());
        assert_eq!(&[3, 3], connectome.correlation.shape());
        assert_eq!(3, connectome.coords.len());
        for i in 0..3 {
            assert_eq!(1.0, connectome.correlation[[i, i]]);
            for j in 0..3 {
                assert_abs_diff_eq!(connectome.correlation[[i, j]], connectome.correlation[[j, i]], epsilon = 1e-12);
            }
        }
    }
    // Both atlases cover the same regions, only the label order differs.
    assert_abs_diff_eq!(connectomes[0].correlation[[1, 2]], connectomes[1].correlation[[1, 2]], epsilon = 1e-9);
    // Parcel 1 of the second atlas spans voxels x = 0, 1, i.e. world x = -6 and -4.
    assert_abs_diff_eq!(-5.0, connectomes[1].coords[0][0], epsilon = 1e-9);

    let mut queue = FigureQueue::new();
    plot_connectomes(&connectomes, &config.edge_threshold().unwrap(), &mut queue).unwrap();
    let paths = queue.show(&config.output_dir).unwrap();
    assert_eq!(2, paths.len());
    assert!(paths[0].ends_with("01_first_atlas.svg"));
    assert!(fs::read_to_string(&paths[1]).unwrap().contains("Second atlas"));

    // The second run is served from the cache.
    let entries = fs::read_dir(dir.path().join("cache")).unwrap().count();
    assert_eq!(4, entries);
    let again = compare_atlases(&atlases, &dataset, &config, &memory).unwrap();
    assert_eq!(connectomes, again);
}

#[test]
fn the_demo_threshold_keeps_the_strongest_edges() {
    let threshold = EdgeThreshold::parse("80%").unwrap();
    assert_eq!(EdgeThreshold::Percentile(80.), threshold);
}

#[test]
fn written_volumes_can_be_read_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("atlas.nii.gz");
    write_atlas(&path, [1., 2., 3.]);
    let vol = read_volume(&path).unwrap();
    assert_eq!([6, 2, 2], vol.spatial_shape());
    assert!(vol.affine.approx_eq(&Affine::from_zooms([2., 2., 2.], [-6., -2., -2.]), 1e-6));
}
