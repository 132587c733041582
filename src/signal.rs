//! Cleaning of extracted time series: nuisance regression and standardization.
//!
//! All functions work on matrices of shape (timepoints, signals), i.e. one column per region.

use log::{debug, warn};
use ndarray::{Array1, Array2};

use crate::error::{ConnectomeError, Result};

/// Standard deviations below this are treated as zero.
const STD_EPS: f64 = f64::EPSILON;

/// Relative norm below which a confound is considered linearly dependent on the previous ones.
const RANK_TOL: f64 = 1e-10;

/// Z-score every column in place: subtract the mean and divide by the population standard deviation.
///
/// Columns with (near) zero variance are only centred. A single timepoint carries no variance
/// information, so such input is left untouched.
pub fn standardize(signals: &mut Array2<f64>) {
    if signals.nrows() < 2 {
        warn!("Standardization of a signal with {} timepoints requested, skipping.", signals.nrows());
        return;
    }
    for mut col in signals.columns_mut() {
        let mean = col.mean().unwrap_or(0.);
        col.mapv_inplace(|v| v - mean);
        let std = col.std(0.);
        if std > STD_EPS {
            col.mapv_inplace(|v| v / std);
        }
    }
}

/// Compute an orthonormal basis of the column space of `confounds` with modified Gram-Schmidt.
///
/// The confounds are z-scored first. Constant and linearly dependent columns do not contribute
/// a basis vector, so the result has at most as many columns as the input.
pub fn orthonormal_confound_basis(confounds: &Array2<f64>) -> Array2<f64> {
    let mut conf = confounds.clone();
    standardize(&mut conf);

    let mut basis: Vec<Array1<f64>> = Vec::with_capacity(conf.ncols());
    for col in conf.columns() {
        let mut v = col.to_owned();
        let orig_norm = v.dot(&v).sqrt();
        if orig_norm <= STD_EPS {
            continue;
        }
        // Two passes for numerical stability.
        for _ in 0..2 {
            for q in basis.iter() {
                let proj = q.dot(&v);
                v.scaled_add(-proj, q);
            }
        }
        let norm = v.dot(&v).sqrt();
        if norm <= RANK_TOL * orig_norm {
            continue;
        }
        v.mapv_inplace(|x| x / norm);
        basis.push(v);
    }

    let mut q = Array2::zeros((conf.nrows(), basis.len()));
    for (idx, v) in basis.into_iter().enumerate() {
        q.column_mut(idx).assign(&v);
    }
    q
}

/// Project the confounds out of the signals, in place.
///
/// Fails if the number of timepoints (rows) differs between signals and confounds.
pub fn regress_out(signals: &mut Array2<f64>, confounds: &Array2<f64>) -> Result<()> {
    if signals.nrows() != confounds.nrows() {
        return Err(ConnectomeError::ShapeMismatch(format!(
            "signals have {} timepoints, but confounds have {}",
            signals.nrows(),
            confounds.nrows()
        )));
    }
    let q = orthonormal_confound_basis(confounds);
    debug!("Regressing out {} confound components from {} signals.", q.ncols(), signals.ncols());
    if q.ncols() == 0 {
        return Ok(());
    }
    let coefs = q.t().dot(signals);
    *signals -= &q.dot(&coefs);
    Ok(())
}

/// Clean extracted signals: remove the confounds (if any), then optionally standardize.
pub fn clean(mut signals: Array2<f64>, confounds: Option<&Array2<f64>>, do_standardize: bool) -> Result<Array2<f64>> {
    if let Some(conf) = confounds {
        regress_out(&mut signals, conf)?;
    }
    if do_standardize {
        standardize(&mut signals);
    }
    Ok(signals)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Axis};

    #[test]
    fn standardized_columns_have_zero_mean_and_unit_variance() {
        let mut sig = array![[1., 10.], [2., 20.], [3., 35.], [4., 41.]];
        standardize(&mut sig);
        for col in sig.columns() {
            assert_abs_diff_eq!(0.0, col.mean().unwrap(), epsilon = 1e-12);
            assert_abs_diff_eq!(1.0, col.std(0.), epsilon = 1e-12);
        }
    }

    #[test]
    fn constant_columns_are_only_centred() {
        let mut sig = array![[3., 1.], [3., 2.], [3., 3.]];
        standardize(&mut sig);
        assert_eq!(array![0., 0., 0.], sig.column(0));
    }

    #[test]
    fn a_single_timepoint_is_not_standardized() {
        let mut sig = array![[3., 1.]];
        standardize(&mut sig);
        assert_eq!(array![[3., 1.]], sig);
    }

    #[test]
    fn the_confound_basis_is_orthonormal_and_drops_dependent_columns() {
        let conf = array![
            [1., 2., 1., 4.],
            [1., 0., 3., 0.],
            [1., 5., 2., 10.],
            [1., 1., 7., 2.],
            [1., 3., 1., 6.]
        ];
        // Column 0 is constant, column 3 is 2 * column 1.
        let q = orthonormal_confound_basis(&conf);
        assert_eq!(2, q.ncols());
        let gram = q.t().dot(&q);
        assert_abs_diff_eq!(gram, Array::eye(2), epsilon = 1e-10);
    }

    #[test]
    fn a_linear_combination_of_confounds_is_removed_completely() {
        let t = 20;
        let c1 = Array::from_shape_fn(t, |i| (i as f64 * 0.7).sin());
        let c2 = Array::from_shape_fn(t, |i| (i as f64 * 0.3).cos());
        let mut conf = Array2::zeros((t, 2));
        conf.column_mut(0).assign(&c1);
        conf.column_mut(1).assign(&c2);

        let mut sig = Array2::zeros((t, 1));
        sig.column_mut(0).assign(&(&c1 * 3.0 - &c2 * 2.0));
        // Remove the mean, the z-scored confounds do not model an intercept.
        let mean = sig.mean().unwrap();
        sig.mapv_inplace(|v| v - mean);

        regress_out(&mut sig, &conf).unwrap();
        for v in sig.iter() {
            assert_abs_diff_eq!(0.0, *v, epsilon = 1e-10);
        }
    }

    #[test]
    fn confounds_with_the_wrong_length_are_rejected() {
        let mut sig = Array2::zeros((5, 2));
        let conf = Array2::zeros((4, 1));
        assert!(matches!(regress_out(&mut sig, &conf), Err(ConnectomeError::ShapeMismatch(_))));
    }

    #[test]
    fn clean_standardizes_after_regression() {
        let sig = Array::from_shape_fn((10, 3), |(i, j)| ((i * (j + 1)) as f64).sqrt());
        let conf = Array::from_shape_fn((10, 1), |(i, _)| i as f64);
        let cleaned = clean(sig, Some(&conf), true).unwrap();
        for m in cleaned.mean_axis(Axis(0)).unwrap().iter() {
            assert_abs_diff_eq!(0.0, *m, epsilon = 1e-10);
        }
    }
}
