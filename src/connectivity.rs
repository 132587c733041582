//! Functional connectivity: pooling of subject time series and region-by-region correlation.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use ndarray_stats::CorrelationExt;

use crate::error::{ConnectomeError, Result};

/// Stack per-subject time series matrices of shape (timepoints, parcels) along the time axis.
///
/// All matrices must have the same number of parcels. Subjects with differing numbers of
/// timepoints are stacked as they are, nothing is truncated or aligned.
pub fn concatenate_time_series(subject_series: &[Array2<f64>]) -> Result<Array2<f64>> {
    let first = subject_series
        .first()
        .ok_or_else(|| ConnectomeError::EmptyInput(String::from("no subject time series to concatenate")))?;
    let num_parcels = first.ncols();
    if let Some(bad) = subject_series.iter().position(|ts| ts.ncols() != num_parcels) {
        return Err(ConnectomeError::ShapeMismatch(format!(
            "subject {} has {} parcels, but subject 0 has {}",
            bad,
            subject_series[bad].ncols(),
            num_parcels
        )));
    }
    let views: Vec<ArrayView2<f64>> = subject_series.iter().map(|ts| ts.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| ConnectomeError::ShapeMismatch(e.to_string()))
}

/// Compute the Pearson correlation matrix of the parcel columns of `time_series` (timepoints, parcels).
///
/// The result is a symmetric (parcels, parcels) matrix with values in [-1, 1] and ones on the diagonal.
/// Correlations involving a parcel with constant signal are undefined, they are reported as 0.
///
/// Note that when the time series of several subjects were concatenated before, within-subject and
/// between-subject variance are mixed in the result.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// let ts = array![[1., 2.], [2., 4.], [3., 7.]];
/// let corr = neuroconnectome::correlation_matrix(&ts).unwrap();
/// assert_eq!(1.0, corr[[0, 0]]);
/// assert!(corr[[0, 1]] > 0.9);
/// ```
pub fn correlation_matrix(time_series: &Array2<f64>) -> Result<Array2<f64>> {
    if time_series.nrows() < 2 {
        return Err(ConnectomeError::EmptyInput(format!(
            "at least 2 timepoints are needed to compute correlations, got {}",
            time_series.nrows()
        )));
    }
    if time_series.ncols() == 0 {
        return Err(ConnectomeError::EmptyInput(String::from("time series without parcels")));
    }

    // Variables are rows for ndarray-stats, so the parcels go into the rows.
    let raw = time_series
        .t()
        .pearson_correlation()
        .map_err(|_| ConnectomeError::EmptyInput(String::from("time series without observations")))?;

    let n = raw.nrows();
    let mut corr = Array2::zeros((n, n));
    for i in 0..n {
        corr[[i, i]] = 1.0;
        for j in 0..i {
            let r = 0.5 * (raw[[i, j]] + raw[[j, i]]);
            let r = if r.is_finite() { r.max(-1.0).min(1.0) } else { 0.0 };
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    Ok(corr)
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn concatenation_stacks_timepoints() {
        let s1 = Array2::<f64>::zeros((5, 3));
        let s2 = Array2::<f64>::ones((7, 3));
        let ts = concatenate_time_series(&[s1, s2]).unwrap();
        assert_eq!(&[12, 3], ts.shape());
        assert_eq!(0.0, ts[[4, 2]]);
        assert_eq!(1.0, ts[[5, 0]]);
    }

    #[test]
    fn concatenation_requires_equal_parcel_counts() {
        let res = concatenate_time_series(&[Array2::zeros((5, 3)), Array2::zeros((5, 4))]);
        assert!(matches!(res, Err(ConnectomeError::ShapeMismatch(_))));
        assert!(matches!(concatenate_time_series(&[]), Err(ConnectomeError::EmptyInput(_))));
    }

    #[test]
    fn the_correlation_matrix_is_symmetric_with_unit_diagonal() {
        let ts = Array::from_shape_fn((50, 4), |(t, p)| ((t * (p + 1)) as f64 * 0.37).sin() + (t % (p + 2)) as f64);
        let corr = correlation_matrix(&ts).unwrap();
        assert_eq!(&[4, 4], corr.shape());
        for i in 0..4 {
            assert_eq!(1.0, corr[[i, i]]);
            for j in 0..4 {
                assert_eq!(corr[[i, j]], corr[[j, i]]);
                assert!(corr[[i, j]] >= -1.0 && corr[[i, j]] <= 1.0);
            }
        }
    }

    #[test]
    fn known_correlations_are_reproduced() {
        let ts = array![[1., 4., 1.], [2., 3., 5.], [3., 2., 2.], [4., 1., 3.]];
        let corr = correlation_matrix(&ts).unwrap();
        assert_abs_diff_eq!(-1.0, corr[[0, 1]], epsilon = 1e-12);
        // r(x, z) for x = 1..4 and z = (1, 5, 2, 3): sum of products of deviations is 1.5,
        // sums of squared deviations are 5 and 8.75.
        let expected = 1.5 / (5.0f64 * 8.75).sqrt();
        assert_abs_diff_eq!(expected, corr[[0, 2]], epsilon = 1e-12);
    }

    #[test]
    fn constant_parcels_have_zero_correlation() {
        let ts = array![[1., 0.], [2., 0.], [3., 0.]];
        let corr = correlation_matrix(&ts).unwrap();
        assert_eq!(0.0, corr[[0, 1]]);
        assert_eq!(1.0, corr[[1, 1]]);
    }

    #[test]
    fn a_single_timepoint_is_rejected() {
        let ts = array![[1., 2., 3.]];
        assert!(correlation_matrix(&ts).is_err());
    }
}
