//! Functions for reading confound tables: nuisance regressors with one row per fMRI timepoint.
//!
//! The tables are plain text with a header line naming the regressors, separated by tabs
//! or commas. The delimiter is detected from the header line.

use csv::ReaderBuilder;
use ndarray::Array2;

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{ConnectomeError, Result};


/// A table of nuisance regressors, like motion parameters or white matter signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Confounds {
    pub names: Vec<String>,
    /// Shape (timepoints, regressors).
    pub values: Array2<f64>,
}

impl Confounds {

    pub fn num_timepoints(&self) -> usize {
        self.values.nrows()
    }

    pub fn num_regressors(&self) -> usize {
        self.values.ncols()
    }

    /// Parse a confound table from text.
    pub fn from_text(text: &str) -> Result<Confounds> {
        let header_line = text.lines().find(|l| !l.trim().is_empty() && !l.starts_with('#')).unwrap_or("");
        let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(text.as_bytes());

        let names: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        if names.is_empty() || names.iter().all(|n| n.is_empty()) {
            return Err(ConnectomeError::InvalidConfounds(String::from("missing header line")));
        }

        let mut flat: Vec<f64> = Vec::new();
        let mut num_rows = 0;
        for result in rdr.records() {
            let record = result?;
            for (col, field) in record.iter().enumerate() {
                let value: f64 = field.parse().map_err(|_| {
                    ConnectomeError::InvalidConfounds(format!(
                        "value '{}' in row {}, column '{}' is not a number",
                        field, num_rows + 1, names[col]
                    ))
                })?;
                flat.push(value);
            }
            num_rows += 1;
        }

        let values = Array2::from_shape_vec((num_rows, names.len()), flat)
            .map_err(|e| ConnectomeError::InvalidConfounds(e.to_string()))?;
        Ok(Confounds { names, values })
    }

    /// Read a confound table from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Confounds> {
        let text = fs::read_to_string(path)?;
        Confounds::from_text(&text)
    }
}

impl fmt::Display for Confounds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Confounds table with {} regressors for {} timepoints.", self.num_regressors(), self.num_timepoints())
    }
}


/// Read a confound table from a tab- or comma-separated file.
///
/// # Examples
///
/// ```no_run
/// let confounds = neuroconnectome::read_confounds("/path/to/0010042_regressors.csv").unwrap();
/// println!("{}", confounds);
/// ```
pub fn read_confounds<P: AsRef<Path>>(path: P) -> Result<Confounds> {
    Confounds::from_file(path)
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tab_separated_tables_are_parsed() {
        let text = "motion-pitch\tmotion-roll\twm\n0.1\t0.2\t100\n0.3\t0.4\t101\n0.5\t0.6\t99\n";
        let conf = Confounds::from_text(text).unwrap();
        assert_eq!(vec!["motion-pitch", "motion-roll", "wm"], conf.names);
        assert_eq!(3, conf.num_timepoints());
        assert_eq!(3, conf.num_regressors());
        assert_eq!(101.0, conf.values[[1, 2]]);
    }

    #[test]
    fn comma_separated_tables_are_parsed() {
        let text = "a,b\n1,2\n3,4\n";
        let conf = Confounds::from_text(text).unwrap();
        assert_eq!(2, conf.num_timepoints());
        assert_eq!(4.0, conf.values[[1, 1]]);
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let text = "a,b\n1,2\n3,n/a\n";
        let res = Confounds::from_text(text);
        assert!(matches!(res, Err(ConnectomeError::InvalidConfounds(_))));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let text = "a,b\n1,2\n3\n";
        assert!(Confounds::from_text(text).is_err());
    }
}
