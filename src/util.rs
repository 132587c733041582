//! Utility functions used in all other neuroconnectome modules.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteordered::byteorder::ReadBytesExt;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array1;
use ndarray_stats::interpolate::Linear;
use ndarray_stats::Quantile1dExt;
use noisy_float::types::n64;

use crate::error::{ConnectomeError, Result};

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

/// Open a file for reading, transparently decompressing it if its name ends with ".gz".
pub fn open_maybe_gz<P: AsRef<Path>>(path: P) -> Result<Box<dyn Read>> {
    let gz = is_gz_file(&path);
    let file = BufReader::new(File::open(path)?);
    if gz {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Create a file for writing, GZip-compressing it if its name ends with ".gz".
pub fn create_maybe_gz<P: AsRef<Path>>(path: P) -> Result<Box<dyn Write>> {
    let gz = is_gz_file(&path);
    let file = BufWriter::new(File::create(path)?);
    if gz {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

/// Read a fixed length zero-terminated byte string of the given length from the input. Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S>(input: &mut S, len: usize) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::with_capacity(len);
    for _ in 0..len {
        let cur_char = input.read_u8()? as char;
        if cur_char != '\0' {
            info_line.push(cur_char);
        }
    }
    Ok(info_line)
}

/// Write `text` into a fixed length field of `len` bytes, truncating or zero-padding as needed.
pub fn write_fixed_length_string<S>(output: &mut S, text: &str, len: usize) -> Result<()>
where
    S: Write,
{
    let mut field = vec![0u8; len];
    for (dst, src) in field.iter_mut().zip(text.bytes()) {
        *dst = src;
    }
    output.write_all(&field)?;
    Ok(())
}

/// The `q`-th percentile (0 to 100) of the values, linearly interpolated between the closest ranks.
///
/// NaN values are ignored. Fails if no values are left.
pub fn percentile(values: &[f64], q: f64) -> Result<f64> {
    if !(0.0..=100.0).contains(&q) {
        return Err(ConnectomeError::InvalidThreshold(format!("{}%", q)));
    }
    let mut arr: Array1<_> = values.iter().filter(|v| !v.is_nan()).map(|v| n64(*v)).collect();
    let value = arr
        .quantile_mut(n64(q / 100.0), &Linear)
        .map_err(|_| ConnectomeError::EmptyInput(String::from("no values to compute a percentile of")))?;
    Ok(value.raw())
}

/// Upper bound for buffers pre-allocated from sizes stored in file headers.
const MAX_PREALLOCATED_VALUES: usize = 1 << 24;

/// The number of values in an array with the given dimensions, or `None` if it overflows `usize`.
pub fn checked_num_values(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))
}

/// An empty buffer for `num_values` values read from a file. The capacity is capped, so corrupt sizes cannot exhaust memory.
pub fn value_buffer<T>(num_values: usize) -> Vec<T> {
    Vec::with_capacity(num_values.min(MAX_PREALLOCATED_VALUES))
}

/// Turn a display name into something usable as a file name, e.g. "Yeo Atlas 17" becomes "yeo_atlas_17".
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
