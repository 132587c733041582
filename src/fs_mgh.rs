//! Functions for reading FreeSurfer brain volumes in binary 'MGH' files.
//!
//! Atlases in FreeSurfer space (like `aparc+aseg.mgz`) ship in this format. MGZ files are
//! the GZip-compressed variant.


use byteordered::ByteOrdered;
use ndarray::{Array4, ShapeBuilder};

use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{ConnectomeError, Result};
use crate::util::{checked_num_values, open_maybe_gz, value_buffer};
use crate::volume::{Affine, BrainVolume};

pub const MGH_VERSION: i32 = 1;

pub const MGH_DATATYPE_NAMES : [&str; 4] = ["MRI_UCHAR", "MRI_INT", "MRI_FLOAT", "MRI_SHORT"];
pub const MGH_DATATYPE_CODES : [i32; 4] = [0, 1, 3, 4];
pub const MGH_DATA_START : usize = 284; // The index in bytes where the data part starts in an MGH file.
const MGH_HEADER_FIELDS_SIZE : usize = 90; // Bytes used by the header fields, the rest up to MGH_DATA_START is padding.

/// Models the header of a FreeSurfer MGH file containing a brain volume.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMghHeader {
    pub mgh_format_version: i32,
    pub dim1len: i32,
    pub dim2len: i32,
    pub dim3len: i32,
    pub dim4len: i32,  // aka "num_frames"
    pub dtype: i32,
    pub dof: i32,
    pub is_ras_good: i16,
    pub delta: [f32; 3],
    pub mdc_raw: [f32; 9],
    pub p_xyz_c: [f32; 3],
}


/// Models a FreeSurfer MGH file. The voxel data is converted to `f32`, whatever the `dtype` in the header.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMgh {
    pub header: FsMghHeader,
    pub data: Array4<f32>,
}


impl Default for FsMghHeader {
    fn default() -> FsMghHeader {
        FsMghHeader {
            mgh_format_version: MGH_VERSION,
            dim1len: 0,
            dim2len: 0,
            dim3len: 0,
            dim4len: 0,
            dtype: 1,
            dof: 0,
            is_ras_good: 0,
            delta: [1.; 3],
            mdc_raw: [-1., 0., 0., 0., 0., -1., 0., 1., 0.], // FreeSurfer's LIA orientation.
            p_xyz_c: [0.; 3],
        }
    }
}

/// The header of an MGH/MGZ file.
impl FsMghHeader {

    /// Read an MGH header from a file. MGZ files are decompressed on the fly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMghHeader> {
        let mut input = open_maybe_gz(path)?;
        FsMghHeader::from_reader(&mut input)
    }


    /// Read an MGH header from the given byte stream.
    /// It is assumed that the input is currently at the start of the
    /// header. The header fields are consumed, but not the padding up to the data start.
    pub fn from_reader<S>(input: &mut S) -> Result<FsMghHeader>
    where
        S: Read,
    {
        let mut hdr = FsMghHeader::default();

        let mut input = ByteOrdered::be(input);

        hdr.mgh_format_version = input.read_i32()?;

        if hdr.mgh_format_version != MGH_VERSION {
            return Err(ConnectomeError::InvalidFsMghFormat);
        }

        hdr.dim1len = input.read_i32()?;
        hdr.dim2len = input.read_i32()?;
        hdr.dim3len = input.read_i32()?;
        hdr.dim4len = input.read_i32()?;

        hdr.dtype = input.read_i32()?;
        hdr.dof = input.read_i32()?;

        hdr.is_ras_good = input.read_i16()?;

        // The RAS fields are always present on disk, but only meaningful if is_ras_good is set.
        let mut delta = [0f32; 3];
        let mut mdc_raw = [0f32; 9];
        let mut p_xyz_c = [0f32; 3];
        for idx in 0..3 { delta[idx] = input.read_f32()?; }
        for idx in 0..9 { mdc_raw[idx] = input.read_f32()?; }
        for idx in 0..3 { p_xyz_c[idx] = input.read_f32()?; }

        if hdr.is_ras_good == 1 as i16 {
            hdr.delta = delta;
            hdr.mdc_raw = mdc_raw;
            hdr.p_xyz_c = p_xyz_c;
        }
        Ok(hdr)
    }

    pub fn dims(&self) -> Result<[usize; 4]> {
        let dims = [self.dim1len, self.dim2len, self.dim3len, self.dim4len];
        if dims.iter().any(|d| *d < 1) {
            return Err(ConnectomeError::InvalidFsMghFormat);
        }
        Ok([dims[0] as usize, dims[1] as usize, dims[2] as usize, dims[3] as usize])
    }

    /// Compute the vox2ras matrix from the direction cosines, voxel sizes and the center RAS coordinate.
    ///
    /// The direction cosines are stored column by column, i.e. `x_r, x_a, x_s, y_r, ...`.
    pub fn vox2ras(&self) -> Affine {
        let mut m = Affine::identity().0;
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = self.mdc_raw[col * 3 + row] as f64 * self.delta[col] as f64;
            }
        }
        // The center RAS is at voxel (dim / 2).
        let center = [self.dim1len as f64 / 2., self.dim2len as f64 / 2., self.dim3len as f64 / 2.];
        for row in 0..3 {
            let rotated: f64 = (0..3).map(|col| m[row][col] * center[col]).sum();
            m[row][3] = self.p_xyz_c[row] as f64 - rotated;
        }
        Affine(m)
    }
}


impl FsMgh {

    /// Read an MGH or MGZ file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
        let mut input = open_maybe_gz(path)?;
        FsMgh::from_reader(&mut input)
    }

    /// Read an MGH volume from the given byte stream, which must be positioned at the start of the header.
    pub fn from_reader<S>(input: &mut S) -> Result<FsMgh>
    where
        S: Read,
    {
        let hdr = FsMghHeader::from_reader(input)?;
        let dims = hdr.dims()?;

        let mut input = ByteOrdered::be(input);

        // This is only read because we cannot seek in a GZ stream.
        for _ in MGH_HEADER_FIELDS_SIZE..MGH_DATA_START {
            input.read_u8()?;
        }

        let num_voxels = checked_num_values(&dims).ok_or(ConnectomeError::InvalidFsMghFormat)?;
        let mut values: Vec<f32> = value_buffer(num_voxels);
        for _ in 0..num_voxels {
            let v = match hdr.dtype {
                0 => input.read_u8()? as f32,  // MRI_UCHAR
                1 => input.read_i32()? as f32, // MRI_INT
                3 => input.read_f32()?,        // MRI_FLOAT
                4 => input.read_i16()? as f32, // MRI_SHORT
                other => return Err(ConnectomeError::UnsupportedFsMghDatatype(other)),
            };
            values.push(v);
        }

        let data = Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]).f(), values)
            .map_err(|e| ConnectomeError::ShapeMismatch(e.to_string()))?;

        Ok(FsMgh { header: hdr, data })
    }

    /// Convert into the format-independent volume representation.
    pub fn to_volume(self) -> BrainVolume {
        let affine = self.header.vox2ras();
        BrainVolume::new(self.data, affine)
    }

    /// The name of the datatype, like `MRI_FLOAT`.
    pub fn dtype_name(&self) -> Option<&'static str> {
        MGH_DATATYPE_CODES
            .iter()
            .position(|c| *c == self.header.dtype)
            .map(|idx| MGH_DATATYPE_NAMES[idx])
    }
}

impl fmt::Display for FsMgh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MGH volume with dimensions {:?} of type {}.", self.data.shape(), self.dtype_name().unwrap_or("unknown"))
    }
}


/// Read an MGH or MGZ file.
///
/// # Examples
///
/// ```no_run
/// let mgh = neuroconnectome::read_mgh("/path/to/subjects_dir/subject1/mri/aparc+aseg.mgz").unwrap();
/// println!("{}", mgh);
/// ```
pub fn read_mgh<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
    FsMgh::from_file(path)
}


#[cfg(test)]
mod test {
    use super::*;
    use byteordered::ByteOrdered;
    use std::io::Write;

    /// Encode a tiny 2x2x1 MRI_SHORT volume with valid RAS information.
    fn demo_mgh_bytes() -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut out = ByteOrdered::be(&mut buf);
            for v in [1i32, 2, 2, 1, 1, 4, 0].iter() { out.write_i32(*v).unwrap(); }
            out.write_i16(1).unwrap();
            for v in [2f32, 2., 2.].iter() { out.write_f32(*v).unwrap(); }
            for v in [1f32, 0., 0., 0., 1., 0., 0., 0., 1.].iter() { out.write_f32(*v).unwrap(); }
            for v in [10f32, 20., 30.].iter() { out.write_f32(*v).unwrap(); }
        }
        buf.resize(MGH_DATA_START, 0);
        {
            let mut out = ByteOrdered::be(&mut buf);
            for v in [5i16, 6, 7, 8].iter() { out.write_i16(*v).unwrap(); }
            out.flush().unwrap();
        }
        buf
    }

    #[test]
    fn an_mgh_volume_can_be_decoded() {
        let bytes = demo_mgh_bytes();
        let mgh = FsMgh::from_reader(&mut bytes.as_slice()).unwrap();

        assert_eq!(2, mgh.header.dim1len);
        assert_eq!(Some("MRI_SHORT"), mgh.dtype_name());
        assert_eq!(&[2, 2, 1, 1], mgh.data.shape());
        assert_eq!(5.0, mgh.data[[0, 0, 0, 0]]);
        assert_eq!(6.0, mgh.data[[1, 0, 0, 0]]);
        assert_eq!(7.0, mgh.data[[0, 1, 0, 0]]);
    }

    #[test]
    fn the_vox2ras_puts_the_center_voxel_at_the_center_ras() {
        let bytes = demo_mgh_bytes();
        let vol = FsMgh::from_reader(&mut bytes.as_slice()).unwrap().to_volume();
        assert_eq!([10., 20., 30.], vol.affine.apply([1., 1., 0.5]));
    }

    #[test]
    fn overflowing_dimensions_are_rejected() {
        let mut bytes = demo_mgh_bytes();
        for dim in 0..4 {
            let start = 4 + dim * 4;
            bytes[start..start + 4].copy_from_slice(&i32::MAX.to_be_bytes());
        }
        let res = FsMgh::from_reader(&mut bytes.as_slice());
        assert!(matches!(res, Err(ConnectomeError::InvalidFsMghFormat)));
    }

    #[test]
    fn wrong_format_versions_are_rejected() {
        let mut bytes = demo_mgh_bytes();
        bytes[3] = 7;
        assert!(FsMgh::from_reader(&mut bytes.as_slice()).is_err());
    }
}
