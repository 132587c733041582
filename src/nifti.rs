//! Functions for reading and writing volumes in single-file NIfTI-1 format (`.nii` and `.nii.gz`).
//!
//! Public atlases and fMRI datasets are distributed in this format. Only the parts of the
//! format needed for volumetric data are modelled: the header, the affine (sform or qform),
//! and the voxel data, which is always converted to `f32`.

use byteordered::{ByteOrdered, Endianness};
use ndarray::{Array4, ShapeBuilder};

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{ConnectomeError, Result};
use crate::util::{
    checked_num_values, create_maybe_gz, open_maybe_gz, read_fixed_length_string, value_buffer, write_fixed_length_string,
};
use crate::volume::{Affine, BrainVolume};

pub const NIFTI1_HEADER_SIZE: i32 = 348;
pub const NIFTI1_MAGIC_SINGLE_FILE: &str = "n+1";
pub const NIFTI1_DEFAULT_VOX_OFFSET: f32 = 352.0; // Header plus the 4 byte extension flag.

pub const NIFTI_TYPE_UINT8: i16 = 2;
pub const NIFTI_TYPE_INT16: i16 = 4;
pub const NIFTI_TYPE_INT32: i16 = 8;
pub const NIFTI_TYPE_FLOAT32: i16 = 16;
pub const NIFTI_TYPE_FLOAT64: i16 = 64;
pub const NIFTI_TYPE_INT8: i16 = 256;
pub const NIFTI_TYPE_UINT16: i16 = 512;
pub const NIFTI_TYPE_UINT32: i16 = 768;

/// Models the header of a NIfTI-1 file.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub endianness: Endianness,
    pub dim: [i16; 8],
    pub intent_code: i16,
    pub datatype: i16,
    pub bitpix: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub xyzt_units: u8,
    pub descrip: String,
    pub qform_code: i16,
    pub sform_code: i16,
    pub quatern: [f32; 3], // quatern_b, quatern_c, quatern_d
    pub qoffset: [f32; 3],
    pub srow_x: [f32; 4],
    pub srow_y: [f32; 4],
    pub srow_z: [f32; 4],
    pub magic: String,
}

impl Default for NiftiHeader {
    fn default() -> NiftiHeader {
        NiftiHeader {
            endianness: Endianness::Little,
            dim: [0; 8],
            intent_code: 0,
            datatype: NIFTI_TYPE_FLOAT32,
            bitpix: 32,
            pixdim: [1.; 8],
            vox_offset: NIFTI1_DEFAULT_VOX_OFFSET,
            scl_slope: 1.,
            scl_inter: 0.,
            xyzt_units: 10, // mm and seconds
            descrip: String::new(),
            qform_code: 0,
            sform_code: 0,
            quatern: [0.; 3],
            qoffset: [0.; 3],
            srow_x: [1., 0., 0., 0.],
            srow_y: [0., 1., 0., 0.],
            srow_z: [0., 0., 1., 0.],
            magic: String::from(NIFTI1_MAGIC_SINGLE_FILE),
        }
    }
}

impl NiftiHeader {

    /// Read a NIfTI-1 header from a file. Files ending in `.gz` are decompressed on the fly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
        let mut input = open_maybe_gz(path)?;
        NiftiHeader::from_reader(&mut input)
    }

    /// Read a NIfTI-1 header from the given byte stream.
    /// It is assumed that the input is currently at the start of the header. After
    /// the call, exactly 348 bytes have been consumed.
    pub fn from_reader<S>(input: &mut S) -> Result<NiftiHeader>
    where
        S: Read,
    {
        // The header size field doubles as the byte order marker.
        let mut sizeof_hdr = [0u8; 4];
        input.read_exact(&mut sizeof_hdr)?;
        let endianness = if i32::from_le_bytes(sizeof_hdr) == NIFTI1_HEADER_SIZE {
            Endianness::Little
        } else if i32::from_be_bytes(sizeof_hdr) == NIFTI1_HEADER_SIZE {
            Endianness::Big
        } else {
            return Err(ConnectomeError::InvalidNiftiFormat);
        };

        let mut hdr = NiftiHeader { endianness, ..NiftiHeader::default() };
        let mut input = ByteOrdered::runtime(input, endianness);

        // data_type, db_name, extents, session_error, regular, dim_info: unused legacy fields.
        let _legacy = read_fixed_length_string(&mut input, 36)?;

        for idx in 0..8 { hdr.dim[idx] = input.read_i16()?; }
        for _ in 0..3 { input.read_f32()?; } // intent_p1 .. intent_p3
        hdr.intent_code = input.read_i16()?;
        hdr.datatype = input.read_i16()?;
        hdr.bitpix = input.read_i16()?;
        let _slice_start = input.read_i16()?;
        for idx in 0..8 { hdr.pixdim[idx] = input.read_f32()?; }
        hdr.vox_offset = input.read_f32()?;
        hdr.scl_slope = input.read_f32()?;
        hdr.scl_inter = input.read_f32()?;
        let _slice_end = input.read_i16()?;
        let _slice_code = input.read_u8()?;
        hdr.xyzt_units = input.read_u8()?;
        for _ in 0..4 { input.read_f32()?; } // cal_max, cal_min, slice_duration, toffset
        for _ in 0..2 { input.read_i32()?; } // glmax, glmin
        hdr.descrip = read_fixed_length_string(&mut input, 80)?;
        let _aux_file = read_fixed_length_string(&mut input, 24)?;
        hdr.qform_code = input.read_i16()?;
        hdr.sform_code = input.read_i16()?;
        for idx in 0..3 { hdr.quatern[idx] = input.read_f32()?; }
        for idx in 0..3 { hdr.qoffset[idx] = input.read_f32()?; }
        for idx in 0..4 { hdr.srow_x[idx] = input.read_f32()?; }
        for idx in 0..4 { hdr.srow_y[idx] = input.read_f32()?; }
        for idx in 0..4 { hdr.srow_z[idx] = input.read_f32()?; }
        let _intent_name = read_fixed_length_string(&mut input, 16)?;
        hdr.magic = read_fixed_length_string(&mut input, 4)?;

        // Only single-file images are supported, a separate .img file is not looked for.
        if hdr.magic != NIFTI1_MAGIC_SINGLE_FILE {
            return Err(ConnectomeError::InvalidNiftiFormat);
        }
        if hdr.dim[0] < 1 || hdr.dim[0] > 7 {
            return Err(ConnectomeError::InvalidNiftiFormat);
        }
        Ok(hdr)
    }

    /// The shape (x, y, z, t) of the data. Missing trailing dimensions are 1. Dimensions
    /// beyond the 4th must be 1, they are not supported otherwise.
    pub fn shape(&self) -> Result<[usize; 4]> {
        let ndim = self.dim[0] as usize;
        let mut shape = [1usize; 4];
        for idx in 0..ndim {
            let len = self.dim[idx + 1];
            if len < 1 {
                return Err(ConnectomeError::InvalidNiftiFormat);
            }
            if idx < 4 {
                shape[idx] = len as usize;
            } else if len != 1 {
                return Err(ConnectomeError::ShapeMismatch(format!("NIfTI image with {} dimensions is not supported", ndim)));
            }
        }
        Ok(shape)
    }

    /// Compute the voxel to world transform. The sform is preferred over the qform, and if
    /// neither is set, the voxel sizes from `pixdim` are used.
    pub fn affine(&self) -> Affine {
        if self.sform_code > 0 {
            let mut m = Affine::identity().0;
            for col in 0..4 {
                m[0][col] = self.srow_x[col] as f64;
                m[1][col] = self.srow_y[col] as f64;
                m[2][col] = self.srow_z[col] as f64;
            }
            Affine(m)
        } else if self.qform_code > 0 {
            self.qform_affine()
        } else {
            Affine::from_zooms(
                [self.pixdim[1] as f64, self.pixdim[2] as f64, self.pixdim[3] as f64],
                [0., 0., 0.],
            )
        }
    }

    fn qform_affine(&self) -> Affine {
        let b = self.quatern[0] as f64;
        let c = self.quatern[1] as f64;
        let d = self.quatern[2] as f64;
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();

        let rot = [
            [a * a + b * b - c * c - d * d, 2. * (b * c - a * d), 2. * (b * d + a * c)],
            [2. * (b * c + a * d), a * a + c * c - b * b - d * d, 2. * (c * d - a * b)],
            [2. * (b * d - a * c), 2. * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let qfac = if self.pixdim[0] < 0. { -1. } else { 1. };
        let zooms = [self.pixdim[1] as f64, self.pixdim[2] as f64, self.pixdim[3] as f64 * qfac];

        let mut m = Affine::identity().0;
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = rot[row][col] * zooms[col];
            }
            m[row][3] = self.qoffset[row] as f64;
        }
        Affine(m)
    }

    /// Write the header in little endian byte order, followed by an empty extension flag.
    pub fn to_writer<W>(&self, output: &mut W) -> Result<()>
    where
        W: Write,
    {
        let mut output = ByteOrdered::le(output);
        output.write_i32(NIFTI1_HEADER_SIZE)?;
        write_fixed_length_string(&mut output, "", 36)?;
        for v in self.dim.iter() { output.write_i16(*v)?; }
        for _ in 0..3 { output.write_f32(0.)?; }
        output.write_i16(self.intent_code)?;
        output.write_i16(self.datatype)?;
        output.write_i16(self.bitpix)?;
        output.write_i16(0)?;
        for v in self.pixdim.iter() { output.write_f32(*v)?; }
        output.write_f32(self.vox_offset)?;
        output.write_f32(self.scl_slope)?;
        output.write_f32(self.scl_inter)?;
        output.write_i16(0)?;
        output.write_u8(0)?;
        output.write_u8(self.xyzt_units)?;
        for _ in 0..4 { output.write_f32(0.)?; }
        for _ in 0..2 { output.write_i32(0)?; }
        write_fixed_length_string(&mut output, &self.descrip, 80)?;
        write_fixed_length_string(&mut output, "", 24)?;
        output.write_i16(self.qform_code)?;
        output.write_i16(self.sform_code)?;
        for v in self.quatern.iter() { output.write_f32(*v)?; }
        for v in self.qoffset.iter() { output.write_f32(*v)?; }
        for v in self.srow_x.iter() { output.write_f32(*v)?; }
        for v in self.srow_y.iter() { output.write_f32(*v)?; }
        for v in self.srow_z.iter() { output.write_f32(*v)?; }
        write_fixed_length_string(&mut output, "", 16)?;
        write_fixed_length_string(&mut output, &self.magic, 4)?;
        // Extension flag: no extensions follow.
        output.write_all(&[0u8; 4])?;
        Ok(())
    }
}


/// Models a NIfTI-1 image: the header and the voxel data, converted to `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiImage {
    pub header: NiftiHeader,
    pub data: Array4<f32>,
}

impl NiftiImage {

    /// Read a NIfTI-1 image from a file. Files ending in `.gz` are decompressed on the fly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
        let mut input = open_maybe_gz(path)?;
        NiftiImage::from_reader(&mut input)
    }

    /// Read a NIfTI-1 image from the given byte stream, which must be positioned at the start of the header.
    pub fn from_reader<S>(input: &mut S) -> Result<NiftiImage>
    where
        S: Read,
    {
        let hdr = NiftiHeader::from_reader(input)?;
        let shape = hdr.shape()?;

        let mut input = ByteOrdered::runtime(input, hdr.endianness);

        // We cannot seek in a GZ stream, so the bytes up to the data offset are read and dropped.
        let data_start = hdr.vox_offset.max(NIFTI1_HEADER_SIZE as f32) as usize;
        for _ in NIFTI1_HEADER_SIZE as usize..data_start {
            input.read_u8()?;
        }

        let num_voxels = checked_num_values(&shape).ok_or(ConnectomeError::InvalidNiftiFormat)?;
        let mut values: Vec<f32> = value_buffer(num_voxels);
        for _ in 0..num_voxels {
            let v = match hdr.datatype {
                NIFTI_TYPE_UINT8 => input.read_u8()? as f32,
                NIFTI_TYPE_INT8 => input.read_i8()? as f32,
                NIFTI_TYPE_INT16 => input.read_i16()? as f32,
                NIFTI_TYPE_UINT16 => input.read_u16()? as f32,
                NIFTI_TYPE_INT32 => input.read_i32()? as f32,
                NIFTI_TYPE_UINT32 => input.read_u32()? as f32,
                NIFTI_TYPE_FLOAT32 => input.read_f32()?,
                NIFTI_TYPE_FLOAT64 => input.read_f64()? as f32,
                other => return Err(ConnectomeError::UnsupportedNiftiDatatype(other)),
            };
            values.push(v);
        }

        let scaled = hdr.scl_slope != 0. && !(hdr.scl_slope == 1. && hdr.scl_inter == 0.);
        if scaled {
            for v in values.iter_mut() {
                *v = *v * hdr.scl_slope + hdr.scl_inter;
            }
        }

        // NIfTI stores voxels with the first index varying fastest.
        let data = Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]).f(), values)
            .map_err(|e| ConnectomeError::ShapeMismatch(e.to_string()))?;

        Ok(NiftiImage { header: hdr, data })
    }

    /// Build a float32 image with an sform from an in-memory volume.
    pub fn from_volume(volume: &BrainVolume) -> NiftiImage {
        let sh = volume.data.shape();
        let aff = &volume.affine.0;
        let mut hdr = NiftiHeader::default();
        let ndim = if sh[3] > 1 { 4 } else { 3 };
        hdr.dim = [ndim, sh[0] as i16, sh[1] as i16, sh[2] as i16, sh[3] as i16, 1, 1, 1];
        for col in 0..3 {
            let zoom = (aff[0][col].powi(2) + aff[1][col].powi(2) + aff[2][col].powi(2)).sqrt();
            hdr.pixdim[col + 1] = zoom as f32;
        }
        hdr.sform_code = 1;
        for col in 0..4 {
            hdr.srow_x[col] = aff[0][col] as f32;
            hdr.srow_y[col] = aff[1][col] as f32;
            hdr.srow_z[col] = aff[2][col] as f32;
        }
        NiftiImage { header: hdr, data: volume.data.clone() }
    }

    /// Write the image as float32 in little endian byte order. Files ending in `.gz` are compressed.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut output = create_maybe_gz(path)?;
        let mut hdr = self.header.clone();
        hdr.datatype = NIFTI_TYPE_FLOAT32;
        hdr.bitpix = 32;
        hdr.scl_slope = 1.;
        hdr.scl_inter = 0.;
        hdr.vox_offset = NIFTI1_DEFAULT_VOX_OFFSET;
        hdr.to_writer(&mut output)?;

        let mut output = ByteOrdered::le(output);
        // The reversed-axes view iterates with the first index varying fastest.
        for v in self.data.t().iter() {
            output.write_f32(*v)?;
        }
        output.flush()?;
        Ok(())
    }

    /// Convert into the format-independent volume representation.
    pub fn to_volume(self) -> BrainVolume {
        let affine = self.header.affine();
        BrainVolume::new(self.data, affine)
    }
}

impl fmt::Display for NiftiImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NIfTI-1 image with shape {:?}, datatype {}.", self.data.shape(), self.header.datatype)
    }
}


/// Read a NIfTI-1 image from a `.nii` or `.nii.gz` file.
///
/// # Examples
///
/// ```no_run
/// let img = neuroconnectome::read_nifti("/path/to/atlas.nii.gz").unwrap();
/// println!("Atlas has shape {:?}.", img.data.shape());
/// ```
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    NiftiImage::from_file(path)
}

/// Write a volume to a `.nii` or `.nii.gz` file as float32 data with an sform.
pub fn write_nifti<P: AsRef<Path>>(path: P, volume: &BrainVolume) -> Result<()> {
    NiftiImage::from_volume(volume).to_file(path)
}
