//! Headered raw raster files.
//!
//! Layout: a 40 byte little-endian header (`CORERAW1` magic, samples, lines,
//! bands, pixel type code) followed by band-sequential pixel data.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use super::{check_window, PixelType, Raster, RasterWrite, Window};
use crate::error::{Error, Result};
use crate::special::{self, NULL};

const MAGIC: [u8; 8] = *b"CORERAW1";
const HEADER_BYTES: u64 = std::mem::size_of::<RawHeader>() as u64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 8],
    samples: u64,
    lines: u64,
    bands: u64,
    pixel_type: u32,
    reserved: u32,
}

fn pixel_type_code(pixel_type: PixelType) -> u32 {
    match pixel_type {
        PixelType::Real32 => 4,
        PixelType::Real64 => 8,
    }
}

fn pixel_type_from_code(code: u32) -> Option<PixelType> {
    match code {
        4 => Some(PixelType::Real32),
        8 => Some(PixelType::Real64),
        _ => None,
    }
}

/// File-backed raster. Reads seek per line; the handle is guarded so a
/// shared `Arc<RawFileRaster>` can serve several readers.
#[derive(Debug)]
pub struct RawFileRaster {
    path: PathBuf,
    samples: usize,
    lines: usize,
    bands: usize,
    pixel_type: PixelType,
    file: Mutex<File>,
}

impl RawFileRaster {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, OpenOptions::new().read(true))
    }

    /// Opens for reading and writing.
    pub fn open_rw(path: &Path) -> Result<Self> {
        Self::open_with(path, OpenOptions::new().read(true).write(true))
    }

    fn open_with(path: &Path, options: &OpenOptions) -> Result<Self> {
        let mut file = options.open(path).map_err(|e| Error::io(path, e))?;
        let mut header = RawHeader::zeroed();
        file.read_exact(bytemuck::bytes_of_mut(&mut header))
            .map_err(|e| Error::io(path, e))?;

        let invalid = |reason: &str| Error::InvalidRaster {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if header.magic != MAGIC {
            return Err(invalid("bad magic"));
        }
        let pixel_type = pixel_type_from_code(u32::from_le(header.pixel_type))
            .ok_or_else(|| invalid("unsupported pixel type"))?;
        let samples = u64::from_le(header.samples) as usize;
        let lines = u64::from_le(header.lines) as usize;
        let bands = u64::from_le(header.bands) as usize;
        if samples == 0 || lines == 0 || bands == 0 {
            return Err(invalid("zero dimension"));
        }

        let expected = HEADER_BYTES + (samples * lines * bands * pixel_type.bytes()) as u64;
        let actual = file.metadata().map_err(|e| Error::io(path, e))?.len();
        if actual < expected {
            return Err(invalid("file is truncated"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            lines,
            bands,
            pixel_type,
            file: Mutex::new(file),
        })
    }

    /// Creates a new file filled with NULL, truncating any existing one.
    pub fn create(
        path: &Path,
        samples: usize,
        lines: usize,
        bands: usize,
        pixel_type: PixelType,
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let header = RawHeader {
            magic: MAGIC,
            samples: (samples as u64).to_le(),
            lines: (lines as u64).to_le(),
            bands: (bands as u64).to_le(),
            pixel_type: pixel_type_code(pixel_type).to_le(),
            reserved: 0,
        };
        file.write_all(bytemuck::bytes_of(&header))
            .map_err(|e| Error::io(path, e))?;

        let null_line = encode(&vec![NULL; samples], pixel_type);
        for _ in 0..lines * bands {
            file.write_all(&null_line).map_err(|e| Error::io(path, e))?;
        }
        file.flush().map_err(|e| Error::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            lines,
            bands,
            pixel_type,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the first pixel of `window` on row `row`.
    fn row_offset(&self, window: &Window, row: usize) -> u64 {
        let line = window.line as usize + row;
        let pixel = ((window.band - 1) * self.lines + (line - 1)) * self.samples
            + (window.sample as usize - 1);
        HEADER_BYTES + (pixel * self.pixel_type.bytes()) as u64
    }
}

fn encode(values: &[f64], pixel_type: PixelType) -> Vec<u8> {
    match pixel_type {
        PixelType::Real64 => {
            let le: Vec<u64> = values.iter().map(|v| v.to_bits().to_le()).collect();
            bytemuck::cast_slice(&le).to_vec()
        }
        PixelType::Real32 => {
            let le: Vec<u32> = values
                .iter()
                .map(|&v| special::to_real32(v).to_bits().to_le())
                .collect();
            bytemuck::cast_slice(&le).to_vec()
        }
    }
}

fn decode(bytes: &[u8], pixel_type: PixelType, out: &mut [f64]) {
    match pixel_type {
        PixelType::Real64 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
                let raw: [u8; 8] = bytemuck::pod_read_unaligned(chunk);
                *dst = f64::from_le_bytes(raw);
            }
        }
        PixelType::Real32 => {
            for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                let raw: [u8; 4] = bytemuck::pod_read_unaligned(chunk);
                *dst = special::from_real32(f32::from_le_bytes(raw));
            }
        }
    }
}

impl Raster for RawFileRaster {
    fn samples(&self) -> usize {
        self.samples
    }

    fn lines(&self) -> usize {
        self.lines
    }

    fn bands(&self) -> usize {
        self.bands
    }

    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    fn read(&self, window: &Window, out: &mut [f64]) -> Result<()> {
        check_window(self, window)?;
        let mut bytes = vec![0u8; window.samples * self.pixel_type.bytes()];
        let mut file = self.file.lock();
        for row in 0..window.lines {
            let offset = self.row_offset(window, row);
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io(&self.path, e))?;
            file.read_exact(&mut bytes)
                .map_err(|e| Error::io(&self.path, e))?;
            decode(
                &bytes,
                self.pixel_type,
                &mut out[row * window.samples..(row + 1) * window.samples],
            );
        }
        Ok(())
    }
}

impl RasterWrite for RawFileRaster {
    fn write(&mut self, window: &Window, data: &[f64]) -> Result<()> {
        check_window(self, window)?;
        let offsets: Vec<u64> = (0..window.lines)
            .map(|row| self.row_offset(window, row))
            .collect();
        let file = self.file.get_mut();
        for (row, offset) in offsets.into_iter().enumerate() {
            let bytes = encode(
                &data[row * window.samples..(row + 1) * window.samples],
                self.pixel_type,
            );
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io(&self.path, e))?;
            file.write_all(&bytes)
                .map_err(|e| Error::io(&self.path, e))?;
        }
        file.flush().map_err(|e| Error::io(&self.path, e))
    }
}
