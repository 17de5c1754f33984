//! Synchronous texture-container header decoding.
//!
//! [`Renderer::load_texture`](crate::Renderer::load_texture) needs the
//! dimensions and format before any job runs, so the DDS header is probed on
//! the calling thread; the pixel payload is uploaded later by the creation
//! job on the render thread.

use crate::driver::TextureFormat;
use crate::errors::TextureError;

/// `"DDS "` little-endian.
const DDS_MAGIC: u32 = 0x2053_4444;
/// Magic + 124-byte header.
pub(crate) const DDS_DATA_OFFSET: usize = 128;

const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDSCAPS2_CUBEMAP: u32 = 0x200;
const DDSCAPS2_VOLUME: u32 = 0x0020_0000;

const FOURCC_DXT1: u32 = 0x3154_5844;
const FOURCC_DXT3: u32 = 0x3354_5844;
const FOURCC_DXT5: u32 = 0x3554_5844;

/// Texture properties decoded from a container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mips: u32,
    pub format: TextureFormat,
    pub is_cubemap: bool,
}

impl TextureInfo {
    /// Byte size of the full surface chain the header describes.
    pub fn data_size(&self) -> u64 {
        let faces = if self.is_cubemap { 6 } else { 1 };
        let mut total = 0;
        for mip in 0..self.mips {
            let w = (self.width >> mip).max(1);
            let h = (self.height >> mip).max(1);
            total += self.format.surface_size(w, h);
        }
        total * u64::from(self.depth) * faces
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Probe the header of `data` without touching the pixel payload.
pub fn parse_header(data: &[u8]) -> Result<TextureInfo, TextureError> {
    if data.len() < 4 || read_u32(data, 0) != DDS_MAGIC {
        return Err(TextureError::UnknownMagic);
    }
    if data.len() < DDS_DATA_OFFSET {
        return Err(TextureError::Truncated(data.len()));
    }

    let height = read_u32(data, 12);
    let width = read_u32(data, 16);
    let volume_depth = read_u32(data, 24);
    let mips = read_u32(data, 28).max(1);
    let pf_flags = read_u32(data, 80);
    let fourcc = read_u32(data, 84);
    let bit_count = read_u32(data, 88);
    let caps2 = read_u32(data, 112);

    if width == 0 || height == 0 {
        return Err(TextureError::ZeroSized);
    }

    let format = if pf_flags & DDPF_FOURCC != 0 {
        match fourcc {
            FOURCC_DXT1 => TextureFormat::Bc1,
            FOURCC_DXT3 => TextureFormat::Bc2,
            FOURCC_DXT5 => TextureFormat::Bc3,
            other => return Err(TextureError::UnsupportedFormat(other)),
        }
    } else if pf_flags & DDPF_RGB != 0 && bit_count == 32 {
        TextureFormat::Rgba8
    } else if bit_count == 8 {
        TextureFormat::R8
    } else {
        return Err(TextureError::UnsupportedFormat(fourcc));
    };

    let depth = if caps2 & DDSCAPS2_VOLUME != 0 {
        volume_depth.max(1)
    } else {
        1
    };

    Ok(TextureInfo {
        width,
        height,
        depth,
        mips,
        format,
        is_cubemap: caps2 & DDSCAPS2_CUBEMAP != 0,
    })
}

#[cfg(test)]
pub(crate) fn synthetic_dds(
    width: u32,
    height: u32,
    mips: u32,
    fourcc: Option<u32>,
    payload: usize,
) -> Vec<u8> {
    let mut data = vec![0u8; DDS_DATA_OFFSET + payload];
    data[0..4].copy_from_slice(&DDS_MAGIC.to_le_bytes());
    data[4..8].copy_from_slice(&124u32.to_le_bytes());
    data[12..16].copy_from_slice(&height.to_le_bytes());
    data[16..20].copy_from_slice(&width.to_le_bytes());
    data[28..32].copy_from_slice(&mips.to_le_bytes());
    data[76..80].copy_from_slice(&32u32.to_le_bytes());
    match fourcc {
        Some(cc) => {
            data[80..84].copy_from_slice(&DDPF_FOURCC.to_le_bytes());
            data[84..88].copy_from_slice(&cc.to_le_bytes());
        }
        None => {
            data[80..84].copy_from_slice(&DDPF_RGB.to_le_bytes());
            data[88..92].copy_from_slice(&32u32.to_le_bytes());
        }
    }
    data
}
