//! Binary image format.
//!
//! An image is a fixed header followed by the three concatenated segments
//! (data, string, code), in that order of declaration though not
//! necessarily of placement. The header fields are encoded
//! little-endian (the image file's native target endianness) while the
//! in-code immediates inside the code segment are big-endian — see
//! `encoder::BytecodeWriter`. Offsets are relative to the start of the
//! image (byte 0 of the header), matching the format's position-independent
//! addressing invariant.

use thiserror::Error;

/// Size in bytes of the fixed image header.
pub const HEADER_LEN: usize = 28;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image too short: {0} bytes, need at least {HEADER_LEN}")]
    TooShort(usize),

    #[error("image declares segments extending past end of file")]
    Truncated,
}

/// The fixed header at the start of every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHeader {
    pub data_offset: u32,
    pub data_size: u32,
    pub string_offset: u32,
    pub string_size: u32,
    pub code_offset: u32,
    pub code_size: u32,
    /// Code-segment offset of the user function named `main`.
    pub main_function: u32,
}

impl ImageHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data_offset.to_le_bytes());
        out.extend_from_slice(&self.data_size.to_le_bytes());
        out.extend_from_slice(&self.string_offset.to_le_bytes());
        out.extend_from_slice(&self.string_size.to_le_bytes());
        out.extend_from_slice(&self.code_offset.to_le_bytes());
        out.extend_from_slice(&self.code_size.to_le_bytes());
        out.extend_from_slice(&self.main_function.to_le_bytes());
    }

    fn decode_from(bytes: &[u8]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        Self {
            data_offset: u32_at(0),
            data_size: u32_at(4),
            string_offset: u32_at(8),
            string_size: u32_at(12),
            code_offset: u32_at(16),
            code_size: u32_at(20),
            main_function: u32_at(24),
        }
    }
}

/// A compiled adv2 image: header plus the three segment buffers.
///
/// The string segment is always empty — strings are interned into the tail
/// of the data segment at emit time (invariant: "the separate
/// string segment remains empty"). The field is kept so the header's
/// `string_offset`/`string_size` slots have somewhere to point, matching
/// the original wire format exactly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub data: Vec<u8>,
    pub strings: Vec<u8>,
    pub code: Vec<u8>,
    pub main_function: u32,
}

impl Image {
    pub fn encode(&self) -> Vec<u8> {
        let data_offset = HEADER_LEN as u32;
        let string_offset = data_offset + self.data.len() as u32;
        let code_offset = string_offset + self.strings.len() as u32;

        let header = ImageHeader {
            data_offset,
            data_size: self.data.len() as u32,
            string_offset,
            string_size: self.strings.len() as u32,
            code_offset,
            code_size: self.code.len() as u32,
            main_function: self.main_function,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() + self.strings.len() + self.code.len());
        header.encode_into(&mut out);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.strings);
        out.extend_from_slice(&self.code);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_LEN {
            return Err(ImageError::TooShort(bytes.len()));
        }
        let header = ImageHeader::decode_from(bytes);
        let slice = |offset: u32, size: u32| -> Result<&[u8], ImageError> {
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .ok_or(ImageError::Truncated)?;
            bytes.get(start..end).ok_or(ImageError::Truncated)
        };
        let data = slice(header.data_offset, header.data_size)?.to_vec();
        let strings = slice(header.string_offset, header.string_size)?.to_vec();
        let code = slice(header.code_offset, header.code_size)?.to_vec();
        Ok(Self {
            data,
            strings,
            code,
            main_function: header.main_function,
        })
    }

    pub fn header(&self) -> ImageHeader {
        let data_offset = HEADER_LEN as u32;
        let string_offset = data_offset + self.data.len() as u32;
        let code_offset = string_offset + self.strings.len() as u32;
        ImageHeader {
            data_offset,
            data_size: self.data.len() as u32,
            string_offset,
            string_size: self.strings.len() as u32,
            code_offset,
            code_size: self.code.len() as u32,
            main_function: self.main_function,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let img = Image {
            data: vec![0u8; 16],
            strings: Vec::new(),
            code: vec![0x00, 0x00],
            main_function: 0,
        };
        let bytes = img.encode();
        let decoded = Image::decode(&bytes).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn string_segment_is_always_empty() {
        let img = Image {
            data: vec![0u8; 4],
            strings: Vec::new(),
            code: vec![0u8; 2],
            main_function: 0,
        };
        let header = img.header();
        assert_eq!(header.string_size, 0);
    }

    #[test]
    fn rejects_truncated_image() {
        let bytes = vec![0u8; HEADER_LEN - 1];
        assert_eq!(Image::decode(&bytes), Err(ImageError::TooShort(HEADER_LEN - 1)));
    }

    #[test]
    fn rejects_segment_past_end() {
        let mut header = ImageHeader {
            data_offset: HEADER_LEN as u32,
            data_size: 100,
            string_offset: HEADER_LEN as u32,
            string_size: 0,
            code_offset: HEADER_LEN as u32,
            code_size: 0,
            main_function: 0,
        };
        let mut bytes = Vec::new();
        header.data_size = 100;
        header.encode_into(&mut bytes);
        assert_eq!(Image::decode(&bytes), Err(ImageError::Truncated));
    }
}
