// SPDX-License-Identifier: MIT

//! MINION ucode image container.
//!
//! Layout (little endian): a fixed header, one descriptor per application,
//! then the segments the offsets point at.

use crate::{Error, Result};
use binread::{BinRead, BinReaderExt};
use derivative::Derivative;
use serde::Serialize;
use std::fs::File;
use std::io::{Cursor, Read};
use std::ops::Range;
use std::path::Path;

pub const UCODE_SIGNATURE: [u8; 4] = *b"MNUC";
pub const UCODE_VERSION: u16 = 1;
const UCODE_HEADER_SIZE: usize = 28;
const UCODE_APP_SIZE: usize = 16;

#[derive(BinRead, Debug, Clone, Serialize)]
pub struct UcodeHeader {
    #[br(assert(signature == UCODE_SIGNATURE))]
    pub signature: [u8; 4],
    pub version: u16,
    pub app_count: u16,
    pub os_code_offset: u32,
    pub os_code_size: u32,
    pub os_data_offset: u32,
    pub os_data_size: u32,
    pub boot_vector: u32,
    #[br(count(app_count))]
    pub apps: Vec<UcodeApp>,
}

#[derive(BinRead, Debug, Clone, Copy, Serialize)]
pub struct UcodeApp {
    pub code_offset: u32,
    pub code_size: u32,
    pub data_offset: u32,
    pub data_size: u32,
}

#[derive(Derivative, Clone, Serialize)]
#[derivative(Debug)]
pub struct UcodeImage {
    pub header: UcodeHeader,
    #[derivative(Debug = "ignore")]
    #[serde(skip)]
    bytes: Vec<u8>,
}

fn segment_range(offset: u32, size: u32, len: usize, name: &str) -> Result<Range<usize>> {
    let start = offset as usize;
    start
        .checked_add(size as usize)
        .filter(|&end| end <= len)
        .map(|end| start..end)
        .ok_or_else(|| {
            Error::InvalidFormat(format!(
                "{} segment 0x{:x}+0x{:x} exceeds image size 0x{:x}",
                name, offset, size, len
            ))
        })
}

impl UcodeImage {
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let header: UcodeHeader = Cursor::new(bytes.as_slice()).read_le()?;
        let len = bytes.len();
        segment_range(header.os_code_offset, header.os_code_size, len, "OS code")?;
        segment_range(header.os_data_offset, header.os_data_size, len, "OS data")?;
        for (index, app) in header.apps.iter().enumerate() {
            segment_range(app.code_offset, app.code_size, len, &format!("app {} code", index))?;
            segment_range(app.data_offset, app.data_size, len, &format!("app {} data", index))?;
        }
        Ok(Self { header, bytes })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Self::parse(bytes)
    }

    // Ranges were validated by `parse`.
    fn slice(&self, offset: u32, size: u32) -> &[u8] {
        let start = offset as usize;
        self.bytes.get(start..start + size as usize).unwrap_or(&[])
    }

    pub fn os_code(&self) -> &[u8] {
        self.slice(self.header.os_code_offset, self.header.os_code_size)
    }

    pub fn os_data(&self) -> &[u8] {
        self.slice(self.header.os_data_offset, self.header.os_data_size)
    }

    pub fn apps(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.header.apps.iter().map(|app| {
            (
                self.slice(app.code_offset, app.code_size),
                self.slice(app.data_offset, app.data_size),
            )
        })
    }

    /// Image assembled in memory from its segments.
    pub fn from_segments(
        boot_vector: u32,
        os_code: &[u8],
        os_data: &[u8],
        apps: &[(&[u8], &[u8])],
    ) -> Self {
        Self {
            header: layout(boot_vector, os_code, os_data, apps),
            bytes: Self::build(boot_vector, os_code, os_data, apps),
        }
    }

    /// Serializes segments into the container format.
    pub fn build(boot_vector: u32, os_code: &[u8], os_data: &[u8], apps: &[(&[u8], &[u8])]) -> Vec<u8> {
        let header = layout(boot_vector, os_code, os_data, apps);
        let mut out = Vec::new();
        out.extend_from_slice(&header.signature);
        out.extend_from_slice(&header.version.to_le_bytes());
        out.extend_from_slice(&header.app_count.to_le_bytes());
        for word in [
            header.os_code_offset,
            header.os_code_size,
            header.os_data_offset,
            header.os_data_size,
            header.boot_vector,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        for app in &header.apps {
            for word in [app.code_offset, app.code_size, app.data_offset, app.data_size] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        out.extend_from_slice(os_code);
        out.extend_from_slice(os_data);
        for (code, data) in apps {
            out.extend_from_slice(code);
            out.extend_from_slice(data);
        }
        out
    }
}

/// Segments follow the header and descriptors back to back, in order.
fn layout(boot_vector: u32, os_code: &[u8], os_data: &[u8], apps: &[(&[u8], &[u8])]) -> UcodeHeader {
    let mut offset = (UCODE_HEADER_SIZE + apps.len() * UCODE_APP_SIZE) as u32;
    let mut place = |size: usize| {
        let at = offset;
        offset += size as u32;
        at
    };
    let os_code_offset = place(os_code.len());
    let os_data_offset = place(os_data.len());
    let apps = apps
        .iter()
        .map(|(code, data)| UcodeApp {
            code_offset: place(code.len()),
            code_size: code.len() as u32,
            data_offset: place(data.len()),
            data_size: data.len() as u32,
        })
        .collect::<Vec<_>>();
    UcodeHeader {
        signature: UCODE_SIGNATURE,
        version: UCODE_VERSION,
        app_count: apps.len() as u16,
        os_code_offset,
        os_code_size: os_code.len() as u32,
        os_data_offset,
        os_data_size: os_data.len() as u32,
        boot_vector,
        apps,
    }
}

/// Production image plus the optional image for debug-fused parts.
#[derive(Debug, Clone)]
pub struct MinionFirmware {
    pub production: UcodeImage,
    pub debug: Option<UcodeImage>,
}

impl MinionFirmware {
    pub fn select(&self, debug_mode: bool) -> Result<&UcodeImage> {
        if !debug_mode {
            return Ok(&self.production);
        }
        self.debug.as_ref().ok_or_else(|| {
            Error::Configuration("MINION is debug fused but no debug ucode was provided".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let code = vec![0xaa; 300];
        let data = vec![0x55; 12];
        let app_code = vec![0x11; 8];
        let app_data = vec![0x22; 4];
        let bytes = UcodeImage::build(0x40, &code, &data, &[(app_code.as_slice(), app_data.as_slice())]);
        let image = UcodeImage::parse(bytes).unwrap();
        assert_eq!(image.header.version, UCODE_VERSION);
        assert_eq!(image.header.boot_vector, 0x40);
        assert_eq!(image.header.app_count, 1);
        assert_eq!(image.os_code(), code.as_slice());
        assert_eq!(image.os_data(), data.as_slice());
        let apps: Vec<_> = image.apps().collect();
        assert_eq!(apps, vec![(app_code.as_slice(), app_data.as_slice())]);
    }

    #[test]
    fn test_bad_signature() {
        let mut bytes = UcodeImage::build(0, &[1, 2, 3, 4], &[], &[]);
        bytes[0] = b'X';
        assert!(matches!(
            UcodeImage::parse(bytes),
            Err(Error::BinReadError(_))
        ));
    }

    #[test]
    fn test_from_segments_matches_parse() {
        let app: (&[u8], &[u8]) = (&[1, 2, 3], &[4]);
        let built = UcodeImage::from_segments(0x20, &[9; 10], &[8; 2], &[app]);
        let parsed = UcodeImage::parse(UcodeImage::build(0x20, &[9; 10], &[8; 2], &[app])).unwrap();
        assert_eq!(built.os_code(), parsed.os_code());
        assert_eq!(built.header.apps[0].data_offset, parsed.header.apps[0].data_offset);
        assert_eq!(built.apps().collect::<Vec<_>>(), vec![app]);
    }

    #[test]
    fn test_truncated_segment() {
        let mut bytes = UcodeImage::build(0, &[0; 64], &[0; 16], &[]);
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(
            UcodeImage::parse(bytes),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_select_image() {
        let production = UcodeImage::parse(UcodeImage::build(0, &[0; 4], &[], &[])).unwrap();
        let firmware = MinionFirmware {
            production: production.clone(),
            debug: None,
        };
        assert!(firmware.select(false).is_ok());
        assert!(matches!(
            firmware.select(true),
            Err(Error::Configuration(_))
        ));
        let firmware = MinionFirmware {
            production,
            debug: Some(UcodeImage::parse(UcodeImage::build(0x80, &[0; 4], &[], &[])).unwrap()),
        };
        assert_eq!(firmware.select(true).unwrap().header.boot_vector, 0x80);
    }
}
