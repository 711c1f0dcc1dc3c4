// SPDX-License-Identifier: MIT

//! VBIOS NVLink configuration table.
//!
//! One base entry per board position, each holding one entry per link.

use crate::Result;
use binread::{BinRead, BinReaderExt};
use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B1, B2, B4};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

/// Link parameters that are not the seven described below.
const LINK_ENTRY_FIXED_SIZE: u8 = 7;

#[derive(BinRead, Debug, Clone, Serialize)]
pub struct NvLinkConfigTable {
    pub header: NvLinkConfigHeader,
    #[br(count(header.base_entry_count))]
    #[br(args(header.link_entry_count, header.link_entry_size))]
    pub entries: Vec<NvLinkBaseEntry>,
}

#[derive(BinRead, Debug, Clone, Serialize)]
pub struct NvLinkConfigHeader {
    pub version: u8,
    #[br(assert(header_size == 8))]
    pub header_size: u8,
    #[br(assert(base_entry_size == 1))]
    pub base_entry_size: u8,
    pub base_entry_count: u8,
    #[br(assert(link_entry_size >= LINK_ENTRY_FIXED_SIZE))]
    pub link_entry_size: u8,
    pub link_entry_count: u8,
    pub reserved: u16,
}

#[derive(BinRead, Debug, Clone, Serialize)]
#[br(import(link_entry_count: u8, link_entry_size: u8))]
pub struct NvLinkBaseEntry {
    pub position_id: u8,
    #[br(count(link_entry_count))]
    #[br(args(link_entry_size))]
    pub links: Vec<VbiosLinkEntry>,
}

#[derive(BinRead, Debug, Clone, Serialize)]
#[br(import(link_entry_size: u8))]
pub struct VbiosLinkEntry {
    pub param_0: VbiosParam0,
    pub line_rate: u8,
    pub coding_mode: u8,
    pub param_3: VbiosParam3,
    pub txtrain_optimization_algorithm: u8,
    pub param_5: VbiosParam5,
    pub param_6: VbiosParam6,
    #[br(count(link_entry_size - LINK_ENTRY_FIXED_SIZE))]
    pub extra_params: Vec<u8>,
}

#[bitfield]
#[derive(Copy, Clone, Debug, BinRead, Serialize)]
#[br(map = Self::from_bytes)]
pub struct VbiosParam0 {
    pub link_disable: bool,
    pub reserved_0: B1,
    pub ac_mode: bool,
    pub receiver_detect_enable: bool,
    pub restore_phy_training_enable: bool,
    pub slm_enable: bool,
    pub l2_enable: bool,
    pub reserved_1: B1,
}

#[bitfield]
#[derive(Copy, Clone, Debug, BinRead, Serialize)]
#[br(map = Self::from_bytes)]
pub struct VbiosParam3 {
    pub reference_clock_mode: B2,
    pub reserved_0: B2,
    pub block_code_mode: B2,
    pub reserved_1: B2,
}

#[bitfield]
#[derive(Copy, Clone, Debug, BinRead, Serialize)]
#[br(map = Self::from_bytes)]
pub struct VbiosParam5 {
    pub txtrain_fom_format: B4,
    pub txtrain_adjustment_algorithm: B4,
}

#[bitfield]
#[derive(Copy, Clone, Debug, BinRead, Serialize)]
#[br(map = Self::from_bytes)]
pub struct VbiosParam6 {
    pub min_train_time_mantissa: B4,
    pub min_train_time_exponent: B4,
}

impl NvLinkConfigTable {
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_le()?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        Self::parse(&mut file)
    }

    pub fn link_entry(&self, base_entry: usize, link: usize) -> Option<&VbiosLinkEntry> {
        self.entries.get(base_entry)?.links.get(link)
    }
}
