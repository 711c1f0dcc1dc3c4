// SPDX-License-Identifier: MIT

//! MINION link-training controller: its record, command set and status indices.

use serde::Serialize;
use strum::{Display, FromRepr};

pub mod bootstrap;
pub mod mailbox;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum MinionState {
    Uninitialized,
    Bootstrapping,
    Ready,
}

#[derive(Debug, Clone, Serialize)]
pub struct Minion {
    pub instance: u32,
    pub state: MinionState,
    pub links: Vec<u32>,
    /// Set when the boot status poll expired and only the liveness test vouched for the ucode.
    pub boot_timed_out: bool,
}

impl Minion {
    pub fn new(instance: u32) -> Self {
        Self {
            instance,
            state: MinionState::Uninitialized,
            links: Vec::new(),
            boot_timed_out: false,
        }
    }
}

/// DL_CMD opcodes understood by the MINION ucode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromRepr, Display, Serialize)]
#[repr(u16)]
pub enum MinionCommand {
    Nop = 0x00,
    InitPhy = 0x01,
    InitLaneEnable = 0x03,
    InitDlpl = 0x04,
    InitRxTerm = 0x05,
    LaneDisable = 0x08,
    LaneShutdown = 0x0c,
    EnablePm = 0x10,
    DisablePm = 0x11,
    TxClkSwitchPll = 0x14,
    TxClkSwitchAlt = 0x15,
    InitPll = 0x28,
    Swintr = 0x2d,
    SetNea = 0x30,
    SetNedr = 0x31,
    SetNedw = 0x32,
    InitRxTxTerm = 0x35,
    InitPhase1 = 0x40,
    InitNegotiate = 0x41,
    InitOptimize = 0x42,
    InitTl = 0x43,
    InitPhase5a = 0x44,
    SetSimMode = 0x50,
    SetSmfSettings = 0x51,
    SelectUphyTables = 0x52,
    TuringRxdet = 0x58,
    SetBufferReady = 0x60,
}

impl MinionCommand {
    /// Opcodes that read their payload from DL_CMD_DATA.
    pub fn takes_scratch(self) -> bool {
        matches!(
            self,
            MinionCommand::SetSimMode
                | MinionCommand::SetSmfSettings
                | MinionCommand::SelectUphyTables
                | MinionCommand::SetBufferReady
        )
    }
}

/// Status indices readable through DL_STAT.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[repr(u8)]
pub enum DlStat {
    Mn00 = 0x00,
    Uc01 = 0x01,
    Lnk2 = 0x02,
}

/// SET_BUFFER_READY payload bits.
pub const BUFFER_READY_TX: u32 = 1 << 0;
pub const BUFFER_READY_RX: u32 = 1 << 1;

/// Payloads of the ALI preparation commands.
pub const SIM_MODE_DEFAULT: u32 = 0x0;
pub const SMF_SETTINGS_DEFAULT: u32 = 0x0;
pub const UPHY_TABLES_DEFAULT: u32 = 0x0;
pub const SIM_MODE_FAST: u32 = 0x1;
