// SPDX-License-Identifier: MIT

//! Register map of the link and MINION units.
//!
//! Offsets are relative to the unit base; the backend resolves the unit itself.
//! Layouts of the multi-field registers are described with `modular_bitfield`
//! so that every access goes through named fields.

use bitflags::bitflags;
use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B1, B10, B12, B15, B16, B2, B20, B22, B24, B3, B4, B5, B6, B7, B8};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Unit {
    Link(u32),
    Minion(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegAddr {
    pub unit: Unit,
    pub offset: u32,
}

impl RegAddr {
    pub const fn link(link: u32, offset: u32) -> Self {
        Self {
            unit: Unit::Link(link),
            offset,
        }
    }

    pub const fn minion(instance: u32, offset: u32) -> Self {
        Self {
            unit: Unit::Minion(instance),
            offset,
        }
    }
}

/// NVLIPT per-link registers.
pub mod nvlipt {
    pub const RESET_RSTSEQ_LINK_RESET: u32 = 0x0000;
    pub const CTRL_CLK_CTRL: u32 = 0x0004;
    pub const CTRL_LINK_STATE_REQUEST: u32 = 0x0008;
    pub const CTRL_LINK_STATE_STATUS: u32 = 0x000c;
    pub const ERR_STATUS_0: u32 = 0x0010;
    pub const ERR_REPORT_EN_0: u32 = 0x0014;
    pub const ERR_CONTAIN_EN_0: u32 = 0x0018;
    pub const CTRL_SYSTEM_LINK_CLK_CTRL: u32 = 0x0020;
    pub const CTRL_SYSTEM_LINK_CHANNEL_CTRL: u32 = 0x0024;
    pub const CTRL_SYSTEM_LINK_CHANNEL_CTRL2: u32 = 0x0028;
    pub const CTRL_SYSTEM_LINK_AN1_CTRL: u32 = 0x002c;
    pub const CTRL_SW_LINK_MODE_CTRL: u32 = 0x0030;
    pub const TOPOLOGY_REMOTE_CHIP_SID_HI: u32 = 0x0040;
    pub const TOPOLOGY_REMOTE_CHIP_SID_LO: u32 = 0x0044;
    pub const TOPOLOGY_REMOTE_LINK_INFO: u32 = 0x0048;
    pub const TOPOLOGY_REMOTE_CHIP_TYPE: u32 = 0x004c;
    pub const TOPOLOGY_LOCAL_CHIP_SID_HI: u32 = 0x0050;
    pub const TOPOLOGY_LOCAL_CHIP_SID_LO: u32 = 0x0054;
}

/// NVLDL per-link registers.
pub mod nvldl {
    pub const TOP_LINK_STATE: u32 = 0x1000;
    pub const TOP_LINK_CHANGE: u32 = 0x1004;
    pub const TOP_SUBLINK_CHANGE: u32 = 0x1008;
    pub const TOP_INTR: u32 = 0x100c;
    pub const TOP_INTR_STALL_EN: u32 = 0x1010;
    pub const TOP_INTR_NONSTALL_EN: u32 = 0x1014;
    pub const TX_SLSM_STATUS_TX: u32 = 0x1020;
    pub const RX_SLSM_STATUS_RX: u32 = 0x1024;
    pub const RX_ERROR_RATE_CTRL: u32 = 0x1028;
}

/// PHY control per-link registers.
pub mod phyctl {
    pub const CFG_CTL_6: u32 = 0x1100;
    pub const CFG_STATUS_0: u32 = 0x1104;
    pub const PSAVE_UCODE_CTRL_STS: u32 = 0x1108;

    pub const CFG_CTL_6_RXCAL: u32 = 1 << 0;
    pub const CFG_STATUS_0_RXCAL_DONE: u32 = 1 << 0;
}

/// NVLTLC and NPORT per-link registers.
pub mod nvltlc {
    pub const TX_SYS_CTRL_BUFFER_READY: u32 = 0x2000;
    pub const RX_SYS_CTRL_BUFFER_READY: u32 = 0x2004;
    pub const TX_DEBUG_TP_CNTR_CTRL: u32 = 0x2010;
    pub const RX_DEBUG_TP_CNTR_CTRL: u32 = 0x2014;
    pub const NPORT_CTRL_BUFFER_READY: u32 = 0x3000;

    pub const BUFFER_READY: u32 = 1 << 0;

    pub const fn tx_tp_cntr_ctrl(counter: u32) -> u32 {
        0x2020 + counter * 4
    }

    pub const fn rx_tp_cntr_ctrl(counter: u32) -> u32 {
        0x2040 + counter * 4
    }
}

/// MINION unit registers: the falcon core and the per-link DL mailboxes.
pub mod minion {
    pub const FALCON_IRQMSET: u32 = 0x0010;
    pub const FALCON_IRQDEST: u32 = 0x001c;
    pub const FALCON_CPUCTL: u32 = 0x0100;
    pub const FALCON_BOOTVEC: u32 = 0x0104;
    pub const FALCON_DMACTL: u32 = 0x010c;
    pub const FALCON_IMEMC: u32 = 0x0180;
    pub const FALCON_IMEMD: u32 = 0x0184;
    pub const FALCON_IMEMT: u32 = 0x0188;
    pub const FALCON_DMEMC: u32 = 0x01c0;
    pub const FALCON_DMEMD: u32 = 0x01c4;
    pub const FALCON_SCTL: u32 = 0x0240;
    pub const MINION_INTR_STALL_EN: u32 = 0x0818;
    pub const MINION_STATUS: u32 = 0x0830;

    pub const DL_CMD_BASE: u32 = 0x0900;
    pub const DL_CMD_DATA_BASE: u32 = 0x0940;
    pub const DL_STAT_BASE: u32 = 0x0980;
    pub const DL_STAT_DATA_BASE: u32 = 0x09c0;
    pub const DL_MAILBOX_SLOTS: u32 = 16;

    pub const fn nvlink_dl_cmd(local_link: u32) -> u32 {
        DL_CMD_BASE + local_link * 4
    }

    pub const fn nvlink_dl_cmd_data(local_link: u32) -> u32 {
        DL_CMD_DATA_BASE + local_link * 4
    }

    pub const fn nvlink_dl_stat(local_link: u32) -> u32 {
        DL_STAT_BASE + local_link * 4
    }

    pub const fn nvlink_dl_stat_data(local_link: u32) -> u32 {
        DL_STAT_DATA_BASE + local_link * 4
    }

    /// Size of one IMEM block, every block carries its own tag.
    pub const IMEM_BLOCK_SIZE: usize = 256;
}

// Link reset

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct LinkReset {
    pub link_reset: bool,
    pub link_reset_status: bool,
    pub reserved_0: B6,
    pub reserved_1: B24,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ClockStatus: u32 {
        const PLL_PWR_ON = 1 << 0;
        const TXCLK_ON = 1 << 1;
        const TXCLK_PLL = 1 << 2;
        const RXCLK_ON = 1 << 3;
        const NCISOCCLK_ON = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct LinkErrors: u32 {
        const FAILED_MINION_REQUEST = 1 << 0;
        const DL_PROTOCOL = 1 << 1;
        const CLKCTL_ILLEGAL_REQUEST = 1 << 2;
        const RSTSEQ_PLL_TIMEOUT = 1 << 3;
    }
}

// TL link state request

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display, Serialize, Deserialize)]
#[repr(u8)]
pub enum TlLinkState {
    Reset = 0x0,
    Active = 0x1,
    L2 = 0x2,
    Contain = 0x3,
    Shutdown = 0x4,
    ActivePending = 0x5,
    Disable = 0x6,
}

/// States that may be written into the TL link state request register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum TlRequest {
    Reset,
    Active,
    Shutdown,
    L2,
}

impl TlRequest {
    pub fn state(self) -> TlLinkState {
        match self {
            TlRequest::Reset => TlLinkState::Reset,
            TlRequest::Active => TlLinkState::Active,
            TlRequest::Shutdown => TlLinkState::Shutdown,
            TlRequest::L2 => TlLinkState::L2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum TlRequestStatus {
    Init = 0x0,
    Busy = 0x1,
    MinionRequestFail = 0x2,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct LinkStateRequest {
    pub request: B4,
    pub reserved_0: B4,
    pub status: B8,
    pub reserved_1: B15,
    pub ready: bool,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct LinkStateStatus {
    pub current_link_state: B4,
    pub reserved_0: B4,
    pub reserved_1: B24,
}

// DL top level

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display, Serialize)]
#[repr(u8)]
pub enum DlState {
    Init = 0x0,
    Hwcfg = 0x1,
    Swcfg = 0x2,
    Active = 0x3,
    Fault = 0x4,
    Sleep = 0x5,
    RcvyAc = 0x8,
    RcvyRx = 0xa,
    Hwpcfg = 0xc,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct DlLinkState {
    pub state: B8,
    pub reserved_0: B24,
}

/// Completion status shared by the LINK_CHANGE and SUBLINK_CHANGE registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum ChangeStatus {
    Done = 0x0,
    Busy = 0x1,
    Fault = 0x2,
}

pub const LINK_CHANGE_ACTION_LTSSM_CHANGE: u8 = 0x1;
pub const SUBLINK_CHANGE_ACTION_SLSM_CHANGE: u8 = 0x1;
pub const SUBLINK_CHANGE_ACTION_SLSM_FORCE: u8 = 0x3;
pub const SUBLINK_TX: u8 = 0x0;
pub const SUBLINK_RX: u8 = 0x1;

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct LinkChange {
    pub status: B2,
    pub action: B2,
    pub new_state: B4,
    pub reserved_0: B8,
    pub old_state_mask: B4,
    pub reserved_1: B12,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct SublinkChange {
    pub status: B2,
    pub action: B2,
    pub new_state: B4,
    pub reserved_0: B8,
    pub sublink: B1,
    pub countdown_immediate: bool,
    pub reserved_1: B2,
    pub old_state_mask: B4,
    pub reserved_2: B8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, EnumIter, Display, Serialize)]
#[repr(u8)]
pub enum SublinkState {
    Hs = 0x0,
    SingleLane = 0x4,
    Train = 0x5,
    Safe = 0x6,
    Off = 0x7,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display, Serialize)]
#[repr(u8)]
pub enum SublinkSubstate {
    Stable = 0x0,
    Settling = 0x1,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct SlsmStatus {
    pub primary_state: B4,
    pub substate: B4,
    pub reserved_0: B24,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DlInterrupts: u32 {
        const TX_REPLAY = 1 << 0;
        const TX_RECOVERY_SHORT = 1 << 1;
        const TX_FAULT_RAM = 1 << 4;
        const TX_FAULT_INTERFACE = 1 << 5;
        const TX_FAULT_SUBLINK_CHANGE = 1 << 8;
        const RX_FAULT_SUBLINK_CHANGE = 1 << 16;
        const RX_FAULT_DL_PROTOCOL = 1 << 20;
        const RX_SHORT_ERROR_RATE = 1 << 21;
        const RX_LONG_ERROR_RATE = 1 << 22;
        const RX_ILA_TRIGGER = 1 << 23;
        const RX_CRC_COUNTER = 1 << 24;
        const LTSSM_FAULT_DOWN = 1 << 27;
        const LTSSM_FAULT_UP = 1 << 28;
        const LTSSM_PROTOCOL = 1 << 29;
        const MINION_REQUEST = 1 << 30;
    }
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct ErrorRateCtrl {
    pub short_threshold_man: B3,
    pub short_threshold_exp: B4,
    pub short_timescale_man: B3,
    pub short_timescale_exp: B4,
    pub reserved_0: B2,
    pub long_threshold_man: B3,
    pub long_threshold_exp: B4,
    pub long_timescale_man: B3,
    pub long_timescale_exp: B4,
    pub reserved_1: B2,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct PsaveStatus {
    pub pmsts: B4,
    pub reserved_0: B4,
    pub reserved_1: B24,
}

pub const PSAVE_PMSTS_PSL0: u8 = 0x1;

// Throughput counters

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FlitFilter: u8 {
        const HEAD = 1 << 0;
        const AE = 1 << 1;
        const BE = 1 << 2;
        const DATA = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TpCounterEnable: u32 {
        const ENABLE_0 = 1 << 0;
        const ENABLE_1 = 1 << 1;
        const RESET_0 = 1 << 16;
        const RESET_1 = 1 << 17;
    }
}

pub const TP_CNTR_UNIT_FLITS: u8 = 0x1;
pub const TP_CNTR_VCSET_FILTER_ALL: u8 = 0x3;

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct TpCounterConfig {
    pub unit: B2,
    pub flit_filter: B8,
    pub vcset_filter_mode: B2,
    pub reserved_0: B20,
}

// Topology

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct RemoteLinkInfo {
    pub link_number: B8,
    pub reserved_0: B24,
}

pub const REMOTE_CHIP_TYPE_NV3P0AMP: u32 = 0x1;
pub const REMOTE_CHIP_TYPE_NV3P0LRK: u32 = 0x2;
pub const REMOTE_CHIP_TYPE_NV4P0HOP: u32 = 0x3;
pub const REMOTE_CHIP_TYPE_NV4P0LAG: u32 = 0x4;

// System link control

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct SystemLinkClkCtrl {
    pub line_rate: B8,
    pub reference_clock_mode: B2,
    pub reserved_0: B22,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct SystemLinkChannelCtrl {
    pub txtrain_fom_format: B3,
    pub txtrain_optimization_algorithm: B8,
    pub txtrain_adjustment_algorithm: B4,
    pub txtrain_min_train_time_mantissa: B4,
    pub txtrain_min_train_time_exponent: B4,
    pub ac_dc_mode: bool,
    pub block_code_mode: B2,
    pub reserved_0: B6,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct SystemLinkChannelCtrl2 {
    pub l1_min_recal_time_mantissa: B4,
    pub l1_min_recal_time_exponent: B4,
    pub l1_max_recal_period_mantissa: B4,
    pub l1_max_recal_period_exponent: B4,
    pub reserved_0: B16,
}

pub const AN1_CTRL_PWRM_L2_ENABLE: u32 = 1 << 0;
pub const SW_LINK_MODE_CTRL_LINK_DISABLE: u32 = 1 << 0;

// MINION

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct MinionDlCmd {
    pub command: B10,
    pub reserved_0: B20,
    pub fault: bool,
    pub ready: bool,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct MinionDlStat {
    pub args: B16,
    pub status_idx: B8,
    pub reserved_0: B7,
    pub ready: bool,
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct MinionStatus {
    pub status: B8,
    pub intr_code: B24,
}

pub const MINION_STATUS_BOOT: u8 = 0x1;
pub const MINION_INTR_CODE_SWREQ: u32 = 0x1;

/// Data word returned for the MN00 status index.
#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct Mn00Status {
    pub link_intr_code: B8,
    pub link_intr_subcode: B8,
    pub reserved_0: B16,
}

pub const MINION_OK: u8 = 0x00;
pub const MINION_ALARM_BUSY: u8 = 0x80;

bitflags! {
    /// Data word returned for the UC01 status index.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TrainingStatus: u32 {
        const TRAINING_GOOD = 1 << 0;
        const CONFIG_GOOD = 1 << 1;
    }
}

/// Receiver detect field of the LNK2 status index.
pub const LNK2_RXDET_LINK_STATUS_MASK: u32 = 0x3;
pub const LNK2_RXDET_LINK_STATUS_FOUND: u32 = 0x2;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FalconDmaCtl: u32 {
        const REQUIRE_CTX = 1 << 0;
        const IMEM_SCRUBBING = 1 << 1;
        const DMEM_SCRUBBING = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FalconCpuCtl: u32 {
        const STARTCPU = 1 << 1;
        const HALTED = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FalconSctl: u32 {
        const LSMODE = 1 << 0;
        const DEBUG_MODE = 1 << 20;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FalconIrq: u32 {
        const GPTMR = 1 << 0;
        const WDTMR = 1 << 1;
        const HALT = 1 << 4;
        const EXTERR = 1 << 5;
        const SWGEN0 = 1 << 6;
        const SWGEN1 = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct MinionIntrEnable: u32 {
        const FATAL = 1 << 0;
        const NONFATAL = 1 << 1;
        const FALCON_STALL = 1 << 2;
        const LINK = 0xffff << 16;
    }
}

/// IMEMC / DMEMC: auto-incrementing memory window control.
#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct FalconMemCtrl {
    pub offs: B8,
    pub blk: B16,
    pub aincw: bool,
    pub aincr: bool,
    pub secure: bool,
    pub reserved_0: B5,
}

impl FalconMemCtrl {
    pub fn address(&self) -> usize {
        self.blk() as usize * minion::IMEM_BLOCK_SIZE + self.offs() as usize
    }

    pub fn at(address: u32) -> Self {
        FalconMemCtrl::new()
            .with_blk((address / minion::IMEM_BLOCK_SIZE as u32) as u16)
            .with_offs((address % minion::IMEM_BLOCK_SIZE as u32) as u8)
            .with_aincw(true)
    }
}

#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub struct FalconImemTag {
    pub tag: B16,
    pub reserved_0: B16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dl_cmd_layout() {
        let cmd = MinionDlCmd::new().with_command(0x41).with_ready(true);
        assert_eq!(u32::from(cmd), 0x8000_0041);
        let cmd = MinionDlCmd::from(0x4000_0041);
        assert!(cmd.fault());
        assert!(!cmd.ready());
        assert_eq!(cmd.command(), 0x41);
    }

    #[test]
    fn test_sublink_change_layout() {
        let change = SublinkChange::new()
            .with_new_state(SublinkState::Off as u8)
            .with_sublink(SUBLINK_RX)
            .with_action(SUBLINK_CHANGE_ACTION_SLSM_FORCE)
            .with_countdown_immediate(true);
        let raw = u32::from(change);
        assert_eq!(raw & 0x3, 0);
        assert_eq!((raw >> 2) & 0x3, SUBLINK_CHANGE_ACTION_SLSM_FORCE as u32);
        assert_eq!((raw >> 4) & 0xf, SublinkState::Off as u32);
        assert_eq!((raw >> 16) & 0x1, 1);
        assert_eq!((raw >> 17) & 0x1, 1);
    }

    #[test]
    fn test_falcon_mem_ctrl_address() {
        let ctrl = FalconMemCtrl::at(0x310);
        assert_eq!(ctrl.blk(), 3);
        assert_eq!(ctrl.offs(), 0x10);
        assert_eq!(ctrl.address(), 0x310);
        assert!(ctrl.aincw());
    }
}
