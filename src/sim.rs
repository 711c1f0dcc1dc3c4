// SPDX-License-Identifier: MIT

//! Register-level model of an NVSwitch: link units, MINION falcons and the
//! ucode behind the DL mailboxes.
//!
//! Every write is recorded with a sequence number so callers can check what
//! was touched and in which order. Faults are injected through `SimKnobs`.

use crate::firmware::{MinionFirmware, UcodeImage};
use crate::io::RegisterIo;
use crate::link::sublink::SublinkKind;
use crate::minion::{DlStat, MinionCommand, BUFFER_READY_RX, BUFFER_READY_TX};
use crate::regs::{
    minion, nvldl, nvlipt, nvltlc, phyctl, ChangeStatus, ClockStatus, DlLinkState, DlState,
    FalconCpuCtl, FalconDmaCtl, FalconImemTag, FalconMemCtrl, FalconSctl, LinkChange, LinkErrors,
    LinkReset, LinkStateRequest, LinkStateStatus, MinionDlCmd, MinionDlStat, MinionStatus,
    Mn00Status, PsaveStatus, RegAddr, SlsmStatus, SublinkChange, SublinkState, SublinkSubstate,
    TlLinkState, TlRequestStatus, TrainingStatus, Unit, LNK2_RXDET_LINK_STATUS_FOUND,
    MINION_ALARM_BUSY, MINION_INTR_CODE_SWREQ, MINION_STATUS_BOOT, PSAVE_PMSTS_PSL0,
    REMOTE_CHIP_TYPE_NV3P0AMP, SUBLINK_TX,
};
use log::trace;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const LINKS_PER_MINION: u32 = 4;

const ALL_CLOCKS_ON: ClockStatus = ClockStatus::TXCLK_ON
    .union(ClockStatus::RXCLK_ON)
    .union(ClockStatus::NCISOCCLK_ON);

#[derive(Debug, Clone, Default)]
pub struct SimKnobs {
    /// Commands answered with the fault bit.
    pub failing_commands: HashSet<MinionCommand>,
    /// Commands that never become ready.
    pub unresponsive_commands: HashSet<MinionCommand>,
    /// MN00 sub-code reported with a command fault.
    pub fault_subcode: u8,
    pub training_good_never: bool,
    pub rxdet_missing: bool,
    pub rxcal_fail: bool,
    /// TL RESET requests refused with ALARM_BUSY before one succeeds.
    pub tl_reset_busy: u32,
    pub tl_shutdown_busy: u32,
    pub tl_request_stuck: bool,
    /// Reads of the TL request register before an ALI training completes.
    pub ali_pending_polls: u32,
    pub boot_hang: bool,
    pub liveness_fail: bool,
    /// DMACTL reads that still report scrubbing.
    pub scrub_polls: u32,
    pub sublink_fault: bool,
    /// TXCLK never switches over to the PLL.
    pub txclk_switch_stuck: bool,
    pub debug_fused: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct WriteRecord {
    pub seq: u64,
    pub addr: RegAddr,
    pub value: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    pub seq: u64,
    pub link: u32,
    pub command: MinionCommand,
    pub scratch: u32,
    pub faulted: bool,
}

#[derive(Debug, Default)]
struct LinkModel {
    mn00: u32,
    rxdet_found: bool,
    training_good: bool,
    config_good: bool,
    ali_pending: Option<u32>,
}

#[derive(Debug, Default)]
struct FalconModel {
    imem: Vec<u8>,
    dmem: Vec<u8>,
    imem_ctrl: u32,
    dmem_ctrl: u32,
    imem_tags: Vec<u16>,
    boot_vector: Option<u32>,
    dmactl_reads: u32,
}

enum TlOutcome {
    Done,
    Pending,
    Busy,
    Failed,
}

fn mem_write(mem: &mut Vec<u8>, ctrl: &mut u32, value: u32) {
    let current = FalconMemCtrl::from(*ctrl);
    let address = current.address();
    if mem.len() < address + 4 {
        mem.resize(address + 4, 0);
    }
    mem[address..address + 4].copy_from_slice(&value.to_le_bytes());
    if current.aincw() {
        *ctrl = FalconMemCtrl::at((address + 4) as u32).into();
    }
}

#[derive(Debug, Default)]
struct SimState {
    regs: BTreeMap<RegAddr, u32>,
    links: BTreeMap<u32, LinkModel>,
    falcons: BTreeMap<u32, FalconModel>,
    knobs: SimKnobs,
    seq: u64,
    writes: Vec<WriteRecord>,
    commands: Vec<CommandRecord>,
    tl_requests: Vec<(u32, TlLinkState)>,
}

impl SimState {
    fn get(&self, addr: RegAddr) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn set(&mut self, addr: RegAddr, value: u32) {
        self.regs.insert(addr, value);
    }

    fn link_get(&self, link: u32, offset: u32) -> u32 {
        self.get(RegAddr::link(link, offset))
    }

    fn link_set(&mut self, link: u32, offset: u32, value: u32) {
        self.set(RegAddr::link(link, offset), value);
    }

    fn minion_get(&self, instance: u32, offset: u32) -> u32 {
        self.get(RegAddr::minion(instance, offset))
    }

    fn minion_set(&mut self, instance: u32, offset: u32, value: u32) {
        self.set(RegAddr::minion(instance, offset), value);
    }

    fn model(&mut self, link: u32) -> &mut LinkModel {
        self.links.entry(link).or_default()
    }

    fn falcon(&mut self, instance: u32) -> &mut FalconModel {
        self.falcons.entry(instance).or_default()
    }

    fn in_reset(&self, link: u32) -> bool {
        LinkReset::from(self.link_get(link, nvlipt::RESET_RSTSEQ_LINK_RESET)).link_reset_status()
    }

    fn dl_state(&self, link: u32) -> Option<DlState> {
        DlState::from_repr(DlLinkState::from(self.link_get(link, nvldl::TOP_LINK_STATE)).state())
    }

    fn set_dl(&mut self, link: u32, state: DlState) {
        let value = DlLinkState::new().with_state(state as u8);
        self.link_set(link, nvldl::TOP_LINK_STATE, value.into());
    }

    fn set_slsm(&mut self, link: u32, kind: SublinkKind, state: SublinkState) {
        let offset = match kind {
            SublinkKind::Tx => nvldl::TX_SLSM_STATUS_TX,
            SublinkKind::Rx => nvldl::RX_SLSM_STATUS_RX,
        };
        let value = SlsmStatus::new()
            .with_primary_state(state as u8)
            .with_substate(SublinkSubstate::Stable as u8);
        self.link_set(link, offset, value.into());
    }

    fn set_slsms(&mut self, link: u32, state: SublinkState) {
        self.set_slsm(link, SublinkKind::Tx, state);
        self.set_slsm(link, SublinkKind::Rx, state);
    }

    fn set_tl(&mut self, link: u32, state: TlLinkState) {
        let value = LinkStateStatus::new().with_current_link_state(state as u8);
        self.link_set(link, nvlipt::CTRL_LINK_STATE_STATUS, value.into());
    }

    fn set_clocks(&mut self, link: u32, on: ClockStatus, off: ClockStatus) {
        let clocks = ClockStatus::from_bits_truncate(self.link_get(link, nvlipt::CTRL_CLK_CTRL));
        self.link_set(link, nvlipt::CTRL_CLK_CTRL, ((clocks | on) - off).bits());
    }

    fn raise_link_error(&mut self, link: u32, error: LinkErrors) {
        let value = self.link_get(link, nvlipt::ERR_STATUS_0) | error.bits();
        self.link_set(link, nvlipt::ERR_STATUS_0, value);
    }

    fn power_on(&mut self, link: u32) {
        self.reset_link(link);
        self.link_set(link, nvlipt::ERR_REPORT_EN_0, 0xffff);
        self.link_set(link, nvlipt::ERR_CONTAIN_EN_0, 0xff);
        self.link_set(link, nvlipt::TOPOLOGY_REMOTE_CHIP_SID_HI, 0x10de);
        self.link_set(link, nvlipt::TOPOLOGY_REMOTE_CHIP_SID_LO, 0x1000 + link);
        self.link_set(link, nvlipt::TOPOLOGY_REMOTE_LINK_INFO, link);
        self.link_set(link, nvlipt::TOPOLOGY_REMOTE_CHIP_TYPE, REMOTE_CHIP_TYPE_NV3P0AMP);
        self.link_set(link, nvlipt::TOPOLOGY_LOCAL_CHIP_SID_HI, 0x10de);
        self.link_set(link, nvlipt::TOPOLOGY_LOCAL_CHIP_SID_LO, 0x2000);
    }

    fn reset_link(&mut self, link: u32) {
        trace!("sim: link {} reset", link);
        let reset = LinkReset::new()
            .with_link_reset(true)
            .with_link_reset_status(true);
        self.link_set(link, nvlipt::RESET_RSTSEQ_LINK_RESET, reset.into());
        self.link_set(link, nvlipt::CTRL_CLK_CTRL, 0);
        self.set_dl(link, DlState::Init);
        self.set_slsms(link, SublinkState::Off);
        self.set_tl(link, TlLinkState::Reset);
        let request = LinkStateRequest::new()
            .with_request(TlLinkState::Reset as u8)
            .with_ready(true);
        self.link_set(link, nvlipt::CTRL_LINK_STATE_REQUEST, request.into());
        self.link_set(link, nvltlc::TX_SYS_CTRL_BUFFER_READY, 0);
        self.link_set(link, nvltlc::RX_SYS_CTRL_BUFFER_READY, 0);
        self.link_set(link, phyctl::CFG_STATUS_0, 0);
        let model = self.model(link);
        model.rxdet_found = false;
        model.training_good = false;
        model.config_good = false;
        model.ali_pending = None;
    }

    fn release_reset(&mut self, link: u32) {
        self.link_set(link, nvlipt::RESET_RSTSEQ_LINK_RESET, 0);
        self.set_clocks(link, ALL_CLOCKS_ON, ClockStatus::empty());
    }

    /// What the ucode leaves behind after a successful ALI training.
    fn complete_ali(&mut self, link: u32) {
        trace!("sim: link {} ALI training done", link);
        self.release_reset(link);
        self.set_clocks(link, ClockStatus::all(), ClockStatus::empty());
        self.set_dl(link, DlState::Active);
        self.set_slsms(link, SublinkState::Hs);
        self.set_tl(link, TlLinkState::Active);
        let model = self.model(link);
        model.training_good = true;
        model.config_good = true;
        model.ali_pending = None;
        let request = LinkStateRequest::new()
            .with_request(TlLinkState::Active as u8)
            .with_status(TlRequestStatus::Init as u8)
            .with_ready(true);
        self.link_set(link, nvlipt::CTRL_LINK_STATE_REQUEST, request.into());
    }

    fn read(&mut self, addr: RegAddr) -> u32 {
        match addr.unit {
            Unit::Link(link) => self.read_link(link, addr.offset),
            Unit::Minion(instance) => self.read_minion(instance, addr.offset),
        }
    }

    fn read_link(&mut self, link: u32, offset: u32) -> u32 {
        if offset == nvlipt::CTRL_LINK_STATE_REQUEST {
            let pending = self.model(link).ali_pending;
            match pending {
                Some(left) if left <= 1 => self.complete_ali(link),
                Some(left) => self.model(link).ali_pending = Some(left - 1),
                None => {}
            }
        }
        self.link_get(link, offset)
    }

    fn read_minion(&mut self, instance: u32, offset: u32) -> u32 {
        match offset {
            minion::FALCON_DMACTL => {
                let limit = self.knobs.scrub_polls;
                let falcon = self.falcon(instance);
                if falcon.dmactl_reads < limit {
                    falcon.dmactl_reads += 1;
                    (FalconDmaCtl::IMEM_SCRUBBING | FalconDmaCtl::DMEM_SCRUBBING).bits()
                } else {
                    0
                }
            }
            minion::FALCON_SCTL if self.knobs.debug_fused => FalconSctl::DEBUG_MODE.bits(),
            _ => self.minion_get(instance, offset),
        }
    }

    fn write(&mut self, addr: RegAddr, value: u32) {
        self.seq += 1;
        self.writes.push(WriteRecord {
            seq: self.seq,
            addr,
            value,
        });
        match addr.unit {
            Unit::Link(link) => self.write_link(link, addr.offset, value),
            Unit::Minion(instance) => self.write_minion(instance, addr.offset, value),
        }
    }

    fn write_link(&mut self, link: u32, offset: u32, value: u32) {
        match offset {
            nvlipt::RESET_RSTSEQ_LINK_RESET => {
                if LinkReset::from(value).link_reset() {
                    self.reset_link(link);
                } else {
                    self.release_reset(link);
                }
            }
            nvlipt::ERR_STATUS_0 | nvldl::TOP_INTR => {
                let remaining = self.link_get(link, offset) & !value;
                self.link_set(link, offset, remaining);
            }
            nvlipt::CTRL_LINK_STATE_REQUEST => self.tl_request(link, value),
            nvldl::TOP_LINK_CHANGE => self.link_change(link, value),
            nvldl::TOP_SUBLINK_CHANGE => self.sublink_change(link, value),
            phyctl::CFG_CTL_6 => {
                self.link_set(link, offset, value);
                if value & phyctl::CFG_CTL_6_RXCAL != 0 && !self.knobs.rxcal_fail {
                    let status = self.link_get(link, phyctl::CFG_STATUS_0);
                    self.link_set(
                        link,
                        phyctl::CFG_STATUS_0,
                        status | phyctl::CFG_STATUS_0_RXCAL_DONE,
                    );
                }
            }
            _ => self.link_set(link, offset, value),
        }
    }

    fn tl_request(&mut self, link: u32, value: u32) {
        let requested = LinkStateRequest::from(value).request();
        let state = TlLinkState::from_repr(requested);
        if let Some(state) = state {
            self.tl_requests.push((link, state));
        }
        if self.knobs.tl_request_stuck {
            let word = LinkStateRequest::new().with_request(requested);
            self.link_set(link, nvlipt::CTRL_LINK_STATE_REQUEST, word.into());
            return;
        }

        let outcome = match state {
            Some(TlLinkState::Reset) if self.knobs.tl_reset_busy > 0 => {
                self.knobs.tl_reset_busy -= 1;
                TlOutcome::Busy
            }
            Some(TlLinkState::Reset) => {
                self.reset_link(link);
                TlOutcome::Done
            }
            Some(TlLinkState::Shutdown) if self.knobs.tl_shutdown_busy > 0 => {
                self.knobs.tl_shutdown_busy -= 1;
                TlOutcome::Busy
            }
            Some(TlLinkState::Shutdown) => {
                self.set_tl(link, TlLinkState::Shutdown);
                TlOutcome::Done
            }
            Some(TlLinkState::L2) => {
                self.set_tl(link, TlLinkState::L2);
                self.set_dl(link, DlState::Sleep);
                TlOutcome::Done
            }
            Some(TlLinkState::Active) if self.in_reset(link) => {
                let polls = self.knobs.ali_pending_polls;
                if polls == 0 {
                    self.complete_ali(link);
                    TlOutcome::Done
                } else {
                    self.model(link).ali_pending = Some(polls);
                    TlOutcome::Pending
                }
            }
            Some(TlLinkState::Active) if self.dl_state(link) == Some(DlState::Active) => {
                self.set_tl(link, TlLinkState::Active);
                TlOutcome::Done
            }
            _ => TlOutcome::Failed,
        };

        let word = LinkStateRequest::new().with_request(requested);
        let word = match outcome {
            TlOutcome::Done => word
                .with_status(TlRequestStatus::Init as u8)
                .with_ready(true),
            TlOutcome::Pending => word,
            TlOutcome::Busy => {
                let mn00 = Mn00Status::new()
                    .with_link_intr_code(0x1)
                    .with_link_intr_subcode(MINION_ALARM_BUSY);
                self.model(link).mn00 = mn00.into();
                self.raise_link_error(link, LinkErrors::FAILED_MINION_REQUEST);
                word.with_status(TlRequestStatus::MinionRequestFail as u8)
                    .with_ready(true)
            }
            TlOutcome::Failed => {
                self.raise_link_error(link, LinkErrors::FAILED_MINION_REQUEST);
                word.with_status(TlRequestStatus::MinionRequestFail as u8)
                    .with_ready(true)
            }
        };
        self.link_set(link, nvlipt::CTRL_LINK_STATE_REQUEST, word.into());
    }

    fn link_change(&mut self, link: u32, value: u32) {
        let change = LinkChange::from(value);
        let status = match (DlState::from_repr(change.new_state()), self.dl_state(link)) {
            // HWCFG training finishes in SWCFG.
            (Some(DlState::Hwcfg), Some(DlState::Init)) => {
                self.set_dl(link, DlState::Swcfg);
                ChangeStatus::Done
            }
            (Some(DlState::Swcfg), Some(DlState::Active)) => {
                self.set_dl(link, DlState::Swcfg);
                self.set_slsms(link, SublinkState::Safe);
                ChangeStatus::Done
            }
            (Some(DlState::Active), Some(DlState::Swcfg)) => {
                self.set_dl(link, DlState::Active);
                self.set_slsms(link, SublinkState::Hs);
                ChangeStatus::Done
            }
            _ => ChangeStatus::Fault,
        };
        self.link_set(
            link,
            nvldl::TOP_LINK_CHANGE,
            change.with_status(status as u8).into(),
        );
    }

    fn sublink_change(&mut self, link: u32, value: u32) {
        let change = SublinkChange::from(value);
        let status = if self.knobs.sublink_fault {
            ChangeStatus::Fault
        } else {
            if let Some(state) = SublinkState::from_repr(change.new_state()) {
                let kind = if change.sublink() == SUBLINK_TX {
                    SublinkKind::Tx
                } else {
                    SublinkKind::Rx
                };
                self.set_slsm(link, kind, state);
            }
            ChangeStatus::Done
        };
        self.link_set(
            link,
            nvldl::TOP_SUBLINK_CHANGE,
            change.with_status(status as u8).into(),
        );
    }

    fn write_minion(&mut self, instance: u32, offset: u32, value: u32) {
        let slots = minion::DL_MAILBOX_SLOTS * 4;
        match offset {
            o if (minion::DL_CMD_BASE..minion::DL_CMD_BASE + slots).contains(&o) => {
                self.dl_cmd(instance, (o - minion::DL_CMD_BASE) / 4, value)
            }
            o if (minion::DL_STAT_BASE..minion::DL_STAT_BASE + slots).contains(&o) => {
                self.dl_stat(instance, (o - minion::DL_STAT_BASE) / 4, value)
            }
            minion::FALCON_IMEMC => self.falcon(instance).imem_ctrl = value,
            minion::FALCON_DMEMC => self.falcon(instance).dmem_ctrl = value,
            minion::FALCON_IMEMD => {
                let falcon = self.falcon(instance);
                mem_write(&mut falcon.imem, &mut falcon.imem_ctrl, value);
            }
            minion::FALCON_DMEMD => {
                let falcon = self.falcon(instance);
                mem_write(&mut falcon.dmem, &mut falcon.dmem_ctrl, value);
            }
            minion::FALCON_IMEMT => {
                let tag = FalconImemTag::from(value).tag();
                self.falcon(instance).imem_tags.push(tag);
            }
            minion::FALCON_BOOTVEC => self.falcon(instance).boot_vector = Some(value),
            minion::FALCON_CPUCTL => {
                self.minion_set(instance, offset, value);
                let start = FalconCpuCtl::from_bits_truncate(value).contains(FalconCpuCtl::STARTCPU);
                if start && !self.knobs.boot_hang {
                    let status = MinionStatus::from(self.minion_get(instance, minion::MINION_STATUS));
                    self.minion_set(
                        instance,
                        minion::MINION_STATUS,
                        status.with_status(MINION_STATUS_BOOT).into(),
                    );
                }
            }
            _ => self.minion_set(instance, offset, value),
        }
    }

    fn dl_cmd(&mut self, instance: u32, local: u32, value: u32) {
        let addr = minion::nvlink_dl_cmd(local);
        let cmd = MinionDlCmd::from(value);
        if cmd.ready() {
            // Acknowledgement of a previous command, typically a fault clear.
            self.minion_set(instance, addr, value);
            return;
        }
        let link = instance * LINKS_PER_MINION + local;
        let command = match MinionCommand::from_repr(cmd.command()) {
            Some(command) => command,
            None => {
                self.minion_set(instance, addr, cmd.with_fault(true).with_ready(true).into());
                return;
            }
        };
        let scratch = self.minion_get(instance, minion::nvlink_dl_cmd_data(local));
        let faulted = self.knobs.failing_commands.contains(&command);
        self.commands.push(CommandRecord {
            seq: self.seq,
            link,
            command,
            scratch,
            faulted,
        });
        trace!("sim: link {} {} scratch 0x{:x}", link, command, scratch);

        if self.knobs.unresponsive_commands.contains(&command) {
            self.minion_set(instance, addr, value);
            return;
        }
        if faulted {
            let mn00 = Mn00Status::new()
                .with_link_intr_code(0x1)
                .with_link_intr_subcode(self.knobs.fault_subcode);
            self.model(link).mn00 = mn00.into();
            self.minion_set(instance, addr, cmd.with_fault(true).with_ready(true).into());
            return;
        }
        self.execute(instance, link, command, scratch);
        self.minion_set(instance, addr, cmd.with_ready(true).into());
    }

    fn execute(&mut self, instance: u32, link: u32, command: MinionCommand, scratch: u32) {
        match command {
            MinionCommand::InitPll => {
                self.set_clocks(link, ClockStatus::PLL_PWR_ON, ClockStatus::empty())
            }
            MinionCommand::TxClkSwitchPll => {
                if !self.knobs.txclk_switch_stuck {
                    self.set_clocks(link, ClockStatus::TXCLK_PLL, ClockStatus::empty())
                }
            }
            MinionCommand::InitPhy => {
                let clocks = ClockStatus::from_bits_truncate(self.link_get(link, nvlipt::CTRL_CLK_CTRL));
                if clocks.contains(ClockStatus::PLL_PWR_ON) && !self.knobs.txclk_switch_stuck {
                    self.set_clocks(link, ClockStatus::TXCLK_PLL, ClockStatus::empty());
                }
            }
            MinionCommand::TxClkSwitchAlt => self.set_clocks(
                link,
                ClockStatus::empty(),
                ClockStatus::PLL_PWR_ON | ClockStatus::TXCLK_PLL,
            ),
            // The ucode rewrites the error-control registers, as real INITPHASE1 does.
            MinionCommand::InitPhase1 => {
                self.link_set(link, nvlipt::ERR_REPORT_EN_0, 0);
                self.link_set(link, nvlipt::ERR_CONTAIN_EN_0, 0);
            }
            MinionCommand::TuringRxdet => {
                let found = !self.knobs.rxdet_missing;
                self.model(link).rxdet_found = found;
            }
            MinionCommand::InitLaneEnable => self.set_slsms(link, SublinkState::Safe),
            MinionCommand::LaneDisable | MinionCommand::LaneShutdown => {
                self.set_slsms(link, SublinkState::Off)
            }
            MinionCommand::InitOptimize => {
                let good = !self.knobs.training_good_never;
                self.model(link).training_good = good;
            }
            MinionCommand::InitNegotiate => self.model(link).config_good = true,
            MinionCommand::InitPhase5a => {
                let psave = PsaveStatus::new().with_pmsts(PSAVE_PMSTS_PSL0);
                self.link_set(link, phyctl::PSAVE_UCODE_CTRL_STS, psave.into());
            }
            MinionCommand::Swintr if !self.knobs.liveness_fail => {
                let status = MinionStatus::from(self.minion_get(instance, minion::MINION_STATUS));
                self.minion_set(
                    instance,
                    minion::MINION_STATUS,
                    status.with_intr_code(MINION_INTR_CODE_SWREQ).into(),
                );
            }
            MinionCommand::SetBufferReady => {
                if scratch & BUFFER_READY_TX != 0 {
                    self.link_set(link, nvltlc::TX_SYS_CTRL_BUFFER_READY, nvltlc::BUFFER_READY);
                }
                if scratch & BUFFER_READY_RX != 0 {
                    self.link_set(link, nvltlc::RX_SYS_CTRL_BUFFER_READY, nvltlc::BUFFER_READY);
                }
            }
            _ => {}
        }
    }

    fn dl_stat(&mut self, instance: u32, local: u32, value: u32) {
        let link = instance * LINKS_PER_MINION + local;
        let request = MinionDlStat::from(value);
        let model = self.model(link);
        let data = match DlStat::from_repr(request.status_idx()) {
            Some(DlStat::Mn00) => model.mn00,
            Some(DlStat::Uc01) => {
                let mut status = TrainingStatus::empty();
                status.set(TrainingStatus::TRAINING_GOOD, model.training_good);
                status.set(TrainingStatus::CONFIG_GOOD, model.config_good);
                status.bits()
            }
            Some(DlStat::Lnk2) if model.rxdet_found => LNK2_RXDET_LINK_STATUS_FOUND,
            _ => 0,
        };
        self.minion_set(instance, minion::nvlink_dl_stat_data(local), data);
        self.minion_set(
            instance,
            minion::nvlink_dl_stat(local),
            request.with_ready(true).into(),
        );
    }
}

/// Shared handle on the simulated device. Clones see the same registers,
/// so one can be handed to a `Device` and another kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct SimHardware {
    state: Arc<Mutex<SimState>>,
}

impl SimHardware {
    /// A device with `links` powered on and held in reset.
    pub fn new(links: &[u32]) -> Self {
        let sim = Self::default();
        {
            let mut state = sim.lock();
            for &link in links {
                state.power_on(link);
            }
        }
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn knobs(&self, f: impl FnOnce(&mut SimKnobs)) {
        f(&mut self.lock().knobs);
    }

    /// Takes the link out of reset behind the driver's back.
    pub fn release_reset(&self, link: u32) {
        self.lock().release_reset(link);
    }

    pub fn set_slsm(&self, link: u32, kind: SublinkKind, state: SublinkState) {
        self.lock().set_slsm(link, kind, state);
    }

    pub fn set_dl_state(&self, link: u32, state: DlState) {
        self.lock().set_dl(link, state);
    }

    pub fn set_tl_state(&self, link: u32, state: TlLinkState) {
        self.lock().set_tl(link, state);
    }

    pub fn peek_link(&self, link: u32, offset: u32) -> u32 {
        self.lock().link_get(link, offset)
    }

    pub fn poke_link(&self, link: u32, offset: u32, value: u32) {
        self.lock().link_set(link, offset, value);
    }

    pub fn peek_minion(&self, instance: u32, offset: u32) -> u32 {
        self.lock().minion_get(instance, offset)
    }

    pub fn poke_minion(&self, instance: u32, offset: u32, value: u32) {
        self.lock().minion_set(instance, offset, value);
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn writes_to_link(&self, link: u32, offset: u32) -> usize {
        let addr = RegAddr::link(link, offset);
        self.lock().writes.iter().filter(|w| w.addr == addr).count()
    }

    pub fn writes_to_minion(&self, instance: u32, offset: u32) -> usize {
        let addr = RegAddr::minion(instance, offset);
        self.lock().writes.iter().filter(|w| w.addr == addr).count()
    }

    pub fn command_log(&self) -> Vec<CommandRecord> {
        self.lock().commands.clone()
    }

    pub fn commands(&self, link: u32) -> Vec<MinionCommand> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.link == link)
            .map(|c| c.command)
            .collect()
    }

    /// Payload of the last `command` sent on `link`.
    pub fn scratch_of(&self, link: u32, command: MinionCommand) -> Option<u32> {
        self.lock()
            .commands
            .iter()
            .rev()
            .find(|c| c.link == link && c.command == command)
            .map(|c| c.scratch)
    }

    pub fn tl_requests(&self, link: u32) -> Vec<TlLinkState> {
        self.lock()
            .tl_requests
            .iter()
            .filter(|(l, _)| *l == link)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn imem_tags(&self, instance: u32) -> Vec<u16> {
        self.lock().falcon(instance).imem_tags.clone()
    }

    pub fn imem(&self, instance: u32) -> Vec<u8> {
        self.lock().falcon(instance).imem.clone()
    }

    pub fn dmem(&self, instance: u32) -> Vec<u8> {
        self.lock().falcon(instance).dmem.clone()
    }

    pub fn boot_vector(&self, instance: u32) -> Option<u32> {
        self.lock().falcon(instance).boot_vector
    }

    /// Forgets recorded writes, commands and TL requests.
    pub fn clear_logs(&self) {
        let mut state = self.lock();
        state.writes.clear();
        state.commands.clear();
        state.tl_requests.clear();
    }
}

impl RegisterIo for SimHardware {
    fn read32(&mut self, addr: RegAddr) -> u32 {
        self.lock().read(addr)
    }

    fn write32(&mut self, addr: RegAddr, value: u32) {
        self.lock().write(addr, value);
    }
}

/// Production and debug ucode images with one application each.
pub fn synthetic_firmware() -> MinionFirmware {
    let os_code: Vec<u8> = (0..300u32).map(|i| (i * 7 + 1) as u8).collect();
    let os_data = [0x5a; 8];
    let app_code = [0xc3; 16];
    let app_data = [0x3c; 8];
    let apps: [(&[u8], &[u8]); 1] = [(&app_code, &app_data)];
    MinionFirmware {
        production: UcodeImage::from_segments(0x0, &os_code, &os_data, &apps),
        debug: Some(UcodeImage::from_segments(0x100, &os_code, &os_data, &apps)),
    }
}
