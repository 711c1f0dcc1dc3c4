// SPDX-License-Identifier: MIT

//! Data link layer: LTSSM transitions and the DL-level firmware steps.

use crate::device::Device;
use crate::events::{FaultCode, PortEvent};
use crate::link::LinkMode;
use crate::minion::MinionCommand;
use crate::regs::{
    nvldl, nvlipt, ChangeStatus, DlInterrupts, DlLinkState, DlState, LinkChange, LinkReset,
    LinkStateStatus, TlLinkState, TlRequest, LINK_CHANGE_ACTION_LTSSM_CHANGE,
};
use crate::timeout::{poll_until, Poll};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use strum::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum DlLinkMode {
    Off,
    Reset,
    Safe,
    Active,
    EnablePm,
    DisablePm,
    LaneDisable,
    LaneShutdown,
    InitPhase1,
    InitOptimize,
    PostInitOptimize,
    InitTl,
    InitNegotiate,
    PostInitNegotiate,
    DisableErrDetect,
    TrafficSetup { sync: bool },
    InitPhase5,
}

impl Device {
    pub fn is_link_in_reset(&mut self, link: u32) -> bool {
        let hal = self.hal;
        hal.is_link_in_reset(self, link)
    }

    fn dl_state(&mut self, link: u32) -> Result<DlState> {
        let raw = DlLinkState::from(self.link_rd(link, nvldl::TOP_LINK_STATE));
        DlState::from_repr(raw.state()).ok_or_else(|| {
            Error::InvalidState(format!(
                "link {} DL reports unknown state 0x{:x}",
                link,
                raw.state()
            ))
        })
    }

    fn require_out_of_reset(&mut self, link: u32, what: DlLinkMode) -> Result<()> {
        if self.is_link_in_reset(link) {
            error!("Link {}: DL {} requested while in reset", link, what);
            return Err(Error::InvalidState(format!(
                "link {} is in reset, cannot enter {}",
                link, what
            )));
        }
        Ok(())
    }

    /// Releases the RSTSEQ link reset.
    pub fn deassert_link_reset(&mut self, link: u32) -> Result<()> {
        let reset = LinkReset::from(self.link_rd(link, nvlipt::RESET_RSTSEQ_LINK_RESET));
        self.link_wr(
            link,
            nvlipt::RESET_RSTSEQ_LINK_RESET,
            reset.with_link_reset(false).into(),
        );
        let budget = self.timeouts.reset_deassert;
        let interval = self.timeouts.poll_interval;
        let what = format!("reset deassert on link {}", link);
        poll_until(&what, budget, interval, || {
            let raw = self.link_rd(link, nvlipt::RESET_RSTSEQ_LINK_RESET);
            if LinkReset::from(raw).link_reset_status() {
                Poll::Pending(raw)
            } else {
                Poll::Ready(())
            }
        })
    }

    fn change_ltssm(&mut self, link: u32, target: DlState) -> Result<()> {
        let change = LinkChange::new()
            .with_action(LINK_CHANGE_ACTION_LTSSM_CHANGE)
            .with_new_state(target as u8)
            .with_old_state_mask(0xf);
        self.link_wr(link, nvldl::TOP_LINK_CHANGE, change.into());

        let budget = self.timeouts.sublink_change;
        let interval = self.timeouts.poll_interval;
        let what = format!("LTSSM change to {} on link {}", target, link);
        poll_until(&what, budget, interval, || {
            let raw = self.link_rd(link, nvldl::TOP_LINK_CHANGE);
            match ChangeStatus::from_repr(LinkChange::from(raw).status()) {
                Some(ChangeStatus::Done) => Poll::Ready(()),
                Some(ChangeStatus::Fault) => Poll::Failed(Error::HardwareFault {
                    link,
                    what: format!("LTSSM change to {}", target),
                    code: raw,
                    subcode: 0,
                }),
                _ => Poll::Pending(raw),
            }
        })
    }

    fn wait_for_dl_state(&mut self, link: u32, target: DlState) -> Result<()> {
        let budget = self.timeouts.sublink_change;
        let interval = self.timeouts.poll_interval;
        let what = format!("DL {} on link {}", target, link);
        poll_until(&what, budget, interval, || {
            let raw = self.link_rd(link, nvldl::TOP_LINK_STATE);
            if DlState::from_repr(DlLinkState::from(raw).state()) == Some(target) {
                Poll::Ready(())
            } else {
                Poll::Pending(raw)
            }
        })
    }

    fn set_dl_safe(&mut self, link: u32) -> Result<()> {
        self.require_out_of_reset(link, DlLinkMode::Safe)?;
        match self.dl_state(link)? {
            DlState::Swcfg => {
                debug!("Link {}: already in SAFE", link);
            }
            DlState::Hwcfg => {
                debug!("Link {}: already transitioning to SAFE", link);
            }
            DlState::Init => {
                self.change_ltssm(link, DlState::Hwcfg)?;
                self.wait_for_dl_state(link, DlState::Swcfg)?;
            }
            DlState::Active => {
                self.change_ltssm(link, DlState::Swcfg)?;
                self.wait_for_dl_state(link, DlState::Swcfg)?;
            }
            other => {
                return Err(Error::InvalidState(format!(
                    "link {} cannot enter SAFE from {}",
                    link, other
                )))
            }
        }
        self.link_mut(link)?.mode = LinkMode::Safe;
        Ok(())
    }

    fn set_dl_active(&mut self, link: u32) -> Result<()> {
        self.require_out_of_reset(link, DlLinkMode::Active)?;
        match self.dl_state(link)? {
            DlState::Active => {
                debug!("Link {}: already ACTIVE", link);
            }
            DlState::Swcfg => {
                self.change_ltssm(link, DlState::Active)?;
                self.wait_for_dl_state(link, DlState::Active)?;
            }
            other => {
                error!("Link {}: ACTIVE requested from DL {}", link, other);
                return Err(Error::InvalidState(format!(
                    "link {} cannot enter ACTIVE from {}",
                    link, other
                )));
            }
        }
        self.link_mut(link)?.mode = LinkMode::Active;
        Ok(())
    }

    fn set_dl_off(&mut self, link: u32) -> Result<()> {
        if self.config.platform.is_emulation() {
            info!("Link {}: PLL power down skipped on emulation", link);
        } else if let Err(err) = self.send_minion_command(link, MinionCommand::TxClkSwitchAlt, 0) {
            error!("Link {}: PLL power down failed: {}", link, err);
        }
        self.link_mut(link)?.mode = LinkMode::Off;
        self.notify_port(link, PortEvent::Down);
        Ok(())
    }

    fn send_step_command(&mut self, link: u32, command: MinionCommand, code: FaultCode) -> Result<()> {
        let result = self.send_minion_command(link, command, 0);
        self.report_on_error(code, link, result)
    }

    /// INITPHASE1 then receiver and transmitter termination, for links whose
    /// remote end is absent.
    pub fn link_termination_setup(&mut self, link: u32) -> Result<()> {
        info!("Link {}: termination only setup", link);
        self.send_step_command(link, MinionCommand::InitPhase1, FaultCode::InitPhase1Failure)?;
        self.send_minion_command(link, MinionCommand::InitRxTxTerm, 0)
    }

    /// Programs near-end loopback for every enabled mode.
    pub fn setup_link_loopback_mode(&mut self, link: u32) -> Result<()> {
        let loopback = self.link(link)?.loopback;
        for (enabled, command) in [
            (loopback.nea, MinionCommand::SetNea),
            (loopback.nedr, MinionCommand::SetNedr),
            (loopback.nedw, MinionCommand::SetNedw),
        ] {
            if enabled {
                info!("Link {}: loopback {}", link, command);
                self.send_minion_command(link, command, 0)?;
            }
        }
        Ok(())
    }

    pub fn set_dl_link_mode(&mut self, link: u32, mode: DlLinkMode) -> Result<()> {
        if self.link(link)?.remote_end_disabled {
            if mode == DlLinkMode::InitPhase1 {
                return self.link_termination_setup(link);
            }
            debug!("Link {}: DL {} skipped on termination link", link, mode);
            return Ok(());
        }
        debug!("Link {}: DL mode {}", link, mode);

        match mode {
            DlLinkMode::Safe => self.set_dl_safe(link),
            DlLinkMode::Active => self.set_dl_active(link),
            DlLinkMode::Off => self.set_dl_off(link),
            DlLinkMode::Reset => {
                self.request_tl_link_state(link, TlRequest::Reset, true)?;
                self.link_mut(link)?.mode = LinkMode::Reset;
                Ok(())
            }
            DlLinkMode::EnablePm => {
                if self.config.enable_pm {
                    self.send_minion_command(link, MinionCommand::EnablePm, 0)
                } else {
                    debug!("Link {}: power management disabled by configuration", link);
                    Ok(())
                }
            }
            DlLinkMode::DisablePm => {
                if self.config.enable_pm {
                    self.send_minion_command(link, MinionCommand::DisablePm, 0)
                } else {
                    debug!("Link {}: power management disabled by configuration", link);
                    Ok(())
                }
            }
            DlLinkMode::LaneDisable => {
                self.send_minion_command(link, MinionCommand::LaneDisable, 0)
            }
            DlLinkMode::LaneShutdown => {
                self.send_minion_command(link, MinionCommand::LaneShutdown, 0)
            }
            DlLinkMode::InitPhase1 => {
                self.send_step_command(link, MinionCommand::InitPhase1, FaultCode::InitPhase1Failure)
            }
            DlLinkMode::InitOptimize => self.send_step_command(
                link,
                MinionCommand::InitOptimize,
                FaultCode::InitOptimizeFailure,
            ),
            DlLinkMode::PostInitOptimize => {
                let result = self.minion_initoptimize_status(link);
                self.report_on_error(FaultCode::InitOptimizeFailure, link, result)
            }
            DlLinkMode::InitTl => {
                self.send_step_command(link, MinionCommand::InitTl, FaultCode::InitTlFailure)
            }
            DlLinkMode::InitNegotiate => self.send_step_command(
                link,
                MinionCommand::InitNegotiate,
                FaultCode::InitNegotiateFailure,
            ),
            DlLinkMode::PostInitNegotiate => {
                let result = self.minion_initnegotiate_status(link);
                self.report_on_error(FaultCode::InitNegotiateFailure, link, result)?;
                self.store_topology(link).map(|_| ())
            }
            DlLinkMode::DisableErrDetect => {
                self.link_wr(link, nvldl::TOP_INTR_STALL_EN, 0);
                self.link_wr(link, nvldl::TOP_INTR_NONSTALL_EN, 0);
                self.link_wr(link, nvldl::TOP_INTR, DlInterrupts::all().bits());
                Ok(())
            }
            DlLinkMode::TrafficSetup { sync } => {
                self.request_tl_link_state(link, TlRequest::Active, sync)?;
                self.init_buffer_ready(link, true)
            }
            DlLinkMode::InitPhase5 => {
                let hal = self.hal;
                hal.initphase5(self, link)
            }
        }
    }

    pub fn get_dl_link_mode(&mut self, link: u32) -> Result<LinkMode> {
        self.link(link)?;
        if self.is_link_in_reset(link) {
            return Ok(LinkMode::Reset);
        }
        let mode = match self.dl_state(link)? {
            DlState::Init => LinkMode::Off,
            DlState::Hwcfg | DlState::Hwpcfg => LinkMode::Detect,
            DlState::Swcfg => LinkMode::Safe,
            DlState::Active => LinkMode::Active,
            DlState::Fault => LinkMode::Fault,
            DlState::RcvyAc | DlState::RcvyRx => LinkMode::Recovery,
            DlState::Sleep => {
                let status = LinkStateStatus::from(self.link_rd(link, nvlipt::CTRL_LINK_STATE_STATUS));
                if TlLinkState::from_repr(status.current_link_state()) == Some(TlLinkState::L2) {
                    LinkMode::Sleep
                } else {
                    warn!("Link {}: DL sleeping while TL is not in L2", link);
                    LinkMode::Active
                }
            }
        };
        Ok(mode)
    }
}
