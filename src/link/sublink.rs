// SPDX-License-Identifier: MIT

//! TX and RX sub-link state machines.

use crate::device::Device;
use crate::events::FaultCode;
use crate::minion::MinionCommand;
use crate::regs::{
    nvldl, phyctl, ChangeStatus, DlLinkState, DlState, SlsmStatus, SublinkChange, SublinkState,
    SublinkSubstate, SUBLINK_CHANGE_ACTION_SLSM_CHANGE, SUBLINK_CHANGE_ACTION_SLSM_FORCE,
    SUBLINK_RX, SUBLINK_TX,
};
use crate::timeout::{poll_until, Poll};
use crate::{Error, Result};
use log::{debug, error};
use serde::Serialize;
use std::thread;
use strum::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum SublinkKind {
    Tx,
    Rx,
}

impl SublinkKind {
    fn status_reg(self) -> u32 {
        match self {
            SublinkKind::Tx => nvldl::TX_SLSM_STATUS_TX,
            SublinkKind::Rx => nvldl::RX_SLSM_STATUS_RX,
        }
    }

    fn select(self) -> u8 {
        match self {
            SublinkKind::Tx => SUBLINK_TX,
            SublinkKind::Rx => SUBLINK_RX,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum SublinkMode {
    Hs,
    SingleLane,
    Train,
    Safe,
    Off,
    LowPower,
}

impl From<SublinkState> for SublinkMode {
    fn from(state: SublinkState) -> Self {
        match state {
            SublinkState::Hs => SublinkMode::Hs,
            SublinkState::SingleLane => SublinkMode::SingleLane,
            SublinkState::Train => SublinkMode::Train,
            SublinkState::Safe => SublinkMode::Safe,
            SublinkState::Off => SublinkMode::Off,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Sublink {
    pub kind: SublinkKind,
    pub mode: SublinkMode,
    pub substate: SublinkSubstate,
}

impl Sublink {
    pub fn tx() -> Self {
        Self::off(SublinkKind::Tx)
    }

    pub fn rx() -> Self {
        Self::off(SublinkKind::Rx)
    }

    fn off(kind: SublinkKind) -> Self {
        Self {
            kind,
            mode: SublinkMode::Off,
            substate: SublinkSubstate::Stable,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum TxMode {
    CommonMode,
    CommonModeDisable,
    DataReady,
    PrbsEn,
    PostHs,
    Eq,
    Hs,
    Train,
    Safe,
    Off,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum RxMode {
    Hs,
    Train,
    Safe,
    Off,
    RxCal,
    InitTerm,
}

impl Device {
    /// Common guard of every sub-link request. `Ok(false)` means the link is
    /// termination only and nothing is to be done.
    fn sublink_request_allowed(&mut self, link: u32, what: &str) -> Result<bool> {
        if self.link(link)?.remote_end_disabled {
            debug!("Link {}: {} skipped on termination link", link, what);
            return Ok(false);
        }
        if self.is_link_in_reset(link) {
            error!("Link {}: {} requested while in reset", link, what);
            return Err(Error::InvalidState(format!(
                "link {} is in reset, cannot set {}",
                link, what
            )));
        }
        self.poll_sublink_state(link)?;
        Ok(true)
    }

    fn slsm_state(&mut self, link: u32, kind: SublinkKind) -> Result<(SublinkState, SublinkSubstate)> {
        let status = SlsmStatus::from(self.link_rd(link, kind.status_reg()));
        let state = SublinkState::from_repr(status.primary_state()).ok_or_else(|| {
            Error::InvalidState(format!(
                "link {} {} SLSM reports unknown state 0x{:x}",
                link,
                kind,
                status.primary_state()
            ))
        })?;
        let substate =
            SublinkSubstate::from_repr(status.substate()).unwrap_or(SublinkSubstate::Settling);
        Ok((state, substate))
    }

    /// Moves a sub-link to SAFE or OFF through SUBLINK_CHANGE.
    fn change_sublink(&mut self, link: u32, kind: SublinkKind, target: SublinkState) -> Result<()> {
        let (current, _) = self.slsm_state(link, kind)?;
        if current == target {
            debug!("Link {}: {} already {}", link, kind, target);
            self.refresh_sublink(link, kind)?;
            return Ok(());
        }
        if current == SublinkState::Hs && target == SublinkState::Off {
            error!("Link {}: {} cannot go from HS directly to OFF", link, kind);
            return Err(Error::InvalidState(format!(
                "link {} {} HS -> OFF must pass through SAFE",
                link, kind
            )));
        }

        let mut change = SublinkChange::new()
            .with_new_state(target as u8)
            .with_sublink(kind.select())
            .with_old_state_mask(0xf);
        change = if target == SublinkState::Off {
            change
                .with_action(SUBLINK_CHANGE_ACTION_SLSM_FORCE)
                .with_countdown_immediate(true)
        } else {
            change.with_action(SUBLINK_CHANGE_ACTION_SLSM_CHANGE)
        };
        debug!("Link {}: {} {} -> {}", link, kind, current, target);
        self.link_wr(link, nvldl::TOP_SUBLINK_CHANGE, change.into());
        self.poll_sublink_state(link)?;
        self.refresh_sublink(link, kind)
    }

    fn refresh_sublink(&mut self, link: u32, kind: SublinkKind) -> Result<()> {
        let (mode, substate) = self.get_sublink_mode(link, kind)?;
        let record = self.link_mut(link)?;
        let sublink = match kind {
            SublinkKind::Tx => &mut record.tx,
            SublinkKind::Rx => &mut record.rx,
        };
        sublink.mode = mode;
        sublink.substate = substate;
        Ok(())
    }

    pub fn set_tx_mode(&mut self, link: u32, mode: TxMode) -> Result<()> {
        if !self.sublink_request_allowed(link, &format!("TX {}", mode))? {
            return Ok(());
        }
        match mode {
            TxMode::CommonMode => {
                let hal = self.hal;
                hal.init_dl_pll(self, link)
            }
            TxMode::DataReady => {
                let result = self.send_minion_command(link, MinionCommand::InitDlpl, 0);
                self.report_on_error(FaultCode::InitDlplFailure, link, result)?;
                let result = self.send_minion_command(link, MinionCommand::InitLaneEnable, 0);
                self.report_on_error(FaultCode::InitLaneEnableFailure, link, result)
            }
            TxMode::Safe => self.change_sublink(link, SublinkKind::Tx, SublinkState::Safe),
            TxMode::Off => self.change_sublink(link, SublinkKind::Tx, SublinkState::Off),
            // HS and TRAIN are reached by the ucode during training.
            TxMode::Hs | TxMode::Train => Ok(()),
            TxMode::CommonModeDisable | TxMode::PrbsEn | TxMode::PostHs | TxMode::Eq => {
                debug!("Link {}: TX {} needs no action", link, mode);
                Ok(())
            }
        }
    }

    pub fn set_rx_mode(&mut self, link: u32, mode: RxMode) -> Result<()> {
        if !self.sublink_request_allowed(link, &format!("RX {}", mode))? {
            return Ok(());
        }
        match mode {
            RxMode::Off => self.change_sublink(link, SublinkKind::Rx, SublinkState::Off),
            RxMode::RxCal => self.rx_calibrate(link),
            RxMode::InitTerm => self.minion_set_rx_term(link),
            RxMode::Hs | RxMode::Train | RxMode::Safe => Ok(()),
        }
    }

    fn rx_calibrate(&mut self, link: u32) -> Result<()> {
        let ctl = self.link_rd(link, phyctl::CFG_CTL_6);
        self.link_wr(link, phyctl::CFG_CTL_6, ctl | phyctl::CFG_CTL_6_RXCAL);
        thread::sleep(self.timeouts.rxcal_settle);
        let status = self.link_rd(link, phyctl::CFG_STATUS_0);
        if status & phyctl::CFG_STATUS_0_RXCAL_DONE == 0 {
            error!("Link {}: RXCAL not done, CFG_STATUS_0 0x{:08x}", link, status);
            return Err(Error::HardwareFault {
                link,
                what: "RXCAL".to_string(),
                code: status,
                subcode: 0,
            });
        }
        Ok(())
    }

    pub fn set_rx_detect(&mut self, link: u32) -> Result<()> {
        if self.link(link)?.remote_end_disabled {
            return Ok(());
        }
        self.send_minion_command(link, MinionCommand::TuringRxdet, 0)
    }

    pub fn get_rx_detect(&mut self, link: u32) -> Result<()> {
        if self.link(link)?.remote_end_disabled {
            return Ok(());
        }
        self.minion_rxdet_status(link)
    }

    fn get_sublink_mode(&mut self, link: u32, kind: SublinkKind) -> Result<(SublinkMode, SublinkSubstate)> {
        if self.is_link_in_reset(link) {
            return Ok((SublinkMode::Off, SublinkSubstate::Stable));
        }
        let (state, substate) = self.slsm_state(link, kind)?;
        if state == SublinkState::Off {
            let dl = DlLinkState::from(self.link_rd(link, nvldl::TOP_LINK_STATE));
            if DlState::from_repr(dl.state()) == Some(DlState::Active) {
                return Ok((SublinkMode::LowPower, substate));
            }
        }
        Ok((state.into(), substate))
    }

    pub fn get_tx_mode(&mut self, link: u32) -> Result<(SublinkMode, SublinkSubstate)> {
        self.link(link)?;
        self.get_sublink_mode(link, SublinkKind::Tx)
    }

    pub fn get_rx_mode(&mut self, link: u32) -> Result<(SublinkMode, SublinkSubstate)> {
        self.link(link)?;
        self.get_sublink_mode(link, SublinkKind::Rx)
    }

    /// Waits until no sub-link change is in flight.
    pub fn poll_sublink_state(&mut self, link: u32) -> Result<()> {
        let budget = self.timeouts.sublink_change;
        let interval = self.timeouts.poll_interval;
        let what = format!("sublink change on link {}", link);
        poll_until(&what, budget, interval, || {
            let raw = self.link_rd(link, nvldl::TOP_SUBLINK_CHANGE);
            let change = SublinkChange::from(raw);
            match ChangeStatus::from_repr(change.status()) {
                Some(ChangeStatus::Done) => Poll::Ready(()),
                Some(ChangeStatus::Fault) => Poll::Failed(Error::HardwareFault {
                    link,
                    what: "sublink change".to_string(),
                    code: raw,
                    subcode: 0,
                }),
                _ => Poll::Pending(raw),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Chip;
    use crate::sim::testing;
    use simplelog::{Config, LevelFilter, TestLogger};
    use strum::IntoEnumIterator;

    fn pair_states() -> impl Iterator<Item = SublinkState> {
        SublinkState::iter().filter(|state| *state != SublinkState::SingleLane)
    }

    fn tx_mode_for(state: SublinkState) -> TxMode {
        match state {
            SublinkState::Hs => TxMode::Hs,
            SublinkState::Train => TxMode::Train,
            SublinkState::Safe => TxMode::Safe,
            _ => TxMode::Off,
        }
    }

    #[test]
    fn test_tx_hs_to_off_is_the_only_illegal_pair() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        for from in pair_states() {
            for to in pair_states() {
                sim.set_slsm(0, SublinkKind::Tx, from);
                let before = sim.writes_to_link(0, nvldl::TOP_SUBLINK_CHANGE);
                let result = dev.set_tx_mode(0, tx_mode_for(to));
                let after = sim.writes_to_link(0, nvldl::TOP_SUBLINK_CHANGE);
                if from == SublinkState::Hs && to == SublinkState::Off {
                    assert!(matches!(result, Err(Error::InvalidState(_))));
                    assert_eq!(before, after);
                } else {
                    assert!(result.is_ok(), "{} -> {}: {:?}", from, to, result);
                }
            }
        }

        // The legal way down from HS.
        sim.set_slsm(0, SublinkKind::Tx, SublinkState::Hs);
        dev.set_tx_mode(0, TxMode::Safe).unwrap();
        dev.set_tx_mode(0, TxMode::Off).unwrap();
        assert_eq!(dev.link(0).unwrap().tx.mode, SublinkMode::Off);
    }

    #[test]
    fn test_rx_hs_to_off_rejected() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        sim.set_slsm(0, SublinkKind::Rx, SublinkState::Hs);
        assert!(matches!(
            dev.set_rx_mode(0, RxMode::Off),
            Err(Error::InvalidState(_))
        ));
        sim.set_slsm(0, SublinkKind::Rx, SublinkState::Safe);
        dev.set_rx_mode(0, RxMode::Off).unwrap();
        assert_eq!(dev.get_rx_mode(0).unwrap().0, SublinkMode::Off);
    }

    #[test]
    fn test_current_state_requests_write_nothing() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        for (state, mode) in [(SublinkState::Safe, TxMode::Safe), (SublinkState::Off, TxMode::Off)] {
            sim.set_slsm(0, SublinkKind::Tx, state);
            let before = sim.write_count();
            dev.set_tx_mode(0, mode).unwrap();
            assert_eq!(sim.write_count(), before);
        }
        sim.set_slsm(0, SublinkKind::Rx, SublinkState::Off);
        let before = sim.write_count();
        dev.set_rx_mode(0, RxMode::Off).unwrap();
        assert_eq!(sim.write_count(), before);
    }

    #[test]
    fn test_no_sublink_request_in_reset() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        let before = sim.write_count();
        assert!(matches!(
            dev.set_tx_mode(0, TxMode::Safe),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            dev.set_rx_mode(0, RxMode::RxCal),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(sim.write_count(), before);
        assert_eq!(dev.get_tx_mode(0).unwrap().0, SublinkMode::Off);
    }

    #[test]
    fn test_termination_link_skips_hardware() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let mut config = crate::DeviceConfig::default();
        config.disabled_remote_end_mask = 1 << 1;
        let (mut dev, sim, _) = testing::ready_device_with(Chip::Lr10, &[1], config);
        let before = sim.write_count();
        dev.set_tx_mode(1, TxMode::CommonMode).unwrap();
        dev.set_rx_mode(1, RxMode::RxCal).unwrap();
        assert_eq!(sim.write_count(), before);
    }

    #[test]
    fn test_sublink_fault_and_rxcal_failure() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        sim.knobs(|k| k.sublink_fault = true);
        sim.set_slsm(0, SublinkKind::Tx, SublinkState::Hs);
        assert!(matches!(
            dev.set_tx_mode(0, TxMode::Safe),
            Err(Error::HardwareFault { .. })
        ));

        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        sim.knobs(|k| k.rxcal_fail = true);
        assert!(matches!(
            dev.set_rx_mode(0, RxMode::RxCal),
            Err(Error::HardwareFault { .. })
        ));
    }

    #[test]
    fn test_off_while_dl_active_reads_as_low_power() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        sim.set_slsm(0, SublinkKind::Rx, SublinkState::Off);
        sim.set_dl_state(0, DlState::Active);
        assert_eq!(dev.get_rx_mode(0).unwrap().0, SublinkMode::LowPower);
        sim.set_dl_state(0, DlState::Swcfg);
        assert_eq!(dev.get_rx_mode(0).unwrap().0, SublinkMode::Off);
    }

    #[test]
    fn test_data_ready_and_rx_detect() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[3]);
        sim.release_reset(3);
        dev.set_tx_mode(3, TxMode::DataReady).unwrap();
        dev.set_rx_detect(3).unwrap();
        dev.get_rx_detect(3).unwrap();
        assert_eq!(
            sim.commands(3),
            vec![
                MinionCommand::InitDlpl,
                MinionCommand::InitLaneEnable,
                MinionCommand::TuringRxdet
            ]
        );

        sim.knobs(|k| k.rxdet_missing = true);
        dev.set_rx_detect(3).unwrap();
        assert!(dev.get_rx_detect(3).unwrap_err().is_timeout());
    }
}
