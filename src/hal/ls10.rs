// SPDX-License-Identifier: MIT

use super::{wait_for_clock, Chip, ChipHal};
use crate::config::{LineRate, TrainingModel};
use crate::device::Device;
use crate::events::FaultCode;
use crate::link::dl::DlLinkMode;
use crate::minion::{DlStat, MinionCommand, BUFFER_READY_RX, BUFFER_READY_TX};
use crate::regs::{
    nvldl, nvlipt, nvltlc, phyctl, ClockStatus, DlLinkState, LinkReset, LinkStateRequest,
    Mn00Status, PsaveStatus, SlsmStatus, TlRequest, PSAVE_PMSTS_PSL0,
};
use crate::timeout::{poll_until, Poll};
use crate::{Error, Result};
use log::{debug, error, info, warn};

pub struct Ls10Hal;

pub static LS10_HAL: Ls10Hal = Ls10Hal;

impl ChipHal for Ls10Hal {
    fn chip(&self) -> Chip {
        Chip::Ls10
    }

    fn max_links(&self) -> u32 {
        64
    }

    fn training_model(&self) -> TrainingModel {
        TrainingModel::Ali
    }

    fn supports_ali(&self) -> bool {
        true
    }

    fn supports_recal_settings(&self) -> bool {
        true
    }

    fn loopback_before_initphase1(&self) -> bool {
        true
    }

    fn line_rate_code(&self, rate: LineRate) -> Result<u8> {
        match rate {
            LineRate::Gbps100 => Ok(0x8),
            LineRate::Gbps106_25 => Ok(0x9),
            other => Err(Error::Configuration(format!(
                "line rate {} is not supported by LS10",
                other
            ))),
        }
    }

    /// A link also counts as in reset while its RX, TX and NCISOC clocks are all off.
    fn is_link_in_reset(&self, dev: &mut Device, link: u32) -> bool {
        let reset = LinkReset::from(dev.link_rd(link, nvlipt::RESET_RSTSEQ_LINK_RESET));
        let clocks = ClockStatus::from_bits_truncate(dev.link_rd(link, nvlipt::CTRL_CLK_CTRL));
        let gated = !clocks
            .intersects(ClockStatus::RXCLK_ON | ClockStatus::TXCLK_ON | ClockStatus::NCISOCCLK_ON);
        reset.link_reset_status() || gated
    }

    fn init_dl_pll(&self, dev: &mut Device, link: u32) -> Result<()> {
        if dev.config.platform.is_emulation() {
            info!("Link {}: skipping PLL init on emulation", link);
            return Ok(());
        }
        let result = dev.send_minion_command(link, MinionCommand::InitPll, 0);
        dev.report_on_error(FaultCode::InitPllFailure, link, result)?;

        let result = dev.send_minion_command(link, MinionCommand::InitPhy, 0);
        dev.report_on_error(FaultCode::InitPhyFailure, link, result)?;

        let result = wait_for_clock(dev, link, ClockStatus::TXCLK_PLL);
        dev.report_on_error(FaultCode::TxClkSwitchFailure, link, result)
    }

    fn init_buffer_ready(&self, dev: &mut Device, link: u32, nport: bool) -> Result<()> {
        let skip = dev.config.skip_buffer_ready;
        if !skip.tlc {
            let tx = dev.link_rd(link, nvltlc::TX_SYS_CTRL_BUFFER_READY) & nvltlc::BUFFER_READY;
            let rx = dev.link_rd(link, nvltlc::RX_SYS_CTRL_BUFFER_READY) & nvltlc::BUFFER_READY;
            if tx != 0 && rx != 0 {
                debug!("Link {}: buffer ready already set", link);
            } else {
                match dev.send_minion_command(
                    link,
                    MinionCommand::SetBufferReady,
                    BUFFER_READY_TX | BUFFER_READY_RX,
                ) {
                    Err(err) if err.is_not_initialized() => {
                        warn!("Link {}: SET_BUFFER_READY skipped: {}", link, err);
                    }
                    other => other?,
                }
            }
        }
        if nport && !skip.nport {
            dev.link_wr(link, nvltlc::NPORT_CTRL_BUFFER_READY, nvltlc::BUFFER_READY);
        }
        Ok(())
    }

    fn unilateral_shutdown(&self, dev: &mut Device, link: u32) {
        if let Err(err) = dev.request_tl_link_state_with_retry(link, TlRequest::Shutdown) {
            warn!("Link {}: TL shutdown failed: {}", link, err);
        }
        if let Err(err) = dev.set_dl_link_mode(link, DlLinkMode::Off) {
            warn!("Link {}: link off failed: {}", link, err);
        }
    }

    fn dump_tl_request_debug(&self, dev: &mut Device, link: u32) {
        let request = LinkStateRequest::from(dev.link_rd(link, nvlipt::CTRL_LINK_STATE_REQUEST));
        let dl = DlLinkState::from(dev.link_rd(link, nvldl::TOP_LINK_STATE));
        let tx = SlsmStatus::from(dev.link_rd(link, nvldl::TX_SLSM_STATUS_TX));
        let rx = SlsmStatus::from(dev.link_rd(link, nvldl::RX_SLSM_STATUS_RX));
        let subcode = dev
            .get_dl_status(link, DlStat::Mn00, 0)
            .map(|data| Mn00Status::from(data).link_intr_subcode());
        error!(
            "Link {}: ALI debug: request 0x{:08x} DL state 0x{:x} TX SLSM 0x{:x}/0x{:x} RX SLSM 0x{:x}/0x{:x} MINION subcode {:?}",
            link,
            u32::from(request),
            dl.state(),
            tx.primary_state(),
            tx.substate(),
            rx.primary_state(),
            rx.substate(),
            subcode
        );
    }

    fn initphase5(&self, dev: &mut Device, link: u32) -> Result<()> {
        dev.send_minion_command(link, MinionCommand::InitPhase5a, 0)?;
        let budget = dev.timeouts.phase5_psl0;
        let interval = dev.timeouts.poll_interval;
        let what = format!("PSAVE PSL0 on link {}", link);
        poll_until(&what, budget, interval, || {
            let value = dev.link_rd(link, phyctl::PSAVE_UCODE_CTRL_STS);
            if PsaveStatus::from(value).pmsts() == PSAVE_PMSTS_PSL0 {
                Poll::Ready(())
            } else {
                Poll::Pending(value)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minion::MinionState;
    use crate::link::sublink::TxMode;
    use crate::sim::testing;
    use simplelog::{Config, LevelFilter, TestLogger};

    #[test]
    fn test_reset_includes_gated_clocks() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Ls10, &[0]);
        assert!(LS10_HAL.is_link_in_reset(&mut dev, 0));
        sim.release_reset(0);
        assert!(!LS10_HAL.is_link_in_reset(&mut dev, 0));
        sim.poke_link(0, nvlipt::CTRL_CLK_CTRL, 0);
        assert!(LS10_HAL.is_link_in_reset(&mut dev, 0));
        assert!(!crate::hal::lr10::LR10_HAL.is_link_in_reset(&mut dev, 0));
    }

    #[test]
    fn test_common_mode_fails_when_txclk_never_switches() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::ready_device(Chip::Ls10, &[2]);
        sim.release_reset(2);
        sim.knobs(|k| k.txclk_switch_stuck = true);
        assert!(matches!(
            dev.set_tx_mode(2, TxMode::CommonMode),
            Err(Error::Timeout { .. })
        ));
        let faults = events.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code, FaultCode::TxClkSwitchFailure);
        assert_eq!(faults[0].link, Some(2));
        assert_eq!(sim.commands(2), vec![MinionCommand::InitPll, MinionCommand::InitPhy]);
    }

    #[test]
    fn test_pll_sequence() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Ls10, &[2]);
        sim.release_reset(2);
        LS10_HAL.init_dl_pll(&mut dev, 2).unwrap();
        assert_eq!(
            sim.commands(2),
            vec![MinionCommand::InitPll, MinionCommand::InitPhy]
        );
    }

    #[test]
    fn test_buffer_ready_via_minion() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Ls10, &[0]);
        LS10_HAL.init_buffer_ready(&mut dev, 0, false).unwrap();
        assert_eq!(sim.commands(0), vec![MinionCommand::SetBufferReady]);
        assert_eq!(
            sim.scratch_of(0, MinionCommand::SetBufferReady),
            Some(BUFFER_READY_TX | BUFFER_READY_RX)
        );

        // Already set, nothing more is sent.
        LS10_HAL.init_buffer_ready(&mut dev, 0, false).unwrap();
        assert_eq!(sim.commands(0).len(), 1);
    }

    #[test]
    fn test_buffer_ready_tolerates_uninitialized_minion() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::device(Chip::Ls10, &[0], crate::DeviceConfig::default());
        assert_eq!(dev.minion_state(0), Some(MinionState::Uninitialized));
        LS10_HAL.init_buffer_ready(&mut dev, 0, false).unwrap();
        assert!(sim.commands(0).is_empty());
    }

    #[test]
    fn test_initphase5_waits_for_psl0() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Ls10, &[1]);
        LS10_HAL.initphase5(&mut dev, 1).unwrap();
        assert_eq!(sim.commands(1), vec![MinionCommand::InitPhase5a]);
    }
}
