// SPDX-License-Identifier: MIT

use super::{wait_for_clock, Chip, ChipHal};
use crate::config::{LineRate, TrainingModel};
use crate::device::Device;
use crate::events::FaultCode;
use crate::minion::MinionCommand;
use crate::regs::{nvlipt, nvltlc, ClockStatus, LinkReset};
use crate::{Error, Result};
use log::{debug, info};

pub struct Lr10Hal;

pub static LR10_HAL: Lr10Hal = Lr10Hal;

impl ChipHal for Lr10Hal {
    fn chip(&self) -> Chip {
        Chip::Lr10
    }

    fn max_links(&self) -> u32 {
        36
    }

    fn training_model(&self) -> TrainingModel {
        TrainingModel::Legacy
    }

    fn loopback_before_initphase1(&self) -> bool {
        false
    }

    fn line_rate_code(&self, rate: LineRate) -> Result<u8> {
        match rate {
            LineRate::Gbps16 => Ok(0x0),
            LineRate::Gbps20 => Ok(0x1),
            LineRate::Gbps25 => Ok(0x2),
            LineRate::Gbps25_78125 => Ok(0x3),
            LineRate::Gbps32 => Ok(0x4),
            LineRate::Gbps40 => Ok(0x5),
            LineRate::Gbps50 => Ok(0x6),
            LineRate::Gbps53_125 => Ok(0x7),
            other => Err(Error::Configuration(format!(
                "line rate {} is not supported by LR10",
                other
            ))),
        }
    }

    fn is_link_in_reset(&self, dev: &mut Device, link: u32) -> bool {
        LinkReset::from(dev.link_rd(link, nvlipt::RESET_RSTSEQ_LINK_RESET)).link_reset_status()
    }

    fn init_dl_pll(&self, dev: &mut Device, link: u32) -> Result<()> {
        if dev.config.platform.is_emulation() {
            info!("Link {}: skipping PLL init on emulation", link);
            return Ok(());
        }
        let result = dev.send_minion_command(link, MinionCommand::InitPll, 0);
        dev.report_on_error(FaultCode::InitPllFailure, link, result)?;

        let result = wait_for_clock(dev, link, ClockStatus::PLL_PWR_ON);
        dev.report_on_error(FaultCode::InitPllFailure, link, result)?;

        let result = dev
            .send_minion_command(link, MinionCommand::TxClkSwitchPll, 0)
            .and_then(|_| wait_for_clock(dev, link, ClockStatus::TXCLK_PLL));
        dev.report_on_error(FaultCode::TxClkSwitchFailure, link, result)?;

        let result = dev.send_minion_command(link, MinionCommand::InitPhy, 0);
        dev.report_on_error(FaultCode::InitPhyFailure, link, result)
    }

    fn init_buffer_ready(&self, dev: &mut Device, link: u32, nport: bool) -> Result<()> {
        let skip = dev.config.skip_buffer_ready;
        if skip.tlc {
            debug!("Link {}: TLC buffer ready skipped", link);
        } else {
            dev.link_wr(link, nvltlc::TX_SYS_CTRL_BUFFER_READY, nvltlc::BUFFER_READY);
            dev.link_wr(link, nvltlc::RX_SYS_CTRL_BUFFER_READY, nvltlc::BUFFER_READY);
        }
        if nport && !skip.nport {
            dev.link_wr(link, nvltlc::NPORT_CTRL_BUFFER_READY, nvltlc::BUFFER_READY);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::nvltlc;
    use crate::link::sublink::TxMode;
    use crate::sim::testing;
    use simplelog::{Config, LevelFilter, TestLogger};

    #[test]
    fn test_line_rates() {
        assert_eq!(LR10_HAL.line_rate_code(LineRate::Gbps53_125).unwrap(), 0x7);
        assert!(matches!(
            LR10_HAL.line_rate_code(LineRate::Gbps106_25),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_common_mode_fails_when_txclk_never_switches() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        sim.knobs(|k| k.txclk_switch_stuck = true);
        assert!(matches!(
            dev.set_tx_mode(0, TxMode::CommonMode),
            Err(Error::Timeout { .. })
        ));
        let faults = events.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code, FaultCode::TxClkSwitchFailure);
        assert_eq!(faults[0].link, Some(0));
        // INITPHY only follows a good clock switch.
        assert_eq!(sim.commands(0), vec![MinionCommand::InitPll, MinionCommand::TxClkSwitchPll]);
    }

    #[test]
    fn test_pll_sequence() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        LR10_HAL.init_dl_pll(&mut dev, 0).unwrap();
        assert_eq!(
            sim.commands(0),
            vec![
                MinionCommand::InitPll,
                MinionCommand::TxClkSwitchPll,
                MinionCommand::InitPhy
            ]
        );
    }

    #[test]
    fn test_buffer_ready_honours_skip() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let mut config = crate::DeviceConfig::default();
        config.skip_buffer_ready.nport = true;
        let (mut dev, sim, _) = testing::ready_device_with(Chip::Lr10, &[1], config);
        LR10_HAL.init_buffer_ready(&mut dev, 1, true).unwrap();
        assert_eq!(sim.peek_link(1, nvltlc::TX_SYS_CTRL_BUFFER_READY), 1);
        assert_eq!(sim.peek_link(1, nvltlc::RX_SYS_CTRL_BUFFER_READY), 1);
        assert_eq!(sim.writes_to_link(1, nvltlc::NPORT_CTRL_BUFFER_READY), 0);
    }
}
