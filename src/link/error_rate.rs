// SPDX-License-Identifier: MIT

//! RX CRC error rate thresholds and their non-stall interrupt.

use crate::device::Device;
use crate::events::FaultCode;
use crate::regs::{nvldl, DlInterrupts, ErrorRateCtrl};
use crate::{Error, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

const MANTISSA_MAX: u8 = 0x7;
const EXPONENT_MAX: u8 = 0xf;

/// `threshold_man * 2^threshold_exp` errors per `timescale_man * 2^timescale_exp`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRate {
    pub threshold_man: u8,
    pub threshold_exp: u8,
    pub timescale_man: u8,
    pub timescale_exp: u8,
}

impl ErrorRate {
    pub const SHORT_DEFAULT: ErrorRate = ErrorRate {
        threshold_man: 0x2,
        threshold_exp: 0x2,
        timescale_man: 0x1,
        timescale_exp: 0x3,
    };

    pub const LONG_DEFAULT: ErrorRate = ErrorRate {
        threshold_man: 0x2,
        threshold_exp: 0x5,
        timescale_man: 0x1,
        timescale_exp: 0xa,
    };

    pub fn validate(&self) -> Result<()> {
        if self.threshold_man > MANTISSA_MAX
            || self.timescale_man > MANTISSA_MAX
            || self.threshold_exp > EXPONENT_MAX
            || self.timescale_exp > EXPONENT_MAX
        {
            return Err(Error::Configuration(format!(
                "error rate {:?} out of range",
                self
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRateThreshold {
    pub short: ErrorRate,
    pub long: ErrorRate,
    pub user_config: bool,
    pub interrupt_enabled: bool,
    pub interrupt_triggered: bool,
}

impl Default for ErrorRateThreshold {
    fn default() -> Self {
        Self {
            short: ErrorRate::SHORT_DEFAULT,
            long: ErrorRate::LONG_DEFAULT,
            user_config: false,
            interrupt_enabled: false,
            interrupt_triggered: false,
        }
    }
}

impl ErrorRateThreshold {
    fn to_ctrl(self) -> ErrorRateCtrl {
        ErrorRateCtrl::new()
            .with_short_threshold_man(self.short.threshold_man)
            .with_short_threshold_exp(self.short.threshold_exp)
            .with_short_timescale_man(self.short.timescale_man)
            .with_short_timescale_exp(self.short.timescale_exp)
            .with_long_threshold_man(self.long.threshold_man)
            .with_long_threshold_exp(self.long.threshold_exp)
            .with_long_timescale_man(self.long.timescale_man)
            .with_long_timescale_exp(self.long.timescale_exp)
    }

    fn load_ctrl(&mut self, ctrl: ErrorRateCtrl) {
        self.short = ErrorRate {
            threshold_man: ctrl.short_threshold_man(),
            threshold_exp: ctrl.short_threshold_exp(),
            timescale_man: ctrl.short_timescale_man(),
            timescale_exp: ctrl.short_timescale_exp(),
        };
        self.long = ErrorRate {
            threshold_man: ctrl.long_threshold_man(),
            threshold_exp: ctrl.long_threshold_exp(),
            timescale_man: ctrl.long_timescale_man(),
            timescale_exp: ctrl.long_timescale_exp(),
        };
    }
}

impl Device {
    fn write_error_rate_threshold(&mut self, link: u32, threshold: ErrorRateThreshold) -> Result<()> {
        threshold.short.validate()?;
        threshold.long.validate()?;
        self.link_wr(link, nvldl::RX_ERROR_RATE_CTRL, threshold.to_ctrl().into());
        self.link_mut(link)?.error_threshold = threshold;
        Ok(())
    }

    pub fn get_error_rate_threshold(&mut self, link: u32) -> Result<ErrorRateThreshold> {
        self.link(link)?;
        let ctrl = ErrorRateCtrl::from(self.link_rd(link, nvldl::RX_ERROR_RATE_CTRL));
        let record = self.link_mut(link)?;
        record.error_threshold.load_ctrl(ctrl);
        Ok(record.error_threshold)
    }

    pub fn set_error_rate_threshold(&mut self, link: u32, use_default: bool) -> Result<()> {
        let mut threshold = self.link(link)?.error_threshold;
        let short = self.config.crc_bit_error_rate_short;
        let long = self.config.crc_bit_error_rate_long;
        if short.is_some() || long.is_some() {
            debug!("Link {}: error rate threshold from configuration", link);
            threshold.short = short.unwrap_or(ErrorRate::SHORT_DEFAULT);
            threshold.long = long.unwrap_or(ErrorRate::LONG_DEFAULT);
            threshold.user_config = false;
            threshold.interrupt_triggered = false;
        } else if use_default {
            threshold.short = ErrorRate::SHORT_DEFAULT;
            threshold.long = ErrorRate::LONG_DEFAULT;
            threshold.user_config = false;
            threshold.interrupt_triggered = false;
        }
        self.write_error_rate_threshold(link, threshold)
    }

    pub fn set_user_error_rate_threshold(
        &mut self,
        link: u32,
        short: ErrorRate,
        long: ErrorRate,
    ) -> Result<()> {
        let mut threshold = self.link(link)?.error_threshold;
        threshold.short = short;
        threshold.long = long;
        threshold.user_config = true;
        threshold.interrupt_triggered = false;
        self.write_error_rate_threshold(link, threshold)
    }

    pub fn configure_error_rate_threshold_interrupt(&mut self, link: u32, enable: bool) -> Result<()> {
        self.link(link)?;
        let mut enables =
            DlInterrupts::from_bits_retain(self.link_rd(link, nvldl::TOP_INTR_NONSTALL_EN));
        enables.set(DlInterrupts::RX_SHORT_ERROR_RATE, enable);
        self.link_wr(link, nvldl::TOP_INTR_NONSTALL_EN, enables.bits());

        let threshold = &mut self.link_mut(link)?.error_threshold;
        threshold.interrupt_enabled = enable;
        if enable {
            threshold.interrupt_triggered = false;
        }
        Ok(())
    }

    /// Short error rate interrupt: latch it and disarm until rearmed.
    pub fn handle_short_error_rate_event(&mut self, link: u32) -> Result<()> {
        self.link_mut(link)?.error_threshold.interrupt_triggered = true;
        self.configure_error_rate_threshold_interrupt(link, false)?;
        warn!("Link {}: short CRC error rate threshold crossed", link);
        self.report_fault(
            FaultCode::ShortErrorRate,
            Some(link),
            "RX short error rate threshold exceeded".to_string(),
        );
        Ok(())
    }

    pub fn rearm_error_rate_threshold(&mut self, link: u32) -> Result<()> {
        let threshold = self.link(link)?.error_threshold;
        if threshold.user_config {
            info!("Link {}: restoring user error rate threshold", link);
            self.write_error_rate_threshold(link, threshold)?;
        } else {
            self.set_error_rate_threshold(link, true)?;
        }
        self.configure_error_rate_threshold_interrupt(link, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Chip;
    use crate::sim::testing;
    use simplelog::{Config, LevelFilter, TestLogger};

    const USER_SHORT: ErrorRate = ErrorRate {
        threshold_man: 7,
        threshold_exp: 1,
        timescale_man: 3,
        timescale_exp: 9,
    };

    #[test]
    fn test_defaults_written_and_read_back() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, _, _) = testing::ready_device(Chip::Lr10, &[0]);
        dev.set_error_rate_threshold(0, true).unwrap();
        let read = dev.get_error_rate_threshold(0).unwrap();
        assert_eq!(read.short, ErrorRate::SHORT_DEFAULT);
        assert_eq!(read.long, ErrorRate::LONG_DEFAULT);
        assert!(!read.user_config);
    }

    #[test]
    fn test_configuration_override_wins() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let config = crate::DeviceConfig {
            crc_bit_error_rate_short: Some(USER_SHORT),
            ..Default::default()
        };
        let (mut dev, _, _) = testing::ready_device_with(Chip::Lr10, &[0], config);
        dev.set_error_rate_threshold(0, true).unwrap();
        let read = dev.get_error_rate_threshold(0).unwrap();
        assert_eq!(read.short, USER_SHORT);
        assert_eq!(read.long, ErrorRate::LONG_DEFAULT);
    }

    #[test]
    fn test_user_threshold_survives_rearm() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::ready_device(Chip::Lr10, &[0]);
        dev.set_user_error_rate_threshold(0, USER_SHORT, ErrorRate::LONG_DEFAULT)
            .unwrap();
        dev.configure_error_rate_threshold_interrupt(0, true).unwrap();
        assert_ne!(
            sim.peek_link(0, nvldl::TOP_INTR_NONSTALL_EN) & DlInterrupts::RX_SHORT_ERROR_RATE.bits(),
            0
        );

        dev.handle_short_error_rate_event(0).unwrap();
        let record = dev.link(0).unwrap().error_threshold;
        assert!(record.interrupt_triggered);
        assert!(!record.interrupt_enabled);
        assert_eq!(
            sim.peek_link(0, nvldl::TOP_INTR_NONSTALL_EN) & DlInterrupts::RX_SHORT_ERROR_RATE.bits(),
            0
        );
        assert_eq!(events.faults()[0].code, FaultCode::ShortErrorRate);

        dev.rearm_error_rate_threshold(0).unwrap();
        let record = dev.get_error_rate_threshold(0).unwrap();
        assert_eq!(record.short, USER_SHORT);
        assert!(record.user_config);
        assert!(record.interrupt_enabled);
        assert!(!record.interrupt_triggered);
    }

    #[test]
    fn test_keep_current_values() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, _, _) = testing::ready_device(Chip::Lr10, &[0]);
        dev.set_user_error_rate_threshold(0, USER_SHORT, ErrorRate::LONG_DEFAULT)
            .unwrap();
        dev.set_error_rate_threshold(0, false).unwrap();
        assert_eq!(dev.get_error_rate_threshold(0).unwrap().short, USER_SHORT);
        dev.set_error_rate_threshold(0, true).unwrap();
        let record = dev.get_error_rate_threshold(0).unwrap();
        assert_eq!(record.short, ErrorRate::SHORT_DEFAULT);
        assert!(!record.user_config);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        let bad = ErrorRate {
            threshold_man: 8,
            ..ErrorRate::SHORT_DEFAULT
        };
        let before = sim.write_count();
        assert!(matches!(
            dev.set_user_error_rate_threshold(0, bad, ErrorRate::LONG_DEFAULT),
            Err(Error::Configuration(_))
        ));
        assert_eq!(sim.write_count(), before);
    }
}
