// SPDX-License-Identifier: MIT

//! Per chip revision behaviour.
//!
//! A `Device` resolves its `ChipHal` once at construction; everything that
//! differs between LR10 and LS10 goes through it.

use crate::config::{LineRate, TrainingModel};
use crate::device::Device;
use crate::link::dl::DlLinkMode;
use crate::regs::{nvlipt, ClockStatus};
use crate::timeout::{poll_until, Poll};
use crate::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use strum::Display;

pub mod lr10;
pub mod ls10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Chip {
    #[strum(serialize = "LR10")]
    Lr10,
    #[strum(serialize = "LS10")]
    Ls10,
}

impl Chip {
    pub fn hal(self) -> &'static dyn ChipHal {
        match self {
            Chip::Lr10 => &lr10::LR10_HAL,
            Chip::Ls10 => &ls10::LS10_HAL,
        }
    }
}

pub trait ChipHal: Sync {
    fn chip(&self) -> Chip;

    fn max_links(&self) -> u32;

    fn links_per_minion(&self) -> u32 {
        4
    }

    fn training_model(&self) -> TrainingModel;

    fn supports_ali(&self) -> bool {
        false
    }

    fn supports_recal_settings(&self) -> bool {
        false
    }

    /// Whether near-end loopback is programmed before INITPHASE1.
    fn loopback_before_initphase1(&self) -> bool;

    /// Encoding of `rate` in SYSTEM_LINK_CLK_CTRL.LINE_RATE.
    fn line_rate_code(&self, rate: LineRate) -> Result<u8>;

    fn is_link_in_reset(&self, dev: &mut Device, link: u32) -> bool;

    /// PLL and PHY bring-up behind TX COMMON_MODE.
    fn init_dl_pll(&self, dev: &mut Device, link: u32) -> Result<()>;

    fn init_buffer_ready(&self, dev: &mut Device, link: u32, nport: bool) -> Result<()>;

    /// Best effort teardown of an active link, failures are only logged.
    fn unilateral_shutdown(&self, dev: &mut Device, link: u32) {
        for mode in [
            DlLinkMode::DisablePm,
            DlLinkMode::DisableErrDetect,
            DlLinkMode::LaneDisable,
            DlLinkMode::Off,
        ] {
            if let Err(err) = dev.set_dl_link_mode(link, mode) {
                warn!("Link {}: shutdown step {} failed: {}", link, mode, err);
            }
        }
    }

    /// Called when the TL request interface never became ready.
    fn dump_tl_request_debug(&self, _dev: &mut Device, _link: u32) {}

    fn initphase5(&self, _dev: &mut Device, _link: u32) -> Result<()> {
        Err(crate::Error::NotSupported("INITPHASE5"))
    }
}

/// Waits for `flags` in the link clock status.
pub(crate) fn wait_for_clock(dev: &mut Device, link: u32, flags: ClockStatus) -> Result<()> {
    let budget = dev.timeouts.clock_switch;
    let interval = dev.timeouts.poll_interval;
    let what = format!("{:?} on link {}", flags, link);
    poll_until(&what, budget, interval, || {
        let value = dev.link_rd(link, nvlipt::CTRL_CLK_CTRL);
        if ClockStatus::from_bits_truncate(value).contains(flags) {
            Poll::Ready(())
        } else {
            Poll::Pending(value)
        }
    })
}
