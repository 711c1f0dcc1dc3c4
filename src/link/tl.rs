// SPDX-License-Identifier: MIT

//! Transport layer link state requests.

use crate::device::Device;
use crate::events::FaultCode;
use crate::link::LinkMode;
use crate::minion::DlStat;
use crate::regs::{
    nvlipt, LinkErrors, LinkStateRequest, LinkStateStatus, Mn00Status, TlLinkState, TlRequest,
    TlRequestStatus, MINION_ALARM_BUSY,
};
use crate::timeout::{poll_until, Poll};
use crate::{Error, Result};
use log::{debug, error, warn};
use std::time::Duration;

/// Attempts made for a TL request that the ucode answers with ALARM_BUSY.
pub const TL_REQUEST_ATTEMPTS: u32 = 3;

impl Device {
    pub(crate) fn poll_tl_request_ready(&mut self, link: u32, budget: Duration, what: &str) -> Result<LinkStateRequest> {
        let interval = self.timeouts.poll_interval;
        poll_until(what, budget, interval, || {
            let raw = self.link_rd(link, nvlipt::CTRL_LINK_STATE_REQUEST);
            let request = LinkStateRequest::from(raw);
            if request.ready() {
                Poll::Ready(request)
            } else {
                Poll::Pending(raw)
            }
        })
    }

    pub fn wait_for_tl_request_ready(&mut self, link: u32) -> Result<()> {
        let budget = self.timeouts.tl_request_ready;
        let what = format!("TL request ready on link {}", link);
        match self.poll_tl_request_ready(link, budget, &what) {
            Ok(_) => Ok(()),
            Err(err) => {
                let hal = self.hal;
                hal.dump_tl_request_debug(self, link);
                Err(err)
            }
        }
    }

    pub fn request_tl_link_state(&mut self, link: u32, request: TlRequest, sync: bool) -> Result<()> {
        self.link(link)?;
        self.wait_for_tl_request_ready(link)?;

        self.link_wr(
            link,
            nvlipt::ERR_STATUS_0,
            LinkErrors::FAILED_MINION_REQUEST.bits(),
        );
        debug!("Link {}: TL request {} (sync {})", link, request, sync);
        let word = LinkStateRequest::new().with_request(request.state() as u8);
        self.link_wr(link, nvlipt::CTRL_LINK_STATE_REQUEST, word.into());

        if !sync {
            return Ok(());
        }
        let result = self.wait_for_tl_request_complete(link, request);
        if let Err(err) = &result {
            if err.is_timeout() {
                self.report_fault(
                    FaultCode::TlRequestTimeout,
                    Some(link),
                    format!("TL {} request: {}", request, err),
                );
            }
        }
        result
    }

    fn wait_for_tl_request_complete(&mut self, link: u32, request: TlRequest) -> Result<()> {
        let budget = self.timeouts.tl_request(request);
        let what = format!("TL {} request on link {}", request, link);
        let status = self.poll_tl_request_ready(link, budget, &what)?;
        if TlRequestStatus::from_repr(status.status()) == Some(TlRequestStatus::MinionRequestFail) {
            error!(
                "Link {}: TL {} request failed in MINION, request 0x{:08x}",
                link,
                request,
                u32::from(status)
            );
            return Err(Error::HardwareFault {
                link,
                what: format!("TL {} request", request),
                code: status.status() as u32,
                subcode: 0,
            });
        }

        let target = request.state();
        let interval = self.timeouts.poll_interval;
        let what = format!("TL state {} on link {}", target, link);
        poll_until(&what, budget, interval, || {
            let raw = self.link_rd(link, nvlipt::CTRL_LINK_STATE_STATUS);
            let current = LinkStateStatus::from(raw).current_link_state();
            if TlLinkState::from_repr(current) == Some(target) {
                Poll::Ready(())
            } else {
                Poll::Pending(raw)
            }
        })
    }

    /// Whether the last TL request was refused because the ucode was busy.
    fn tl_request_busy(&mut self, link: u32) -> bool {
        let request = LinkStateRequest::from(self.link_rd(link, nvlipt::CTRL_LINK_STATE_REQUEST));
        if TlRequestStatus::from_repr(request.status()) != Some(TlRequestStatus::MinionRequestFail) {
            return false;
        }
        match self.get_dl_status(link, DlStat::Mn00, 0) {
            Ok(data) => Mn00Status::from(data).link_intr_subcode() == MINION_ALARM_BUSY,
            Err(err) => {
                warn!("Link {}: cannot read MINION sub-code: {}", link, err);
                false
            }
        }
    }

    /// Synchronous TL request, retried while the ucode reports ALARM_BUSY.
    pub fn request_tl_link_state_with_retry(&mut self, link: u32, request: TlRequest) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.request_tl_link_state(link, request, true) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < TL_REQUEST_ATTEMPTS && self.tl_request_busy(link) => {
                    warn!(
                        "Link {}: TL {} attempt {} busy, retrying: {}",
                        link, request, attempt, err
                    );
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        "Link {}: TL {} failed after {} attempt(s): {}",
                        link, request, attempt, err
                    );
                    return Err(err);
                }
            }
        }
    }

    pub fn get_tl_link_mode(&mut self, link: u32) -> Result<LinkMode> {
        self.link(link)?;
        if self.is_link_in_reset(link) {
            return Ok(LinkMode::Reset);
        }
        let status = LinkStateStatus::from(self.link_rd(link, nvlipt::CTRL_LINK_STATE_STATUS));
        match TlLinkState::from_repr(status.current_link_state()) {
            Some(TlLinkState::Reset) => Ok(LinkMode::Reset),
            Some(TlLinkState::Active) => Ok(LinkMode::Active),
            Some(TlLinkState::L2) => Ok(LinkMode::Sleep),
            Some(TlLinkState::Contain) => Ok(LinkMode::Contain),
            Some(TlLinkState::ActivePending) => Ok(LinkMode::ActivePending),
            Some(TlLinkState::Shutdown) => Ok(LinkMode::Off),
            _ => Err(Error::InvalidState(format!(
                "link {} TL reports state 0x{:x}",
                link,
                status.current_link_state()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Chip;
    use crate::sim::testing;
    use simplelog::{Config, LevelFilter, TestLogger};

    #[test]
    fn test_reset_retries_while_busy() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        sim.knobs(|k| k.tl_reset_busy = 2);
        dev.request_tl_link_state_with_retry(0, TlRequest::Reset).unwrap();
        assert_eq!(sim.tl_requests(0), vec![TlLinkState::Reset; 3]);
        assert_eq!(dev.get_tl_link_mode(0).unwrap(), LinkMode::Reset);
    }

    #[test]
    fn test_reset_gives_up_after_three_attempts() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.knobs(|k| k.tl_reset_busy = 3);
        let err = dev
            .request_tl_link_state_with_retry(0, TlRequest::Reset)
            .unwrap_err();
        assert!(matches!(err, Error::HardwareFault { .. }));
        assert_eq!(sim.tl_requests(0).len(), TL_REQUEST_ATTEMPTS as usize);
    }

    #[test]
    fn test_failure_without_busy_is_not_retried() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.release_reset(0);
        // ACTIVE is refused while the DL is still down, and the sub-code is not busy.
        assert!(dev
            .request_tl_link_state_with_retry(0, TlRequest::Active)
            .is_err());
        assert_eq!(sim.tl_requests(0).len(), 1);
    }

    #[test]
    fn test_request_clears_stale_minion_error() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        sim.poke_link(
            0,
            nvlipt::ERR_STATUS_0,
            (LinkErrors::FAILED_MINION_REQUEST | LinkErrors::DL_PROTOCOL).bits(),
        );
        dev.request_tl_link_state(0, TlRequest::Shutdown, true).unwrap();
        assert_eq!(
            sim.peek_link(0, nvlipt::ERR_STATUS_0),
            LinkErrors::DL_PROTOCOL.bits()
        );
    }

    #[test]
    fn test_stuck_request_interface_times_out() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::ready_device(Chip::Ls10, &[0]);
        sim.knobs(|k| k.tl_request_stuck = true);
        dev.request_tl_link_state(0, TlRequest::L2, false).unwrap();
        assert!(dev
            .request_tl_link_state(0, TlRequest::L2, true)
            .unwrap_err()
            .is_timeout());
        assert_eq!(sim.tl_requests(0).len(), 1);
        assert!(events.faults().is_empty());
    }

    #[test]
    fn test_sync_timeout_is_reported() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::ready_device(Chip::Ls10, &[0]);
        sim.knobs(|k| k.ali_pending_polls = u32::MAX);
        assert!(dev
            .request_tl_link_state(0, TlRequest::Active, true)
            .unwrap_err()
            .is_timeout());
        let faults = events.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code, FaultCode::TlRequestTimeout);
    }

    #[test]
    fn test_tl_mode_mapping() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        assert_eq!(dev.get_tl_link_mode(0).unwrap(), LinkMode::Reset);
        sim.release_reset(0);
        for (state, mode) in [
            (TlLinkState::Active, LinkMode::Active),
            (TlLinkState::L2, LinkMode::Sleep),
            (TlLinkState::Contain, LinkMode::Contain),
            (TlLinkState::ActivePending, LinkMode::ActivePending),
            (TlLinkState::Shutdown, LinkMode::Off),
            (TlLinkState::Reset, LinkMode::Reset),
        ] {
            sim.set_tl_state(0, state);
            assert_eq!(dev.get_tl_link_mode(0).unwrap(), mode);
        }
        sim.set_tl_state(0, TlLinkState::Disable);
        assert!(matches!(
            dev.get_tl_link_mode(0),
            Err(Error::InvalidState(_))
        ));
    }
}
