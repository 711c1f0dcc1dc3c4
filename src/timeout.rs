// SPDX-License-Identifier: MIT

//! Bounded waits.
//!
//! Every hardware wait is a deadline plus a poll closure. The closure is
//! evaluated once more after the deadline passes so a slow scheduler never
//! turns a completed operation into a timeout.

use crate::regs::TlRequest;
use crate::{Error, Result};
use log::error;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Silicon,
    Emulation,
    Fmodel,
    RtlSim,
}

impl Platform {
    pub fn is_pre_silicon(self) -> bool {
        self != Platform::Silicon
    }

    pub fn is_emulation(self) -> bool {
        self == Platform::Emulation
    }
}

/// Outcome of one poll evaluation.
#[derive(Debug)]
pub enum Poll<T> {
    /// Condition not met yet, carries the last register value for diagnostics.
    Pending(u32),
    Ready(T),
    Failed(Error),
}

#[derive(Debug, Copy, Clone)]
pub struct Deadline {
    expires: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now() + budget,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.expires
    }
}

pub fn poll_until<T>(
    what: &str,
    budget: Duration,
    interval: Duration,
    mut poll: impl FnMut() -> Poll<T>,
) -> Result<T> {
    let deadline = Deadline::after(budget);
    loop {
        let expired = deadline.expired();
        match poll() {
            Poll::Ready(value) => return Ok(value),
            Poll::Failed(err) => return Err(err),
            Poll::Pending(last) => {
                if expired {
                    error!(
                        "Timeout after {:?} waiting for {}, last read 0x{:08x}",
                        budget, what, last
                    );
                    return Err(Error::Timeout {
                        what: what.to_string(),
                        last,
                    });
                }
            }
        }
        thread::sleep(interval);
    }
}

/// Overrides supplied by configuration, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutOverrides {
    pub ceiling_ms: Option<u64>,
    pub training_good_ms: Option<u64>,
    pub tl_active_ms: Option<u64>,
    pub minion_command_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeouts {
    pub poll_interval: Duration,
    pub minion_command: Duration,
    pub minion_scrub: Duration,
    pub minion_boot: Duration,
    pub sublink_change: Duration,
    pub clock_switch: Duration,
    pub rxcal_settle: Duration,
    pub rx_detect: Duration,
    pub training_good: Duration,
    pub config_good: Duration,
    pub reset_deassert: Duration,
    pub tl_request_ready: Duration,
    pub tl_active: Duration,
    pub tl_reset: Duration,
    pub tl_shutdown: Duration,
    pub tl_l2: Duration,
    pub phase5_psl0: Duration,
}

impl Timeouts {
    pub fn silicon() -> Self {
        Self {
            poll_interval: Duration::from_micros(100),
            minion_command: Duration::from_millis(5),
            minion_scrub: Duration::from_millis(20),
            minion_boot: Duration::from_millis(20),
            sublink_change: Duration::from_millis(200),
            clock_switch: Duration::from_millis(400),
            rxcal_settle: Duration::from_micros(200),
            rx_detect: Duration::from_millis(50),
            training_good: Duration::from_secs(20),
            config_good: Duration::from_secs(2),
            reset_deassert: Duration::from_millis(10),
            tl_request_ready: Duration::from_millis(400),
            tl_active: Duration::from_secs(10),
            tl_reset: Duration::from_millis(4),
            tl_shutdown: Duration::from_millis(10),
            tl_l2: Duration::from_millis(10),
            phase5_psl0: Duration::from_millis(10),
        }
    }

    /// Simulated and emulated clocks run orders of magnitude slower than silicon.
    pub fn pre_silicon() -> Self {
        let silicon = Self::silicon();
        Self {
            poll_interval: Duration::from_millis(1),
            minion_command: silicon.minion_command * 2000,
            minion_scrub: silicon.minion_scrub * 2000,
            minion_boot: silicon.minion_boot * 2000,
            sublink_change: silicon.sublink_change * 10,
            clock_switch: silicon.clock_switch * 10,
            rxcal_settle: Duration::from_secs(1),
            rx_detect: silicon.rx_detect * 10,
            training_good: silicon.training_good * 10,
            config_good: silicon.config_good * 10,
            reset_deassert: silicon.reset_deassert * 10,
            tl_request_ready: silicon.tl_request_ready * 10,
            tl_active: silicon.tl_active * 10,
            tl_reset: silicon.tl_reset * 10,
            tl_shutdown: silicon.tl_shutdown * 10,
            tl_l2: silicon.tl_l2 * 10,
            phase5_psl0: silicon.phase5_psl0 * 10,
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        if platform.is_pre_silicon() {
            Self::pre_silicon()
        } else {
            Self::silicon()
        }
    }

    pub fn tl_request(&self, request: TlRequest) -> Duration {
        match request {
            TlRequest::Active => self.tl_active,
            TlRequest::Reset => self.tl_reset,
            TlRequest::Shutdown => self.tl_shutdown,
            TlRequest::L2 => self.tl_l2,
        }
    }

    pub fn apply(mut self, overrides: &TimeoutOverrides) -> Self {
        if let Some(ms) = overrides.training_good_ms {
            self.training_good = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.tl_active_ms {
            self.tl_active = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.minion_command_ms {
            self.minion_command = Duration::from_millis(ms);
        }
        match overrides.ceiling_ms {
            Some(ms) => self.with_ceiling(Duration::from_millis(ms)),
            None => self,
        }
    }

    /// Caps every wait at `ceiling`.
    pub fn with_ceiling(self, ceiling: Duration) -> Self {
        let cap = |d: Duration| d.min(ceiling);
        Self {
            poll_interval: cap(self.poll_interval),
            minion_command: cap(self.minion_command),
            minion_scrub: cap(self.minion_scrub),
            minion_boot: cap(self.minion_boot),
            sublink_change: cap(self.sublink_change),
            clock_switch: cap(self.clock_switch),
            rxcal_settle: cap(self.rxcal_settle),
            rx_detect: cap(self.rx_detect),
            training_good: cap(self.training_good),
            config_good: cap(self.config_good),
            reset_deassert: cap(self.reset_deassert),
            tl_request_ready: cap(self.tl_request_ready),
            tl_active: cap(self.tl_active),
            tl_reset: cap(self.tl_reset),
            tl_shutdown: cap(self.tl_shutdown),
            tl_l2: cap(self.tl_l2),
            phase5_psl0: cap(self.phase5_psl0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_silicon_waits_are_longer() {
        let silicon = Timeouts::for_platform(Platform::Silicon);
        for platform in [Platform::Emulation, Platform::Fmodel, Platform::RtlSim] {
            let slow = Timeouts::for_platform(platform);
            let pairs = [
                (slow.minion_command, silicon.minion_command),
                (slow.minion_scrub, silicon.minion_scrub),
                (slow.minion_boot, silicon.minion_boot),
                (slow.sublink_change, silicon.sublink_change),
                (slow.clock_switch, silicon.clock_switch),
                (slow.rxcal_settle, silicon.rxcal_settle),
                (slow.rx_detect, silicon.rx_detect),
                (slow.training_good, silicon.training_good),
                (slow.config_good, silicon.config_good),
                (slow.reset_deassert, silicon.reset_deassert),
                (slow.tl_request_ready, silicon.tl_request_ready),
                (slow.tl_active, silicon.tl_active),
                (slow.tl_reset, silicon.tl_reset),
                (slow.tl_shutdown, silicon.tl_shutdown),
                (slow.tl_l2, silicon.tl_l2),
                (slow.phase5_psl0, silicon.phase5_psl0),
            ];
            for (slow, fast) in pairs {
                assert!(slow > fast, "{:?} is not longer than {:?}", slow, fast);
                assert!(slow >= fast * 10);
            }
        }
        assert_eq!(
            Timeouts::pre_silicon().minion_command,
            silicon.minion_command * 2000
        );
        assert_eq!(silicon.sublink_change, Duration::from_millis(200));
        assert_eq!(Timeouts::pre_silicon().sublink_change, Duration::from_millis(2000));
    }

    #[test]
    fn test_training_good_is_the_longest_poll() {
        let t = Timeouts::silicon();
        assert!(t.training_good > t.tl_active);
        assert!(t.tl_active > t.tl_shutdown);
        assert!(t.tl_shutdown > t.tl_reset);
    }

    #[test]
    fn test_overrides_and_ceiling() {
        let overrides = TimeoutOverrides {
            ceiling_ms: Some(50),
            training_good_ms: Some(30),
            ..Default::default()
        };
        let t = Timeouts::silicon().apply(&overrides);
        assert_eq!(t.training_good, Duration::from_millis(30));
        assert_eq!(t.tl_active, Duration::from_millis(50));
        assert_eq!(t.minion_command, Duration::from_millis(5));
    }

    #[test]
    fn test_poll_until_checks_after_deadline() {
        let mut calls = 0;
        let value = poll_until("nothing", Duration::ZERO, Duration::ZERO, || {
            calls += 1;
            Poll::Ready(calls)
        })
        .unwrap();
        assert_eq!(value, 1);

        let err = poll_until::<()>(
            "never",
            Duration::from_millis(2),
            Duration::from_micros(100),
            || Poll::Pending(0xdead),
        )
        .unwrap_err();
        match err {
            Error::Timeout { what, last } => {
                assert_eq!(what, "never");
                assert_eq!(last, 0xdead);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
