// SPDX-License-Identifier: MIT

//! DL_CMD / DL_STAT mailbox protocol.
//!
//! Commands are synchronous: the command word is written and the same register
//! is polled until the ucode sets `ready`, so at most one command per link is
//! ever outstanding.

use crate::device::Device;
use crate::events::FaultCode;
use crate::minion::{DlStat, MinionCommand, MinionState};
use crate::regs::{
    minion, nvlipt, MinionDlCmd, MinionDlStat, Mn00Status, TrainingStatus,
    LNK2_RXDET_LINK_STATUS_FOUND, LNK2_RXDET_LINK_STATUS_MASK,
};
use crate::timeout::{poll_until, Poll};
use crate::{Error, Result};
use log::{debug, error, trace, warn};
use std::time::Duration;

impl Device {
    /// MINION instance and mailbox slot of `link`, once that MINION is up.
    fn mailbox(&self, link: u32) -> Result<(u32, u32)> {
        let record = self.link(link)?;
        match self.minion_state(record.minion) {
            Some(MinionState::Ready) => Ok((record.minion, record.local_index)),
            _ => Err(Error::NotInitialized {
                minion: record.minion,
            }),
        }
    }

    pub fn send_minion_command(
        &mut self,
        link: u32,
        command: MinionCommand,
        scratch: u32,
    ) -> Result<()> {
        let (instance, local) = self.mailbox(link)?;
        let cmd_addr = minion::nvlink_dl_cmd(local);

        let pending = MinionDlCmd::from(self.minion_rd(instance, cmd_addr));
        if pending.fault() {
            error!(
                "Link {}: DL_CMD still reports a fault (0x{:08x}), not sending {}",
                link,
                u32::from(pending),
                command
            );
            return Err(Error::InvalidState(format!(
                "link {} mailbox has an unhandled fault",
                link
            )));
        }

        // INITPHASE1 clobbers the link error-control registers.
        let saved = if command == MinionCommand::InitPhase1 {
            Some((
                self.link_rd(link, nvlipt::ERR_REPORT_EN_0),
                self.link_rd(link, nvlipt::ERR_CONTAIN_EN_0),
            ))
        } else {
            None
        };

        let result = self.execute_minion_command(link, instance, local, command, scratch);

        if let Some((report_en, contain_en)) = saved {
            self.link_wr(link, nvlipt::ERR_REPORT_EN_0, report_en);
            self.link_wr(link, nvlipt::ERR_CONTAIN_EN_0, contain_en);
        }
        result
    }

    fn execute_minion_command(
        &mut self,
        link: u32,
        instance: u32,
        local: u32,
        command: MinionCommand,
        scratch: u32,
    ) -> Result<()> {
        let cmd_addr = minion::nvlink_dl_cmd(local);
        if command.takes_scratch() {
            self.minion_wr(instance, minion::nvlink_dl_cmd_data(local), scratch);
        }

        debug!("Link {}: MINION command {}", link, command);
        let word = MinionDlCmd::new().with_command(command as u16);
        self.minion_wr(instance, cmd_addr, word.into());

        let budget = self.timeouts.minion_command;
        let interval = self.timeouts.poll_interval;
        let what = format!("MINION {} on link {}", command, link);
        let status = poll_until(&what, budget, interval, || {
            let status = MinionDlCmd::from(self.minion_rd(instance, cmd_addr));
            if status.ready() {
                Poll::Ready(status)
            } else {
                Poll::Pending(status.into())
            }
        })?;

        if status.fault() {
            let (code, subcode) = match self.get_dl_status(link, DlStat::Mn00, 0) {
                Ok(data) => {
                    let mn00 = Mn00Status::from(data);
                    (
                        mn00.link_intr_code() as u32,
                        mn00.link_intr_subcode() as u32,
                    )
                }
                Err(err) => {
                    warn!("Link {}: failed to read MINION sub-code: {}", link, err);
                    (0, 0)
                }
            };
            self.minion_wr(instance, cmd_addr, status.with_fault(false).into());
            error!(
                "Link {}: MINION {} faulted, DL_CMD 0x{:08x} code 0x{:x} subcode 0x{:x}",
                link,
                command,
                u32::from(status),
                code,
                subcode
            );
            self.report_fault(
                FaultCode::MinionCommandFault,
                Some(link),
                format!("{} faulted with subcode 0x{:x}", command, subcode),
            );
            return Err(Error::HardwareFault {
                link,
                what: format!("MINION {}", command),
                code,
                subcode,
            });
        }

        trace!("Link {}: MINION {} done", link, command);
        Ok(())
    }

    pub fn get_dl_status(&mut self, link: u32, stat: DlStat, args: u16) -> Result<u32> {
        let (instance, local) = self.mailbox(link)?;
        let stat_addr = minion::nvlink_dl_stat(local);
        let request = MinionDlStat::new()
            .with_args(args)
            .with_status_idx(stat as u8);
        self.minion_wr(instance, stat_addr, request.into());

        let budget = self.timeouts.minion_command;
        let interval = self.timeouts.poll_interval;
        let what = format!("DL status {} on link {}", stat, link);
        poll_until(&what, budget, interval, || {
            let status = MinionDlStat::from(self.minion_rd(instance, stat_addr));
            if status.ready() {
                Poll::Ready(())
            } else {
                Poll::Pending(status.into())
            }
        })?;

        Ok(self.minion_rd(instance, minion::nvlink_dl_stat_data(local)))
    }

    fn poll_training_status(
        &mut self,
        link: u32,
        flag: TrainingStatus,
        budget: Duration,
    ) -> Result<()> {
        let interval = self.timeouts.poll_interval;
        let what = format!("{:?} on link {}", flag, link);
        poll_until(&what, budget, interval, || {
            match self.get_dl_status(link, DlStat::Uc01, 0) {
                Ok(data) if TrainingStatus::from_bits_truncate(data).contains(flag) => {
                    Poll::Ready(())
                }
                Ok(data) => Poll::Pending(data),
                Err(err) => Poll::Failed(err),
            }
        })
    }

    pub(crate) fn minion_initoptimize_status(&mut self, link: u32) -> Result<()> {
        let budget = self.timeouts.training_good;
        self.poll_training_status(link, TrainingStatus::TRAINING_GOOD, budget)
    }

    pub(crate) fn minion_initnegotiate_status(&mut self, link: u32) -> Result<()> {
        let budget = self.timeouts.config_good;
        self.poll_training_status(link, TrainingStatus::CONFIG_GOOD, budget)
    }

    pub(crate) fn minion_rxdet_status(&mut self, link: u32) -> Result<()> {
        let budget = self.timeouts.rx_detect;
        let interval = self.timeouts.poll_interval;
        let what = format!("receiver detect on link {}", link);
        poll_until(&what, budget, interval, || {
            match self.get_dl_status(link, DlStat::Lnk2, 0) {
                Ok(data) if data & LNK2_RXDET_LINK_STATUS_MASK == LNK2_RXDET_LINK_STATUS_FOUND => {
                    Poll::Ready(())
                }
                Ok(data) => Poll::Pending(data),
                Err(err) => Poll::Failed(err),
            }
        })
    }

    pub(crate) fn minion_set_rx_term(&mut self, link: u32) -> Result<()> {
        self.send_minion_command(link, MinionCommand::InitRxTerm, 0)
    }
}
