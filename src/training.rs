// SPDX-License-Identifier: MIT

//! Link training orchestration.
//!
//! LR10 trains each link synchronously through the MINION step commands.
//! LS10 hands the whole sequence to the ucode (ALI) and only waits for the
//! TL to report ACTIVE.

use crate::config::TrainingModel;
use crate::device::Device;
use crate::events::{FaultCode, PortEvent};
use crate::link::dl::DlLinkMode;
use crate::link::sublink::{RxMode, TxMode};
use crate::link::{LinkMode, Topology};
use crate::minion::{
    MinionCommand, SIM_MODE_DEFAULT, SIM_MODE_FAST, SMF_SETTINGS_DEFAULT, UPHY_TABLES_DEFAULT,
};
use crate::regs::{TlRequest, TlRequestStatus};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use strum::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum TrainingStep {
    ResetDeassert,
    PllPhyInit,
    Loopback,
    InitPhase1,
    RxDetect,
    RxInitTerm,
    RxCal,
    TxCommonMode,
    DlSafe,
    InitOptimize,
    TrainingGood,
    InitTl,
    InitNegotiate,
    ConfigGood,
    DlActive,
    TlActive,
    BufferReady,
    TrainingComplete,
    AliLaunch,
    AliWait,
    TlReset,
}

/// What a training cycle did and where the link ended up.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub link: u32,
    pub model: TrainingModel,
    /// Completed steps in execution order.
    pub steps: Vec<TrainingStep>,
    pub termination_only: bool,
    pub dl_mode: Option<LinkMode>,
    pub tl_mode: Option<LinkMode>,
    pub topology: Option<Topology>,
}

impl TrainingReport {
    fn new(link: u32, model: TrainingModel) -> Self {
        Self {
            link,
            model,
            steps: Vec::new(),
            termination_only: false,
            dl_mode: None,
            tl_mode: None,
            topology: None,
        }
    }
}

impl Device {
    fn run_step<F>(&mut self, report: &mut TrainingReport, step: TrainingStep, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let link = report.link;
        debug!("Link {}: {}", link, step);
        match f(self) {
            Ok(()) => {
                report.steps.push(step);
                Ok(())
            }
            Err(err) => {
                error!("Link {}: training stopped at {}: {}", link, step, err);
                Err(Error::Training {
                    link,
                    step,
                    source: Box::new(err),
                })
            }
        }
    }

    fn fill_report(&mut self, report: &mut TrainingReport) {
        let link = report.link;
        report.dl_mode = self.get_dl_link_mode(link).ok();
        report.tl_mode = self.get_tl_link_mode(link).ok();
        report.topology = self.links.get(link).and_then(|l| l.topology);
    }

    /// Training model in use, the configured one if any.
    pub fn training_model(&self) -> TrainingModel {
        self.config
            .training_model
            .unwrap_or_else(|| self.hal.training_model())
    }

    fn loopback_step(&mut self, report: &mut TrainingReport) {
        let link = report.link;
        let enabled = self.links.get(link).map(|l| l.loopback.any()).unwrap_or(false);
        if !enabled {
            return;
        }
        match self.setup_link_loopback_mode(link) {
            Ok(()) => report.steps.push(TrainingStep::Loopback),
            Err(err) => warn!("Link {}: loopback setup failed: {}", link, err),
        }
    }

    /// Full synchronous training of one link.
    pub fn train_link(&mut self, link: u32) -> Result<TrainingReport> {
        self.link_mut(link)?.reset_for_training();
        let mut report = TrainingReport::new(link, TrainingModel::Legacy);

        if self.link(link)?.remote_end_disabled {
            self.run_step(&mut report, TrainingStep::InitPhase1, |dev| {
                dev.set_dl_link_mode(link, DlLinkMode::InitPhase1)
            })?;
            report.termination_only = true;
            self.fill_report(&mut report);
            return Ok(report);
        }

        let loopback_first = self.hal.loopback_before_initphase1();
        let r = &mut report;
        self.run_step(r, TrainingStep::ResetDeassert, |dev| dev.deassert_link_reset(link))?;
        self.run_step(r, TrainingStep::PllPhyInit, |dev| {
            dev.set_tx_mode(link, TxMode::CommonMode)
        })?;
        if loopback_first {
            self.loopback_step(r);
        }
        self.run_step(r, TrainingStep::InitPhase1, |dev| {
            dev.set_dl_link_mode(link, DlLinkMode::InitPhase1)
        })?;
        if !loopback_first {
            self.loopback_step(r);
        }
        self.run_step(r, TrainingStep::RxDetect, |dev| {
            dev.set_rx_detect(link)?;
            dev.get_rx_detect(link)
        })?;
        self.run_step(r, TrainingStep::RxInitTerm, |dev| {
            dev.set_rx_mode(link, RxMode::InitTerm)
        })?;
        self.run_step(r, TrainingStep::RxCal, |dev| dev.set_rx_mode(link, RxMode::RxCal))?;
        self.run_step(r, TrainingStep::TxCommonMode, |dev| {
            dev.set_tx_mode(link, TxMode::DataReady)
        })?;
        for (step, mode) in [
            (TrainingStep::DlSafe, DlLinkMode::Safe),
            (TrainingStep::InitOptimize, DlLinkMode::InitOptimize),
            (TrainingStep::TrainingGood, DlLinkMode::PostInitOptimize),
            (TrainingStep::InitTl, DlLinkMode::InitTl),
            (TrainingStep::InitNegotiate, DlLinkMode::InitNegotiate),
            (TrainingStep::ConfigGood, DlLinkMode::PostInitNegotiate),
            (TrainingStep::DlActive, DlLinkMode::Active),
        ] {
            self.run_step(r, step, |dev| dev.set_dl_link_mode(link, mode))?;
        }
        self.run_step(r, TrainingStep::TlActive, |dev| {
            dev.request_tl_link_state(link, TlRequest::Active, true)
        })?;
        self.run_step(r, TrainingStep::BufferReady, |dev| dev.init_buffer_ready(link, true))?;
        self.run_step(r, TrainingStep::TrainingComplete, |dev| dev.training_complete(link))?;

        self.fill_report(&mut report);
        Ok(report)
    }

    /// Arms interrupts and counters of a freshly trained link and announces it.
    fn training_complete(&mut self, link: u32) -> Result<()> {
        self.init_dlpl_interrupts(link);
        self.set_error_rate_threshold(link, true)?;
        self.configure_error_rate_threshold_interrupt(link, true)?;
        self.configure_throughput_counters(link);
        self.link_mut(link)?.mode = LinkMode::Active;
        info!("{}: link {} is up", self.name(), link);
        self.notify_port(link, PortEvent::Up);
        Ok(())
    }

    /// Starts autonomous training. A link already out of reset is trained or
    /// training and is left alone.
    pub fn launch_ali_training(&mut self, link: u32, sync: bool) -> Result<()> {
        if !self.hal.supports_ali() {
            return Err(Error::NotSupported("ALI training"));
        }
        self.link(link)?;
        if !self.is_link_in_reset(link) {
            debug!("Link {}: out of reset, ALI not launched", link);
            return Ok(());
        }
        let sim_mode = if self.config.platform.is_pre_silicon() {
            SIM_MODE_FAST
        } else {
            SIM_MODE_DEFAULT
        };
        let result = self.send_ali_setup(link, sim_mode, sync);
        self.report_on_error(FaultCode::AliTrainingFailure, link, result)
    }

    fn send_ali_setup(&mut self, link: u32, sim_mode: u32, sync: bool) -> Result<()> {
        self.send_minion_command(link, MinionCommand::SetSimMode, sim_mode)?;
        self.send_minion_command(link, MinionCommand::SetSmfSettings, SMF_SETTINGS_DEFAULT)?;
        self.send_minion_command(link, MinionCommand::SelectUphyTables, UPHY_TABLES_DEFAULT)?;
        self.setup_link_loopback_mode(link)?;
        info!("Link {}: ALI training launched", link);
        self.request_tl_link_state(link, TlRequest::Active, sync)
    }

    /// Waits for a launched ALI training and finishes the link.
    pub fn wait_for_ali_training(&mut self, link: u32) -> Result<TrainingReport> {
        self.link(link)?;
        let mut report = TrainingReport::new(link, TrainingModel::Ali);
        let result = self.finish_ali_training(&mut report);
        self.report_on_error(FaultCode::AliTrainingFailure, link, result)?;
        self.fill_report(&mut report);
        Ok(report)
    }

    fn finish_ali_training(&mut self, report: &mut TrainingReport) -> Result<()> {
        let link = report.link;
        self.run_step(report, TrainingStep::AliWait, |dev| {
            let budget = dev.timeouts.tl_active;
            let what = format!("ALI training on link {}", link);
            let request = dev.poll_tl_request_ready(link, budget, &what)?;
            if TlRequestStatus::from_repr(request.status()) == Some(TlRequestStatus::MinionRequestFail) {
                return Err(Error::HardwareFault {
                    link,
                    what: "ALI TL ACTIVE request".to_string(),
                    code: request.status() as u32,
                    subcode: 0,
                });
            }
            let mode = dev.get_tl_link_mode(link)?;
            if mode != LinkMode::Active {
                return Err(Error::InvalidState(format!(
                    "link {} TL is {} after ALI training",
                    link, mode
                )));
            }
            dev.store_topology(link).map(|_| ())
        })?;
        self.run_step(report, TrainingStep::BufferReady, |dev| {
            dev.init_buffer_ready(link, true)
        })?;
        self.run_step(report, TrainingStep::TrainingComplete, |dev| {
            dev.training_complete(link)
        })
    }

    /// ALI launch and wait for a single link.
    pub fn train_link_ali(&mut self, link: u32) -> Result<TrainingReport> {
        self.link_mut(link)?.reset_for_training();
        let mut launch = TrainingReport::new(link, TrainingModel::Ali);
        self.run_step(&mut launch, TrainingStep::AliLaunch, |dev| {
            dev.launch_ali_training(link, false)
        })?;
        let mut report = self.wait_for_ali_training(link)?;
        launch.steps.append(&mut report.steps);
        report.steps = launch.steps;
        Ok(report)
    }

    /// Launches every link first, then collects them one by one.
    pub fn train_links_ali(&mut self, links: &[u32]) -> Vec<(u32, Result<TrainingReport>)> {
        let mut launched = Vec::with_capacity(links.len());
        let mut results = Vec::with_capacity(links.len());
        for &link in links {
            let launch = self
                .link_mut(link)
                .map(|l| l.reset_for_training())
                .and_then(|_| self.launch_ali_training(link, false));
            match launch {
                Ok(()) => launched.push(link),
                Err(err) => {
                    warn!("Link {}: ALI launch failed: {}", link, err);
                    results.push((
                        link,
                        Err(Error::Training {
                            link,
                            step: TrainingStep::AliLaunch,
                            source: Box::new(err),
                        }),
                    ));
                }
            }
        }
        for link in launched {
            let result = self.wait_for_ali_training(link).map(|mut report| {
                report.steps.insert(0, TrainingStep::AliLaunch);
                report
            });
            results.push((link, result));
        }
        results.sort_by_key(|(link, _)| *link);
        results
    }

    /// Best effort teardown, individual failures are logged by the HAL.
    pub fn execute_unilateral_link_shutdown(&mut self, link: u32) -> Result<()> {
        self.link(link)?;
        info!("Link {}: unilateral shutdown", link);
        let hal = self.hal;
        hal.unilateral_shutdown(self, link);
        Ok(())
    }

    /// Shuts the link down, resets it and trains it again with the chip's model.
    pub fn reset_and_train_link(&mut self, link: u32) -> Result<TrainingReport> {
        self.execute_unilateral_link_shutdown(link)?;
        self.link_mut(link)?.reset_for_training();

        let model = self.training_model();
        let mut reset = TrainingReport::new(link, model);
        self.run_step(&mut reset, TrainingStep::TlReset, |dev| {
            dev.request_tl_link_state_with_retry(link, TlRequest::Reset)
        })?;
        self.link_mut(link)?.mode = LinkMode::Reset;

        let mut report = match model {
            TrainingModel::Legacy => self.train_link(link)?,
            TrainingModel::Ali => self.train_link_ali(link)?,
        };
        reset.steps.append(&mut report.steps);
        report.steps = reset.steps;
        Ok(report)
    }
}
