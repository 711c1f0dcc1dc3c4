// SPDX-License-Identifier: MIT

use log::{error, info};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strum::{Display, FromRepr};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum PortEvent {
    Up,
    Down,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, FromRepr, Display)]
#[repr(u32)]
pub enum FaultCode {
    MinionBootFailure = 10001,
    MinionCommandFault = 10002,
    InitPllFailure = 10003,
    InitPhyFailure = 10004,
    TxClkSwitchFailure = 10005,
    InitPhase1Failure = 10006,
    InitDlplFailure = 10007,
    InitLaneEnableFailure = 10008,
    InitOptimizeFailure = 10009,
    InitTlFailure = 10010,
    InitNegotiateFailure = 10011,
    TlRequestTimeout = 10012,
    AliTrainingFailure = 10013,
    ShortErrorRate = 10014,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultReport {
    pub code: FaultCode,
    pub link: Option<u32>,
    pub message: String,
}

/// Receiver of port notifications and structured fault reports.
pub trait EventSink: Send {
    fn port_event(&mut self, link: u32, event: PortEvent);

    fn fault(&mut self, report: FaultReport);
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn port_event(&mut self, link: u32, event: PortEvent) {
        info!("Link {}: port {}", link, event);
    }

    fn fault(&mut self, report: FaultReport) {
        error!(
            "Fault {} ({}) on link {:?}: {}",
            report.code as u32, report.code, report.link, report.message
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Event {
    Port { link: u32, event: PortEvent },
    Fault(FaultReport),
}

/// Shared, cloneable record of every event, also logged.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn port_events(&self, link: u32) -> Vec<PortEvent> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Port { link: l, event } if *l == link => Some(*event),
                _ => None,
            })
            .collect()
    }

    pub fn faults(&self) -> Vec<FaultReport> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Fault(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventLog {
    fn port_event(&mut self, link: u32, event: PortEvent) {
        LogSink.port_event(link, event);
        self.lock().push(Event::Port { link, event });
    }

    fn fault(&mut self, report: FaultReport) {
        LogSink.fault(report.clone());
        self.lock().push(Event::Fault(report));
    }
}
