// SPDX-License-Identifier: MIT

use crate::config::DeviceConfig;
use crate::events::{EventSink, FaultCode, FaultReport, LogSink, PortEvent};
use crate::firmware::MinionFirmware;
use crate::hal::{Chip, ChipHal};
use crate::io::RegisterIo;
use crate::link::{Link, LinkTable};
use crate::minion::{Minion, MinionState};
use crate::regs::RegAddr;
use crate::timeout::Timeouts;
use crate::vbios::{NvLinkConfigTable, VbiosLinkEntry};
use crate::{Error, Result};
use derivative::Derivative;
use log::{info, trace};
use std::collections::BTreeMap;

/// One NVSwitch device: its links, their MINION controllers and the register
/// backend that reaches them.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Device {
    name: String,
    chip: Chip,
    #[derivative(Debug = "ignore")]
    pub(crate) hal: &'static dyn ChipHal,
    #[derivative(Debug = "ignore")]
    io: Box<dyn RegisterIo>,
    pub(crate) config: DeviceConfig,
    pub(crate) timeouts: Timeouts,
    pub(crate) links: LinkTable,
    pub(crate) minions: BTreeMap<u32, Minion>,
    #[derivative(Debug = "ignore")]
    events: Box<dyn EventSink>,
    vbios: Option<(NvLinkConfigTable, usize)>,
}

impl Device {
    /// `discovered` lists the links the discovery service found backed by a
    /// valid engine.
    pub fn new(
        name: &str,
        chip: Chip,
        io: Box<dyn RegisterIo>,
        config: DeviceConfig,
        discovered: impl IntoIterator<Item = u32>,
    ) -> Result<Self> {
        let timeouts = Timeouts::for_platform(config.platform).apply(&config.timeouts);
        let mut device = Self {
            name: name.to_string(),
            chip,
            hal: chip.hal(),
            io,
            config,
            timeouts,
            links: LinkTable::default(),
            minions: BTreeMap::new(),
            events: Box::new(LogSink),
            vbios: None,
        };
        for number in discovered {
            device.add_link(number)?;
        }
        info!(
            "{}: {} with {} links on {} MINIONs",
            device.name,
            chip,
            device.links.len(),
            device.minions.len()
        );
        Ok(device)
    }

    pub fn add_link(&mut self, number: u32) -> Result<()> {
        if number >= self.hal.max_links() {
            return Err(Error::InvalidLink(number));
        }
        if self.config.is_link_disabled(number) {
            info!("{}: link {} disabled by configuration", self.name, number);
            return Ok(());
        }
        let mut link = Link::new(number, self.hal.links_per_minion());
        link.remote_end_disabled = self.config.is_remote_end_disabled(number);
        link.ac_coupled = self.config.is_ac_coupled(number);
        link.line_rate = self.config.speed;
        link.loopback = self.config.loopback(number);
        let instance = link.minion;
        self.links.insert(link)?;
        self.minions
            .entry(instance)
            .or_insert_with(|| Minion::new(instance))
            .links
            .push(number);
        Ok(())
    }

    pub fn remove_link(&mut self, number: u32) -> Option<Link> {
        let link = self.links.remove(number)?;
        if let Some(minion) = self.minions.get_mut(&link.minion) {
            minion.links.retain(|&l| l != number);
        }
        Some(link)
    }

    /// Bootstraps every MINION and programs the per-link system registers.
    pub fn initialize(&mut self, firmware: &MinionFirmware) -> Result<()> {
        self.bootstrap_minions(firmware)?;
        for number in self.links.numbers() {
            self.setup_link_system_registers(number)?;
            self.load_link_disable_settings(number)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chip(&self) -> Chip {
        self.chip
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    pub fn set_event_sink(&mut self, events: Box<dyn EventSink>) {
        self.events = events;
    }

    pub fn set_vbios(&mut self, table: NvLinkConfigTable, base_entry: usize) {
        self.vbios = Some((table, base_entry));
    }

    pub fn link(&self, number: u32) -> Result<&Link> {
        self.links.get(number).ok_or(Error::InvalidLink(number))
    }

    pub(crate) fn link_mut(&mut self, number: u32) -> Result<&mut Link> {
        self.links.get_mut(number).ok_or(Error::InvalidLink(number))
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn link_numbers(&self) -> Vec<u32> {
        self.links.numbers()
    }

    pub fn minion(&self, instance: u32) -> Option<&Minion> {
        self.minions.get(&instance)
    }

    pub fn minion_state(&self, instance: u32) -> Option<MinionState> {
        self.minions.get(&instance).map(|m| m.state)
    }

    pub(crate) fn set_minion_state(&mut self, instance: u32, state: MinionState) {
        if let Some(minion) = self.minions.get_mut(&instance) {
            trace!("MINION {}: {:?} -> {:?}", instance, minion.state, state);
            minion.state = state;
        }
    }

    pub(crate) fn vbios_entry(&self, link: u32) -> Option<&VbiosLinkEntry> {
        let (table, base_entry) = self.vbios.as_ref()?;
        table.link_entry(*base_entry, link as usize)
    }

    pub(crate) fn link_rd(&mut self, link: u32, offset: u32) -> u32 {
        let value = self.io.read32(RegAddr::link(link, offset));
        trace!("link {} rd 0x{:04x} = 0x{:08x}", link, offset, value);
        value
    }

    pub(crate) fn link_wr(&mut self, link: u32, offset: u32, value: u32) {
        trace!("link {} wr 0x{:04x} = 0x{:08x}", link, offset, value);
        self.io.write32(RegAddr::link(link, offset), value);
    }

    pub(crate) fn minion_rd(&mut self, instance: u32, offset: u32) -> u32 {
        let value = self.io.read32(RegAddr::minion(instance, offset));
        trace!("minion {} rd 0x{:04x} = 0x{:08x}", instance, offset, value);
        value
    }

    pub(crate) fn minion_wr(&mut self, instance: u32, offset: u32, value: u32) {
        trace!("minion {} wr 0x{:04x} = 0x{:08x}", instance, offset, value);
        self.io.write32(RegAddr::minion(instance, offset), value);
    }

    pub(crate) fn notify_port(&mut self, link: u32, event: PortEvent) {
        self.events.port_event(link, event);
    }

    pub(crate) fn report_fault(&mut self, code: FaultCode, link: Option<u32>, message: String) {
        self.events.fault(FaultReport {
            code,
            link,
            message,
        });
    }

    /// Publishes `code` for `link` when `result` is an error, then passes it on.
    pub(crate) fn report_on_error<T>(
        &mut self,
        code: FaultCode,
        link: u32,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(err) = &result {
            self.report_fault(code, Some(link), err.to_string());
        }
        result
    }
}
