// SPDX-License-Identifier: MIT

use crate::config::{LineRate, Loopback};
use crate::link::error_rate::ErrorRateThreshold;
use crate::link::sublink::Sublink;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use strum::Display;

pub mod dl;
pub mod error_rate;
pub mod sublink;
pub mod system;
pub mod tl;

/// Link state as reported to callers, merged from the DL and TL layers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum LinkMode {
    Off,
    Reset,
    Detect,
    Safe,
    Active,
    Sleep,
    Fault,
    Recovery,
    Contain,
    ActivePending,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
pub enum RemoteDeviceType {
    None,
    Gpu,
    Switch,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub remote_sid: u64,
    pub local_sid: u64,
    pub remote_link: u32,
    pub remote_device: RemoteDeviceType,
}

#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub number: u32,
    pub minion: u32,
    pub local_index: u32,
    pub tx: Sublink,
    pub rx: Sublink,
    pub mode: LinkMode,
    pub error_threshold: ErrorRateThreshold,
    pub remote_end_disabled: bool,
    pub ac_coupled: bool,
    pub line_rate: Option<LineRate>,
    pub loopback: Loopback,
    pub topology: Option<Topology>,
}

impl Link {
    pub fn new(number: u32, links_per_minion: u32) -> Self {
        Self {
            number,
            minion: number / links_per_minion,
            local_index: number % links_per_minion,
            tx: Sublink::tx(),
            rx: Sublink::rx(),
            mode: LinkMode::Reset,
            error_threshold: ErrorRateThreshold::default(),
            remote_end_disabled: false,
            ac_coupled: false,
            line_rate: None,
            loopback: Loopback::default(),
            topology: None,
        }
    }

    /// Forget everything learned during the previous training cycle.
    pub fn reset_for_training(&mut self) {
        self.tx = Sublink::tx();
        self.rx = Sublink::rx();
        self.mode = LinkMode::Reset;
        self.topology = None;
    }
}

/// Arena of link records with an id to slot index.
#[derive(Debug, Default)]
pub struct LinkTable {
    slots: Vec<Link>,
    index: BTreeMap<u32, usize>,
}

impl LinkTable {
    pub fn insert(&mut self, link: Link) -> Result<()> {
        if self.index.contains_key(&link.number) {
            return Err(Error::InvalidState(format!(
                "link {} is already registered",
                link.number
            )));
        }
        self.index.insert(link.number, self.slots.len());
        self.slots.push(link);
        Ok(())
    }

    pub fn remove(&mut self, number: u32) -> Option<Link> {
        let slot = self.index.remove(&number)?;
        let removed = self.slots.swap_remove(slot);
        if let Some(moved) = self.slots.get(slot) {
            self.index.insert(moved.number, slot);
        }
        Some(removed)
    }

    pub fn get(&self, number: u32) -> Option<&Link> {
        self.index.get(&number).map(|&slot| &self.slots[slot])
    }

    pub fn get_mut(&mut self, number: u32) -> Option<&mut Link> {
        self.index.get(&number).map(|&slot| &mut self.slots[slot])
    }

    pub fn contains(&self, number: u32) -> bool {
        self.index.contains_key(&number)
    }

    /// Link numbers in ascending order.
    pub fn numbers(&self) -> Vec<u32> {
        self.index.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.index.values().map(|&slot| &self.slots[slot])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_minion_association() {
        let link = Link::new(9, 4);
        assert_eq!(link.minion, 2);
        assert_eq!(link.local_index, 1);
        assert_eq!(link.mode, LinkMode::Reset);
    }

    #[test]
    fn test_table_insert_remove() {
        let mut table = LinkTable::default();
        for number in [3, 7, 1] {
            table.insert(Link::new(number, 4)).unwrap();
        }
        assert!(table.insert(Link::new(7, 4)).is_err());
        assert_eq!(table.numbers(), vec![1, 3, 7]);

        let removed = table.remove(3).unwrap();
        assert_eq!(removed.number, 3);
        assert!(table.remove(3).is_none());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().number, 1);
        assert_eq!(table.get(7).unwrap().number, 7);
        table.get_mut(1).unwrap().remote_end_disabled = true;
        assert!(table.get(1).unwrap().remote_end_disabled);
        assert_eq!(
            table.iter().map(|l| l.number).collect::<Vec<_>>(),
            vec![1, 7]
        );
    }
}
