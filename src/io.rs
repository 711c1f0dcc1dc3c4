// SPDX-License-Identifier: MIT

use crate::regs::RegAddr;

/// 32-bit register access to one device.
///
/// Reads take `&mut self` because reading a status register may have side
/// effects on the hardware model behind it.
pub trait RegisterIo: Send {
    fn read32(&mut self, addr: RegAddr) -> u32;

    fn write32(&mut self, addr: RegAddr, value: u32);
}
