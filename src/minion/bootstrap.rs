// SPDX-License-Identifier: MIT

//! MINION falcon bring-up: scrub wait, IMEM/DMEM load, start and liveness check.

use crate::device::Device;
use crate::events::FaultCode;
use crate::firmware::{MinionFirmware, UcodeImage};
use crate::minion::{MinionCommand, MinionState};
use crate::regs::{
    minion, FalconCpuCtl, FalconDmaCtl, FalconImemTag, FalconIrq, FalconMemCtrl, FalconSctl,
    MinionIntrEnable, MinionStatus, MINION_INTR_CODE_SWREQ, MINION_STATUS_BOOT,
};
use crate::timeout::{poll_until, Poll};
use crate::{Error, Result};
use log::{debug, error, info};

const WORDS_PER_BLOCK: usize = minion::IMEM_BLOCK_SIZE / 4;

fn align_block(size: usize) -> usize {
    (size + minion::IMEM_BLOCK_SIZE - 1) / minion::IMEM_BLOCK_SIZE * minion::IMEM_BLOCK_SIZE
}

fn le_words(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks(4).map(|chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(word)
    })
}

impl Device {
    /// Boots every MINION of the device in instance order, stopping at the
    /// first one that fails.
    pub fn bootstrap_minions(&mut self, firmware: &MinionFirmware) -> Result<()> {
        let instances: Vec<u32> = self.minions.keys().copied().collect();
        for instance in instances {
            self.bootstrap_minion(instance, firmware)?;
        }
        Ok(())
    }

    pub fn bootstrap_minion(&mut self, instance: u32, firmware: &MinionFirmware) -> Result<()> {
        if self.minion_state(instance) == Some(MinionState::Ready) {
            debug!("MINION {}: already bootstrapped", instance);
            return Ok(());
        }
        let status = MinionStatus::from(self.minion_rd(instance, minion::MINION_STATUS));
        if status.status() == MINION_STATUS_BOOT {
            info!("MINION {}: ucode already running", instance);
            self.set_minion_state(instance, MinionState::Ready);
            return Ok(());
        }

        self.set_minion_state(instance, MinionState::Bootstrapping);
        let result = self
            .load_and_start_minion(instance, firmware)
            .and_then(|_| {
                self.set_minion_state(instance, MinionState::Ready);
                self.minion_liveness_test(instance)
            });
        if let Err(err) = &result {
            error!("MINION {}: bootstrap failed: {}", instance, err);
            self.set_minion_state(instance, MinionState::Uninitialized);
            self.report_fault(
                FaultCode::MinionBootFailure,
                None,
                format!("MINION {} bootstrap failed: {}", instance, err),
            );
        } else {
            info!("MINION {}: ucode running", instance);
        }
        result
    }

    fn load_and_start_minion(&mut self, instance: u32, firmware: &MinionFirmware) -> Result<()> {
        let irqs = FalconIrq::WDTMR | FalconIrq::HALT | FalconIrq::EXTERR | FalconIrq::SWGEN0;
        self.minion_wr(instance, minion::FALCON_IRQMSET, irqs.bits());
        self.minion_wr(instance, minion::FALCON_IRQDEST, irqs.bits());
        self.minion_wr(
            instance,
            minion::MINION_INTR_STALL_EN,
            MinionIntrEnable::all().bits(),
        );

        let budget = self.timeouts.minion_scrub;
        let interval = self.timeouts.poll_interval;
        let what = format!("MINION {} memory scrub", instance);
        poll_until(&what, budget, interval, || {
            let value = self.minion_rd(instance, minion::FALCON_DMACTL);
            let scrubbing = FalconDmaCtl::IMEM_SCRUBBING | FalconDmaCtl::DMEM_SCRUBBING;
            if FalconDmaCtl::from_bits_truncate(value).intersects(scrubbing) {
                Poll::Pending(value)
            } else {
                Poll::Ready(())
            }
        })?;

        let sctl = FalconSctl::from_bits_truncate(self.minion_rd(instance, minion::FALCON_SCTL));
        let debug_mode = sctl.contains(FalconSctl::DEBUG_MODE);
        let image = firmware.select(debug_mode)?;
        info!(
            "MINION {}: loading {} ucode, {} app(s)",
            instance,
            if debug_mode { "debug" } else { "production" },
            image.header.app_count
        );
        self.load_minion_image(instance, image);

        self.minion_wr(instance, minion::FALCON_BOOTVEC, image.header.boot_vector);
        self.minion_wr(instance, minion::FALCON_CPUCTL, FalconCpuCtl::STARTCPU.bits());

        let budget = self.timeouts.minion_boot;
        let what = format!("MINION {} boot", instance);
        let booted = poll_until(&what, budget, interval, || {
            let status = MinionStatus::from(self.minion_rd(instance, minion::MINION_STATUS));
            if status.status() == MINION_STATUS_BOOT {
                Poll::Ready(())
            } else {
                Poll::Pending(status.into())
            }
        });
        if let Err(err) = booted {
            // The liveness test decides whether the ucode is usable.
            error!("MINION {}: boot status never reported: {}", instance, err);
            if let Some(record) = self.minions.get_mut(&instance) {
                record.boot_timed_out = true;
            }
        }
        Ok(())
    }

    /// OS segments at the bottom of IMEM and DMEM, applications after them on
    /// block boundaries.
    fn load_minion_image(&mut self, instance: u32, image: &UcodeImage) {
        let mut imem_base = 0;
        let mut dmem_base = 0;
        let segments = std::iter::once((image.os_code(), image.os_data())).chain(image.apps());
        for (code, data) in segments {
            self.load_minion_imem(instance, imem_base, code);
            self.load_minion_dmem(instance, dmem_base, data);
            imem_base += align_block(code.len());
            dmem_base += align_block(data.len());
        }
    }

    fn load_minion_imem(&mut self, instance: u32, base: usize, code: &[u8]) {
        debug!("MINION {}: IMEM 0x{:x} <- {} bytes", instance, base, code.len());
        self.minion_wr(instance, minion::FALCON_IMEMC, FalconMemCtrl::at(base as u32).into());
        let first_tag = base / minion::IMEM_BLOCK_SIZE;
        for (index, block) in code.chunks(minion::IMEM_BLOCK_SIZE).enumerate() {
            let tag = FalconImemTag::new().with_tag((first_tag + index) as u16);
            self.minion_wr(instance, minion::FALCON_IMEMT, tag.into());
            let mut written = 0;
            for word in le_words(block) {
                self.minion_wr(instance, minion::FALCON_IMEMD, word);
                written += 1;
            }
            for _ in written..WORDS_PER_BLOCK {
                self.minion_wr(instance, minion::FALCON_IMEMD, 0);
            }
        }
    }

    fn load_minion_dmem(&mut self, instance: u32, base: usize, data: &[u8]) {
        debug!("MINION {}: DMEM 0x{:x} <- {} bytes", instance, base, data.len());
        self.minion_wr(instance, minion::FALCON_DMEMC, FalconMemCtrl::at(base as u32).into());
        for word in le_words(data) {
            self.minion_wr(instance, minion::FALCON_DMEMD, word);
        }
    }

    /// Raises a software interrupt through the first link of the MINION and
    /// expects the ucode to answer with SWREQ.
    fn minion_liveness_test(&mut self, instance: u32) -> Result<()> {
        let link = self
            .minions
            .get(&instance)
            .and_then(|m| m.links.iter().min().copied())
            .ok_or_else(|| {
                Error::InvalidState(format!("MINION {} has no links to test with", instance))
            })?;
        self.send_minion_command(link, MinionCommand::Swintr, 0)?;
        let status = MinionStatus::from(self.minion_rd(instance, minion::MINION_STATUS));
        if status.intr_code() != MINION_INTR_CODE_SWREQ {
            error!(
                "MINION {}: no SWREQ after SWINTR, status 0x{:08x}",
                instance,
                u32::from(status)
            );
            return Err(Error::HardwareFault {
                link,
                what: format!("MINION {} liveness test", instance),
                code: status.intr_code(),
                subcode: 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Chip;
    use crate::sim::{synthetic_firmware, testing};
    use simplelog::{Config, LevelFilter, TestLogger};

    #[test]
    fn test_image_is_loaded_block_by_block() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::device(Chip::Lr10, &[0, 1], crate::DeviceConfig::default());
        let firmware = synthetic_firmware();
        dev.bootstrap_minions(&firmware).unwrap();

        assert_eq!(dev.minion_state(0), Some(MinionState::Ready));
        assert!(!dev.minion(0).unwrap().boot_timed_out);
        let image = &firmware.production;
        let os_code = image.os_code();
        assert_eq!(os_code.len(), 300);
        assert_eq!(sim.imem_tags(0), vec![0, 1, 2]);

        let imem = sim.imem(0);
        assert_eq!(&imem[..os_code.len()], os_code);
        assert!(imem[os_code.len()..512].iter().all(|&b| b == 0));
        let (app_code, app_data) = image.apps().next().unwrap();
        assert_eq!(&imem[512..512 + app_code.len()], app_code);

        let dmem = sim.dmem(0);
        assert_eq!(&dmem[..image.os_data().len()], image.os_data());
        assert_eq!(&dmem[256..256 + app_data.len()], app_data);
        assert_eq!(sim.boot_vector(0), Some(image.header.boot_vector));

        assert_eq!(sim.commands(0), vec![MinionCommand::Swintr]);
        assert!(sim.commands(1).is_empty());
        assert!(events.faults().is_empty());
    }

    #[test]
    fn test_running_ucode_is_not_reloaded() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::device(Chip::Ls10, &[4], crate::DeviceConfig::default());
        sim.poke_minion(
            1,
            minion::MINION_STATUS,
            MinionStatus::new().with_status(MINION_STATUS_BOOT).into(),
        );
        dev.bootstrap_minions(&synthetic_firmware()).unwrap();
        assert_eq!(dev.minion_state(1), Some(MinionState::Ready));
        assert_eq!(sim.writes_to_minion(1, minion::FALCON_IMEMD), 0);
        assert!(sim.commands(4).is_empty());

        // A second pass over a Ready MINION touches nothing.
        let before = sim.write_count();
        dev.bootstrap_minions(&synthetic_firmware()).unwrap();
        assert_eq!(sim.write_count(), before);
    }

    #[test]
    fn test_every_instance_is_booted() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::device(Chip::Lr10, &[6, 0, 5], crate::DeviceConfig::default());
        dev.bootstrap_minions(&synthetic_firmware()).unwrap();
        assert_eq!(dev.minion_state(0), Some(MinionState::Ready));
        assert_eq!(dev.minion_state(1), Some(MinionState::Ready));
        assert_eq!(sim.commands(5), vec![MinionCommand::Swintr]);
        assert!(sim.commands(6).is_empty());
    }

    #[test]
    fn test_liveness_failure() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::device(Chip::Lr10, &[0], crate::DeviceConfig::default());
        sim.knobs(|k| k.liveness_fail = true);
        let err = dev.bootstrap_minions(&synthetic_firmware()).unwrap_err();
        assert!(matches!(err, Error::HardwareFault { .. }));
        assert_eq!(dev.minion_state(0), Some(MinionState::Uninitialized));
        let faults = events.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code, FaultCode::MinionBootFailure);
        assert_eq!(faults[0].link, None);
        assert!(dev
            .send_minion_command(0, MinionCommand::Nop, 0)
            .unwrap_err()
            .is_not_initialized());
    }

    #[test]
    fn test_boot_timeout_is_not_fatal() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, events) = testing::device(Chip::Lr10, &[0], crate::DeviceConfig::default());
        sim.knobs(|k| k.boot_hang = true);
        dev.bootstrap_minions(&synthetic_firmware()).unwrap();
        assert_eq!(dev.minion_state(0), Some(MinionState::Ready));
        assert!(dev.minion(0).unwrap().boot_timed_out);
        assert!(events.faults().is_empty());
    }

    #[test]
    fn test_scrub() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::device(Chip::Lr10, &[0], crate::DeviceConfig::default());
        sim.knobs(|k| k.scrub_polls = 3);
        dev.bootstrap_minions(&synthetic_firmware()).unwrap();

        let (mut dev, sim, events) = testing::device(Chip::Lr10, &[0], crate::DeviceConfig::default());
        sim.knobs(|k| k.scrub_polls = u32::MAX);
        assert!(dev
            .bootstrap_minions(&synthetic_firmware())
            .unwrap_err()
            .is_timeout());
        assert_eq!(dev.minion_state(0), Some(MinionState::Uninitialized));
        assert_eq!(sim.writes_to_minion(0, minion::FALCON_IMEMD), 0);
        assert_eq!(events.faults()[0].code, FaultCode::MinionBootFailure);
    }

    #[test]
    fn test_debug_fused_selects_debug_image() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let firmware = synthetic_firmware();
        let debug_vector = firmware.debug.as_ref().unwrap().header.boot_vector;
        assert_ne!(debug_vector, firmware.production.header.boot_vector);

        let (mut dev, sim, _) = testing::device(Chip::Lr10, &[0], crate::DeviceConfig::default());
        sim.knobs(|k| k.debug_fused = true);
        dev.bootstrap_minions(&firmware).unwrap();
        assert_eq!(sim.boot_vector(0), Some(debug_vector));

        let production_only = MinionFirmware {
            production: firmware.production.clone(),
            debug: None,
        };
        let (mut dev, sim, _) = testing::device(Chip::Lr10, &[0], crate::DeviceConfig::default());
        sim.knobs(|k| k.debug_fused = true);
        assert!(matches!(
            dev.bootstrap_minions(&production_only),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_le_words_pad_the_tail() {
        let words: Vec<u32> = le_words(&[1, 2, 3, 4, 5]).collect();
        assert_eq!(words, vec![0x0403_0201, 0x0000_0005]);
        assert_eq!(align_block(0), 0);
        assert_eq!(align_block(1), 256);
        assert_eq!(align_block(512), 512);
    }
}
