// SPDX-License-Identifier: MIT

//! Per-link system registers and the bits of training completion that are
//! plain register programming.

use crate::device::Device;
use crate::link::{RemoteDeviceType, Topology};
use crate::regs::{
    nvldl, nvlipt, nvltlc, DlInterrupts, FlitFilter, RemoteLinkInfo, SystemLinkChannelCtrl,
    SystemLinkChannelCtrl2, SystemLinkClkCtrl, TpCounterConfig, TpCounterEnable,
    AN1_CTRL_PWRM_L2_ENABLE, REMOTE_CHIP_TYPE_NV3P0AMP, REMOTE_CHIP_TYPE_NV3P0LRK,
    REMOTE_CHIP_TYPE_NV4P0HOP, REMOTE_CHIP_TYPE_NV4P0LAG, SW_LINK_MODE_CTRL_LINK_DISABLE,
    TP_CNTR_UNIT_FLITS, TP_CNTR_VCSET_FILTER_ALL,
};
use crate::{Error, Result};
use log::{debug, error, info};

fn out_of_range(link: u32, what: &str, value: u8) -> Error {
    Error::Configuration(format!(
        "link {}: {} value {} does not fit the register",
        link, what, value
    ))
}

pub(crate) fn remote_device_type(chip_type: u32) -> RemoteDeviceType {
    match chip_type {
        REMOTE_CHIP_TYPE_NV3P0AMP | REMOTE_CHIP_TYPE_NV4P0HOP => RemoteDeviceType::Gpu,
        REMOTE_CHIP_TYPE_NV3P0LRK | REMOTE_CHIP_TYPE_NV4P0LAG => RemoteDeviceType::Switch,
        _ => RemoteDeviceType::None,
    }
}

impl Device {
    pub fn setup_link_system_registers(&mut self, link: u32) -> Result<()> {
        let hal = self.hal;
        let entry = self.vbios_entry(link).cloned();
        let config = self.config.clone();

        let mut clk = SystemLinkClkCtrl::from(self.link_rd(link, nvlipt::CTRL_SYSTEM_LINK_CLK_CTRL));
        if let Some(rate) = config.speed {
            let code = hal.line_rate_code(rate).map_err(|err| {
                error!("Link {}: illegal line rate {} requested", link, rate);
                err
            })?;
            info!("Link {}: line rate {} (0x{:x})", link, rate, code);
            clk.set_line_rate(code);
            self.link_mut(link)?.line_rate = Some(rate);
        }
        let refclk = config
            .reference_clock_mode
            .or(entry.as_ref().map(|e| e.param_3.reference_clock_mode()));
        if let Some(mode) = refclk {
            clk.set_reference_clock_mode_checked(mode)
                .map_err(|_| out_of_range(link, "reference clock mode", mode))?;
        }
        self.link_wr(link, nvlipt::CTRL_SYSTEM_LINK_CLK_CTRL, clk.into());

        let mut channel =
            SystemLinkChannelCtrl::from(self.link_rd(link, nvlipt::CTRL_SYSTEM_LINK_CHANNEL_CTRL));
        let txtrain = config.txtrain;
        if let Some(v) = txtrain
            .fom_format
            .or(entry.as_ref().map(|e| e.param_5.txtrain_fom_format()))
        {
            channel
                .set_txtrain_fom_format_checked(v)
                .map_err(|_| out_of_range(link, "TX train FOM format", v))?;
        }
        if let Some(v) = txtrain
            .optimization_algorithm
            .or(entry.as_ref().map(|e| e.txtrain_optimization_algorithm))
        {
            channel.set_txtrain_optimization_algorithm(v);
        }
        if let Some(v) = txtrain
            .adjustment_algorithm
            .or(entry.as_ref().map(|e| e.param_5.txtrain_adjustment_algorithm()))
        {
            channel
                .set_txtrain_adjustment_algorithm_checked(v)
                .map_err(|_| out_of_range(link, "TX train adjustment algorithm", v))?;
        }
        if let Some(v) = txtrain
            .min_train_time_mantissa
            .or(entry.as_ref().map(|e| e.param_6.min_train_time_mantissa()))
        {
            channel
                .set_txtrain_min_train_time_mantissa_checked(v)
                .map_err(|_| out_of_range(link, "minimum train time mantissa", v))?;
        }
        if let Some(v) = txtrain
            .min_train_time_exponent
            .or(entry.as_ref().map(|e| e.param_6.min_train_time_exponent()))
        {
            channel
                .set_txtrain_min_train_time_exponent_checked(v)
                .map_err(|_| out_of_range(link, "minimum train time exponent", v))?;
        }

        let ac_coupled = self.link(link)?.ac_coupled
            || entry.as_ref().map_or(false, |e| e.param_0.ac_mode());
        channel.set_ac_dc_mode(ac_coupled);
        self.link_mut(link)?.ac_coupled = ac_coupled;

        if let Some(v) = config
            .block_code_mode
            .or(entry.as_ref().map(|e| e.param_3.block_code_mode()))
        {
            channel
                .set_block_code_mode_checked(v)
                .map_err(|_| out_of_range(link, "block code mode", v))?;
        }
        self.link_wr(link, nvlipt::CTRL_SYSTEM_LINK_CHANNEL_CTRL, channel.into());

        let an1 = self.link_rd(link, nvlipt::CTRL_SYSTEM_LINK_AN1_CTRL);
        let an1 = if entry.as_ref().map_or(false, |e| e.param_0.l2_enable()) {
            an1 | AN1_CTRL_PWRM_L2_ENABLE
        } else {
            an1 & !AN1_CTRL_PWRM_L2_ENABLE
        };
        self.link_wr(link, nvlipt::CTRL_SYSTEM_LINK_AN1_CTRL, an1);

        if let (true, Some(recal)) = (hal.supports_recal_settings(), config.link_recal) {
            let ctrl2 = SystemLinkChannelCtrl2::new()
                .with_l1_min_recal_time_mantissa_checked(recal.min_recal_time_mantissa)
                .and_then(|c| c.with_l1_min_recal_time_exponent_checked(recal.min_recal_time_exponent))
                .and_then(|c| {
                    c.with_l1_max_recal_period_mantissa_checked(recal.max_recal_period_mantissa)
                })
                .and_then(|c| {
                    c.with_l1_max_recal_period_exponent_checked(recal.max_recal_period_exponent)
                })
                .map_err(|_| {
                    Error::Configuration(format!("link {}: recalibration settings out of range", link))
                })?;
            self.link_wr(link, nvlipt::CTRL_SYSTEM_LINK_CHANNEL_CTRL2, ctrl2.into());
        }
        Ok(())
    }

    pub fn load_link_disable_settings(&mut self, link: u32) -> Result<()> {
        let ctrl = self.link_rd(link, nvlipt::CTRL_SW_LINK_MODE_CTRL);
        self.link_wr(
            link,
            nvlipt::CTRL_SW_LINK_MODE_CTRL,
            ctrl & !SW_LINK_MODE_CTRL_LINK_DISABLE,
        );

        let disabled = self
            .vbios_entry(link)
            .map_or(false, |e| e.param_0.link_disable());
        if !disabled {
            return Ok(());
        }
        if !self.is_link_in_reset(link) {
            error!("Link {}: disabled in VBIOS but already out of reset", link);
            return Ok(());
        }
        info!("Link {}: disabled in VBIOS, termination only", link);
        self.link_termination_setup(link)?;
        self.link_mut(link)?.remote_end_disabled = true;
        Ok(())
    }

    pub fn store_topology(&mut self, link: u32) -> Result<Topology> {
        let remote_hi = self.link_rd(link, nvlipt::TOPOLOGY_REMOTE_CHIP_SID_HI) as u64;
        let remote_lo = self.link_rd(link, nvlipt::TOPOLOGY_REMOTE_CHIP_SID_LO) as u64;
        let local_hi = self.link_rd(link, nvlipt::TOPOLOGY_LOCAL_CHIP_SID_HI) as u64;
        let local_lo = self.link_rd(link, nvlipt::TOPOLOGY_LOCAL_CHIP_SID_LO) as u64;
        let info = RemoteLinkInfo::from(self.link_rd(link, nvlipt::TOPOLOGY_REMOTE_LINK_INFO));
        let chip_type = self.link_rd(link, nvlipt::TOPOLOGY_REMOTE_CHIP_TYPE);

        let topology = Topology {
            remote_sid: remote_hi << 32 | remote_lo,
            local_sid: local_hi << 32 | local_lo,
            remote_link: info.link_number() as u32,
            remote_device: remote_device_type(chip_type),
        };
        debug!("Link {}: {:?}", link, topology);
        self.link_mut(link)?.topology = Some(topology);
        Ok(topology)
    }

    pub fn init_buffer_ready(&mut self, link: u32, nport: bool) -> Result<()> {
        let hal = self.hal;
        hal.init_buffer_ready(self, link, nport)
    }

    /// Counter 0 counts data flits, counter 1 every flit, on both directions.
    pub fn configure_throughput_counters(&mut self, link: u32) {
        let data = TpCounterConfig::new()
            .with_unit(TP_CNTR_UNIT_FLITS)
            .with_flit_filter(FlitFilter::DATA.bits())
            .with_vcset_filter_mode(TP_CNTR_VCSET_FILTER_ALL);
        let all = data.with_flit_filter(FlitFilter::all().bits());
        let enable = TpCounterEnable::ENABLE_0 | TpCounterEnable::ENABLE_1;

        for (ctrl, counter) in [
            (nvltlc::TX_DEBUG_TP_CNTR_CTRL, nvltlc::tx_tp_cntr_ctrl as fn(u32) -> u32),
            (nvltlc::RX_DEBUG_TP_CNTR_CTRL, nvltlc::rx_tp_cntr_ctrl),
        ] {
            self.link_wr(link, counter(0), data.into());
            self.link_wr(link, counter(1), all.into());
            self.link_wr(link, ctrl, enable.bits());
        }
    }

    pub fn init_dlpl_interrupts(&mut self, link: u32) {
        let stall = DlInterrupts::TX_FAULT_RAM
            | DlInterrupts::TX_FAULT_INTERFACE
            | DlInterrupts::TX_FAULT_SUBLINK_CHANGE
            | DlInterrupts::RX_FAULT_SUBLINK_CHANGE
            | DlInterrupts::RX_FAULT_DL_PROTOCOL
            | DlInterrupts::LTSSM_FAULT_DOWN
            | DlInterrupts::LTSSM_FAULT_UP
            | DlInterrupts::LTSSM_PROTOCOL
            | DlInterrupts::MINION_REQUEST;
        let nonstall = DlInterrupts::TX_REPLAY
            | DlInterrupts::TX_RECOVERY_SHORT
            | DlInterrupts::RX_LONG_ERROR_RATE
            | DlInterrupts::RX_ILA_TRIGGER
            | DlInterrupts::RX_CRC_COUNTER;

        self.link_wr(link, nvldl::TOP_INTR, DlInterrupts::all().bits());
        self.link_wr(link, nvldl::TOP_INTR_STALL_EN, stall.bits());
        self.link_wr(link, nvldl::TOP_INTR_NONSTALL_EN, nonstall.bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LineRate, RecalSettings};
    use crate::hal::Chip;
    use crate::minion::MinionCommand;
    use crate::sim::{synthetic_firmware, testing};
    use crate::vbios::NvLinkConfigTable;
    use simplelog::{Config, LevelFilter, TestLogger};
    use std::io::Cursor;

    fn sample_vbios() -> NvLinkConfigTable {
        NvLinkConfigTable::parse(&mut Cursor::new(crate::vbios::tests::sample_table())).unwrap()
    }

    #[test]
    fn test_line_rate_and_overrides() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let mut config = crate::DeviceConfig {
            speed: Some(LineRate::Gbps50),
            reference_clock_mode: Some(3),
            block_code_mode: Some(2),
            ac_coupled_mask: 1 << 1,
            ..Default::default()
        };
        config.txtrain.optimization_algorithm = Some(0x10);
        let (mut dev, sim, _) = testing::ready_device_with(Chip::Lr10, &[1], config);
        dev.setup_link_system_registers(1).unwrap();

        let clk = SystemLinkClkCtrl::from(sim.peek_link(1, nvlipt::CTRL_SYSTEM_LINK_CLK_CTRL));
        assert_eq!(clk.line_rate(), 0x6);
        assert_eq!(clk.reference_clock_mode(), 3);
        let channel =
            SystemLinkChannelCtrl::from(sim.peek_link(1, nvlipt::CTRL_SYSTEM_LINK_CHANNEL_CTRL));
        assert!(channel.ac_dc_mode());
        assert_eq!(channel.block_code_mode(), 2);
        assert_eq!(channel.txtrain_optimization_algorithm(), 0x10);
        assert_eq!(dev.link(1).unwrap().line_rate, Some(LineRate::Gbps50));
    }

    #[test]
    fn test_illegal_line_rate() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let config = crate::DeviceConfig {
            speed: Some(LineRate::Gbps53_125),
            ..Default::default()
        };
        let (mut dev, _, _) = testing::device(Chip::Ls10, &[0], config);
        let err = dev.initialize(&synthetic_firmware()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_out_of_range_override() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let config = crate::DeviceConfig {
            block_code_mode: Some(9),
            ..Default::default()
        };
        let (mut dev, _, _) = testing::device(Chip::Lr10, &[0], config);
        assert!(matches!(
            dev.setup_link_system_registers(0),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_vbios_values_and_recal() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let config = crate::DeviceConfig {
            link_recal: Some(RecalSettings {
                min_recal_time_mantissa: 1,
                min_recal_time_exponent: 2,
                max_recal_period_mantissa: 3,
                max_recal_period_exponent: 4,
            }),
            ..Default::default()
        };
        let (mut dev, sim, _) = testing::ready_device_with(Chip::Ls10, &[0, 1], config);
        dev.set_vbios(sample_vbios(), 0);
        dev.setup_link_system_registers(1).unwrap();

        let channel =
            SystemLinkChannelCtrl::from(sim.peek_link(1, nvlipt::CTRL_SYSTEM_LINK_CHANNEL_CTRL));
        assert!(channel.ac_dc_mode());
        assert_eq!(channel.txtrain_optimization_algorithm(), 0x02);
        assert_eq!(channel.txtrain_min_train_time_mantissa(), 1);
        assert_eq!(channel.txtrain_min_train_time_exponent(), 1);
        assert!(dev.link(1).unwrap().ac_coupled);
        assert_eq!(
            sim.peek_link(1, nvlipt::CTRL_SYSTEM_LINK_AN1_CTRL) & AN1_CTRL_PWRM_L2_ENABLE,
            AN1_CTRL_PWRM_L2_ENABLE
        );
        let ctrl2 =
            SystemLinkChannelCtrl2::from(sim.peek_link(1, nvlipt::CTRL_SYSTEM_LINK_CHANNEL_CTRL2));
        assert_eq!(ctrl2.l1_max_recal_period_exponent(), 4);
    }

    #[test]
    fn test_vbios_link_disable() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::device(Chip::Lr10, &[0, 1], crate::DeviceConfig::default());
        sim.poke_link(0, nvlipt::CTRL_SW_LINK_MODE_CTRL, SW_LINK_MODE_CTRL_LINK_DISABLE);
        dev.set_vbios(sample_vbios(), 0);
        dev.initialize(&synthetic_firmware()).unwrap();

        assert_eq!(sim.peek_link(0, nvlipt::CTRL_SW_LINK_MODE_CTRL), 0);
        assert!(dev.link(0).unwrap().remote_end_disabled);
        assert!(!dev.link(1).unwrap().remote_end_disabled);
        let commands = sim.commands(0);
        assert!(commands.contains(&MinionCommand::InitPhase1));
        assert!(commands.contains(&MinionCommand::InitRxTxTerm));
    }

    #[test]
    fn test_topology() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[5]);
        sim.poke_link(5, nvlipt::TOPOLOGY_REMOTE_CHIP_SID_HI, 0x1);
        sim.poke_link(5, nvlipt::TOPOLOGY_REMOTE_CHIP_SID_LO, 0x2);
        sim.poke_link(5, nvlipt::TOPOLOGY_REMOTE_LINK_INFO, 17);
        sim.poke_link(5, nvlipt::TOPOLOGY_REMOTE_CHIP_TYPE, REMOTE_CHIP_TYPE_NV4P0LAG);
        let topology = dev.store_topology(5).unwrap();
        assert_eq!(topology.remote_sid, 0x1_0000_0002);
        assert_eq!(topology.remote_link, 17);
        assert_eq!(topology.remote_device, RemoteDeviceType::Switch);
        assert_eq!(dev.link(5).unwrap().topology, Some(topology));

        assert_eq!(remote_device_type(REMOTE_CHIP_TYPE_NV3P0AMP), RemoteDeviceType::Gpu);
        assert_eq!(remote_device_type(REMOTE_CHIP_TYPE_NV4P0HOP), RemoteDeviceType::Gpu);
        assert_eq!(remote_device_type(REMOTE_CHIP_TYPE_NV3P0LRK), RemoteDeviceType::Switch);
        assert_eq!(remote_device_type(0x9), RemoteDeviceType::None);
    }

    #[test]
    fn test_throughput_counters() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let (mut dev, sim, _) = testing::ready_device(Chip::Lr10, &[0]);
        dev.configure_throughput_counters(0);
        let data = TpCounterConfig::from(sim.peek_link(0, nvltlc::rx_tp_cntr_ctrl(0)));
        assert_eq!(data.flit_filter(), FlitFilter::DATA.bits());
        let all = TpCounterConfig::from(sim.peek_link(0, nvltlc::tx_tp_cntr_ctrl(1)));
        assert_eq!(all.flit_filter(), FlitFilter::all().bits());
        assert_eq!(
            sim.peek_link(0, nvltlc::TX_DEBUG_TP_CNTR_CTRL),
            (TpCounterEnable::ENABLE_0 | TpCounterEnable::ENABLE_1).bits()
        );
    }
}
