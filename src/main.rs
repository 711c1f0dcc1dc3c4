// SPDX-License-Identifier: MIT

use clap::{Parser, ValueEnum};
use nvlink_bringup::config::TrainingModel;
use nvlink_bringup::events::{Event, EventLog};
use nvlink_bringup::firmware::{MinionFirmware, UcodeImage};
use nvlink_bringup::sim::{synthetic_firmware, SimHardware};
use nvlink_bringup::training::TrainingReport;
use nvlink_bringup::vbios::NvLinkConfigTable;
use nvlink_bringup::{Chip, Device, DeviceConfig};
use serde::Serialize;
use std::path::PathBuf;

/// Brings up NVLink links on a simulated NVSwitch.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, value_enum, default_value_t = Chip::Lr10)]
    chip: Chip,

    /// Comma separated link numbers.
    #[arg(short, long, value_delimiter = ',', required = true)]
    links: Vec<u32>,

    /// Device configuration in JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Production MINION ucode image. A built-in image is used when absent.
    #[arg(long)]
    firmware: Option<PathBuf>,

    #[arg(long, requires = "firmware")]
    debug_firmware: Option<PathBuf>,

    /// VBIOS NVLink configuration table.
    #[arg(long)]
    vbios: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    vbios_entry: usize,

    #[arg(short, long, value_enum, default_value_t = Command::Train)]
    command: Command,

    #[arg(short, long, value_enum, default_value_t = Output::Debug)]
    output: Output,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Command {
    /// Train with the chip's default model.
    Train,
    /// Launch ALI on every link, then wait for all of them.
    Ali,
    ResetAndTrain,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Output {
    Debug,
    Json,
}

#[derive(Debug, Serialize)]
struct LinkOutcome {
    link: u32,
    report: Option<TrainingReport>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Summary {
    chip: Chip,
    outcomes: Vec<LinkOutcome>,
    events: Vec<Event>,
}

fn load_firmware(args: &Args) -> MinionFirmware {
    let Some(path) = &args.firmware else {
        return synthetic_firmware();
    };
    let production = UcodeImage::load(path)
        .unwrap_or_else(|err| panic!("Cannot load MINION ucode at {:?}: {}", path, err));
    let debug = args.debug_firmware.as_ref().map(|path| {
        UcodeImage::load(path)
            .unwrap_or_else(|err| panic!("Cannot load debug MINION ucode at {:?}: {}", path, err))
    });
    MinionFirmware { production, debug }
}

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DeviceConfig::load(path)
            .unwrap_or_else(|err| panic!("Cannot load configuration at {:?}: {}", path, err)),
        None => DeviceConfig::default(),
    };
    let firmware = load_firmware(&args);

    let sim = SimHardware::new(&args.links);
    let events = EventLog::default();
    let mut device = Device::new(
        "nvswitch0",
        args.chip,
        Box::new(sim),
        config,
        args.links.iter().copied(),
    )
    .expect("Cannot create device");
    device.set_event_sink(Box::new(events.clone()));
    if let Some(path) = &args.vbios {
        let table = NvLinkConfigTable::load(path)
            .unwrap_or_else(|err| panic!("Cannot load VBIOS table at {:?}: {}", path, err));
        device.set_vbios(table, args.vbios_entry);
    }
    device
        .initialize(&firmware)
        .expect("Cannot initialize device");

    let links = device.link_numbers();
    let results = match args.command {
        Command::Ali => device.train_links_ali(&links),
        Command::Train => links
            .iter()
            .map(|&link| {
                let result = match device.training_model() {
                    TrainingModel::Legacy => device.train_link(link),
                    TrainingModel::Ali => device.train_link_ali(link),
                };
                (link, result)
            })
            .collect(),
        Command::ResetAndTrain => links
            .iter()
            .map(|&link| (link, device.reset_and_train_link(link)))
            .collect(),
    };

    let summary = Summary {
        chip: args.chip,
        outcomes: results
            .into_iter()
            .map(|(link, result)| match result {
                Ok(report) => LinkOutcome {
                    link,
                    report: Some(report),
                    error: None,
                },
                Err(err) => LinkOutcome {
                    link,
                    report: None,
                    error: Some(err.to_string()),
                },
            })
            .collect(),
        events: events.events(),
    };

    match &args.output {
        Output::Debug => {
            println!("{:#?}", summary);
        }
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(&summary).expect("Cannot serialize training summary into JSON, try another output format"));
        }
    }
}
