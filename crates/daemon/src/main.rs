//! Daemon entry point: bring-up, scheduler loop, teardown.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vost_platform::ad5522::PmuDevice;
use vost_platform::adc::AdcReader;
use vost_platform::gpio::GpioLine;
use vost_platform::identity::Identity;
use vost_platform::mcdc04::LightSensor;
use vost_platform::pmu::{PmuBoard, SupplyPins, SupplyRail};
use vost_platform::spi::SpiMode;
use vost_platform::tlc5948a::LedDriver;
use vost_platform::{I2cDevLink, SpidevLink};

use vostd::beacon::{self, Announcer};
use vostd::bindings::HwBindings;
use vostd::config::Config;
use vostd::netinfo;
use vostd::scheduler::{Command, TrackScheduler};
use vostd::script::ScriptHost;

/// SPI clock rate shared by both device links.
const SPI_SPEED_HZ: u32 = 400_000;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.verbose);
    info!("this is vostd {}", env!("CARGO_PKG_VERSION"));

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone())
        .context("registering SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone())
        .context("registering SIGTERM handler")?;

    let (commands, command_rx) = mpsc::channel();
    if config.verbose {
        let _ = commands.send(Command::Verbose);
    }

    let bindings = open_peripherals(&config)?;
    let host = ScriptHost::new(bindings).context("spawning script state")?;
    let mut scheduler = TrackScheduler::new(host, command_rx, interrupted);
    let port = scheduler
        .configure(config.request_port)
        .context("binding request socket")?;
    info!("request socket bound on tcp port {port}");

    let mac = netinfo::primary_mac(config.interface.as_deref());
    let announcer = Announcer::start(
        config.beacon_port,
        beacon::announcement(&mac),
        beacon::PUBLISH_PERIOD,
    )
    .context("starting discovery beacon")?;
    info!("beacon announces {mac} on udp port {}", config.beacon_port);

    scheduler.run();

    announcer.silence();
    drop(announcer);
    drop(commands);
    info!("shut down");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open every peripheral and assemble the script bindings.
///
/// Construction order matters: the supply rails come up and the PMU gets
/// its reset pulse before anything touches its registers.
fn open_peripherals(
    config: &Config,
) -> anyhow::Result<HwBindings<SpidevLink, SpidevLink, I2cDevLink>> {
    let pmu_link = SpidevLink::open(&config.pmu_spidev, SpiMode::Mode1, 8, SPI_SPEED_HZ)
        .with_context(|| format!("opening {}", config.pmu_spidev.display()))?;
    let pins = SupplyPins {
        dcdc_en: GpioLine::new(&config.gpio_dcdc_en),
        ldo_en: GpioLine::new(&config.gpio_ldo_en),
        sup_lo: GpioLine::new(&config.gpio_sup_lo),
        sup_mid: GpioLine::new(&config.gpio_sup_mid),
        sup_hi: GpioLine::new(&config.gpio_sup_hi),
        reset: GpioLine::new(&config.gpio_pmu_rst),
        tmp_alarm: GpioLine::new(&config.gpio_pmu_tmp),
        cg_alarm: GpioLine::new(&config.gpio_pmu_cg),
        busy: GpioLine::new(&config.gpio_pmu_busy),
    };
    let mut board = PmuBoard::new(PmuDevice::new(pmu_link), pins, AdcReader::new(&config.iio_dir));
    board
        .set_supply_rail(SupplyRail::Mid)
        .context("powering supply rails")?;
    board.reset().context("resetting the pmu")?;

    let led_link = SpidevLink::open(&config.led_spidev, SpiMode::Mode3, 8, SPI_SPEED_HZ)
        .with_context(|| format!("opening {}", config.led_spidev.display()))?;
    let led = LedDriver::new(led_link).context("initializing the led driver")?;

    let lmu_link = I2cDevLink::open(&config.i2c_dev, config.lmu_addr)
        .with_context(|| format!("opening {}", config.i2c_dev.display()))?;
    let lmu = LightSensor::new(lmu_link).context("initializing the color sensor")?;

    let hw = Identity::new(
        &config.board_id_path,
        &config.box_id_path,
        env!("CARGO_PKG_VERSION"),
    );

    Ok(HwBindings {
        pmu: Rc::new(RefCell::new(board)),
        led: Rc::new(RefCell::new(led)),
        lmu: Rc::new(RefCell::new(lmu)),
        hw,
        db: config.db(),
    })
}
