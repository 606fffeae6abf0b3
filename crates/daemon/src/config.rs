//! CLI and runtime configuration.
//!
//! Everything is parsed once at startup into an immutable [`Config`] that
//! is handed to the scheduler by value; nothing here is process-global.

use std::path::PathBuf;

use clap::Parser;

/// Daemon configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "vostd", about = "Measurement/stimulation daemon", version)]
pub struct Config {
    /// Print debugging messages.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// TCP port of the request/reply socket.
    #[arg(long, default_value_t = 5560)]
    pub request_port: u16,

    /// UDP port of the discovery beacon.
    #[arg(long, default_value_t = 9999)]
    pub beacon_port: u16,

    /// Network interface announced in the beacon; the first non-loopback
    /// interface when unset.
    #[arg(long)]
    pub interface: Option<String>,

    /// Results database port.
    #[arg(short = 'p', long, default_value_t = 3306)]
    pub db_port: u16,

    /// Results database password.
    #[arg(short = 'P', long, default_value = "")]
    pub db_password: String,

    /// Results database user.
    #[arg(short = 'u', long, default_value = "root")]
    pub db_user: String,

    /// Results database host.
    #[arg(short = 'H', long, default_value = "192.168.16.15")]
    pub db_host: String,

    /// PMU SPI device node.
    #[arg(long, default_value = "/dev/spidev1.0")]
    pub pmu_spidev: PathBuf,

    /// LED driver SPI device node.
    #[arg(long, default_value = "/dev/spidev2.0")]
    pub led_spidev: PathBuf,

    /// I2C bus device node carrying the color sensor.
    #[arg(long, default_value = "/dev/i2c-1")]
    pub i2c_dev: PathBuf,

    /// Color sensor I2C address.
    #[arg(long, default_value_t = 0x74)]
    pub lmu_addr: u16,

    /// IIO device directory of the measurement ADC.
    #[arg(long, default_value = "/sys/bus/iio/devices/iio:device0")]
    pub iio_dir: PathBuf,

    /// Supply low-rail select line.
    #[arg(long, default_value = "/sys/class/gpio/gpio98/value")]
    pub gpio_sup_lo: PathBuf,

    /// Supply mid-rail select line.
    #[arg(long, default_value = "/sys/class/gpio/gpio5/value")]
    pub gpio_sup_mid: PathBuf,

    /// Supply high-rail select line.
    #[arg(long, default_value = "/sys/class/gpio/gpio103/value")]
    pub gpio_sup_hi: PathBuf,

    /// LDO enable line.
    #[arg(long, default_value = "/sys/class/gpio/gpio63/value")]
    pub gpio_ldo_en: PathBuf,

    /// DC-DC enable line.
    #[arg(long, default_value = "/sys/class/gpio/gpio96/value")]
    pub gpio_dcdc_en: PathBuf,

    /// PMU reset line, active low.
    #[arg(long, default_value = "/sys/class/gpio/gpio88/value")]
    pub gpio_pmu_rst: PathBuf,

    /// PMU TMPALM status input.
    #[arg(long, default_value = "/sys/class/gpio/gpio127/value")]
    pub gpio_pmu_tmp: PathBuf,

    /// PMU CGALM status input.
    #[arg(long, default_value = "/sys/class/gpio/gpio108/value")]
    pub gpio_pmu_cg: PathBuf,

    /// PMU BUSY status input.
    #[arg(long, default_value = "/sys/class/gpio/gpio119/value")]
    pub gpio_pmu_busy: PathBuf,

    /// EEPROM file carrying the board identity.
    #[arg(long, default_value = "/sys/bus/i2c/devices/0-0050/eeprom")]
    pub board_id_path: PathBuf,

    /// 1-Wire bus directory carrying the box identity.
    #[arg(long, default_value = "/var/lib/w1/bus.0")]
    pub box_id_path: PathBuf,
}

impl Config {
    /// The database credentials as one immutable value.
    pub fn db(&self) -> DbConfig {
        DbConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
        }
    }
}

/// Results database coordinates, surfaced to scripts read-only.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
}
