//! System-wide constants for the CAC workspace.
//!
//! Single source of truth for capacities, default paths and segment names.
//! Imported by all crates; do not duplicate these values elsewhere.

/// Maximum number of sensor slots in a sensor region.
pub const MAX_SENSORS: usize = 16;

/// Maximum number of valve slots in a valve region.
pub const MAX_VALVES: usize = 16;

/// Width in bytes of the fixed name fields stored in shared memory.
pub const NAME_LEN: usize = 16;

/// Size of the text buffer used for one raw ADC read.
pub const ADC_READ_BUF_LEN: usize = 8;

/// Default IIO sysfs directory holding the `in_voltage<N>_raw` files.
pub const DEFAULT_IIO_SYSFS_PATH: &str = "/sys/bus/iio/devices/iio:device0/";

/// Default GPIO character device.
pub const DEFAULT_GPIO_CHIP_PATH: &str = "/dev/gpiochip0";

/// Consumer label attached to every requested valve line.
pub const DEFAULT_LINE_LABEL: &str = "Valve_control";

/// Default sensor region name.
pub const SEG_SENSOR: &str = "sensor_shm";

/// Default valve region name.
pub const SEG_VALVE: &str = "vanne_shm";

/// Default handshake region name.
pub const SEG_HANDSHAKE: &str = "handshake_shm";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cac/cac.toml";

/// Build the sysfs path of an ADC channel: `<base>in_voltage<channel>_raw`.
///
/// The base is used verbatim, so it is expected to end with a separator.
pub fn adc_channel_path(base: &str, channel: u16) -> String {
    format!("{base}in_voltage{channel}_raw")
}
