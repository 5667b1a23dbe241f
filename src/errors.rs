use thiserror::Error;
use crate::bus::gpio::GpioError;
use crate::bus::i2c::I2CError;
use crate::bus::spi::SpiError;

/// Error types shared by every breakout driver and the hub runtime
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("I2C communication failed: {0}")]
    I2cError(#[from] I2CError),

    #[error("SPI communication failed: {0}")]
    SpiError(#[from] SpiError),

    #[error("GPIO access failed: {0}")]
    GpioError(#[from] GpioError),

    #[error("Serial port error: {0}")]
    SerialError(#[from] std::io::Error),

    #[error("Sensor '{sensor}' initialization failed: {reason}")]
    InitError { sensor: String, reason: String },

    #[error("Sensor '{sensor}' read failed: {reason}")]
    ReadError { sensor: String, reason: String },

    #[error("Invalid sensor configuration for '{sensor}': {reason}")]
    ConfigError { sensor: String, reason: String },

    #[error("Sensor '{sensor}' returned invalid data: {reason}")]
    DataError { sensor: String, reason: String },

    #[error("Sensor '{sensor}' calibration failed: {reason}")]
    CalibrationError { sensor: String, reason: String },

    #[error("Sensor '{sensor}' rejected argument: {reason}")]
    InvalidArgument { sensor: String, reason: String },

    #[error("Sensor '{sensor}' CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch { sensor: String, expected: u8, actual: u8 },

    #[error("Sensor '{sensor}' EEPROM is busy")]
    EepromBusy { sensor: String },

    #[error("Sensor '{sensor}' used before init")]
    NotInitialized { sensor: String },

    #[error("Unsupported sensor driver: '{driver}'")]
    UnsupportedDriver { driver: String },

    #[error("Bus '{bus}' not found or unavailable")]
    BusNotFound { bus: String },

    #[error("Sensor '{sensor}' needs a {expected} bus")]
    BusMismatch { sensor: String, expected: &'static str },

    #[error("Bus '{bus}' communication timeout after {timeout_ms}ms")]
    BusTimeout { bus: String, timeout_ms: u64 },

    #[error("Sensor '{sensor}' wrong chip ID: expected {expected:#06x}, got {actual:#06x}")]
    WrongChipId { sensor: String, expected: u16, actual: u16 },
}

impl SensorError {
    pub(crate) fn invalid(sensor: &str, reason: impl Into<String>) -> Self {
        SensorError::InvalidArgument {
            sensor: sensor.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn init(sensor: &str, reason: impl Into<String>) -> Self {
        SensorError::InitError {
            sensor: sensor.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn data(sensor: &str, reason: impl Into<String>) -> Self {
        SensorError::DataError {
            sensor: sensor.to_string(),
            reason: reason.into(),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    FormatError(#[from] toml::de::Error),

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Reading hub errors
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Failed to encode reading: {0}")]
    EncodeError(#[from] serde_json::Error),

    #[error("No active subscribers for sensor data")]
    NoSubscribers,
}

/// Registry and initialization errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Sensor registration failed: {0}")]
    RegistrationError(#[source] SensorError),

    #[error("Bus initialization failed: {0}")]
    BusInitError(#[from] ConfigError),

    #[error("Bus '{bus}' could not be opened: {reason}")]
    BusOpenError { bus: String, reason: String },

    #[error("Failed to create sensor driver: {0}")]
    DriverCreationError(#[source] SensorError),
}

impl From<SensorError> for String {
    fn from(error: SensorError) -> Self {
        error.to_string()
    }
}

impl From<ConfigError> for String {
    fn from(error: ConfigError) -> Self {
        error.to_string()
    }
}

impl From<RegistryError> for String {
    fn from(error: RegistryError) -> Self {
        error.to_string()
    }
}

/// Result type aliases for convenience
pub type SensorResult<T> = Result<T, SensorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type HubResult<T> = Result<T, HubError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
