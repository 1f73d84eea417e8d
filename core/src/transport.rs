use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out waiting for data")]
    Timeout,
    #[error("setting rejected: {0}")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("transport closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportError::Timeout
            }
            _ => TransportError::Io(err.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Line settings applied by a driver when it opens a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl SerialConfig {
    pub const DEFAULT_115200_8N1: SerialConfig = SerialConfig {
        baud_rate: 115_200,
        data_bits: DataBits::Eight,
        parity: Parity::None,
        stop_bits: StopBits::One,
        flow_control: FlowControl::None,
    };
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::DEFAULT_115200_8N1
    }
}

/// A blocking, point-to-point byte stream (serial, USB-serial, BLE UART).
///
/// Drivers only ever use these four operations. Implementations own any
/// discovery or pairing that happened before the stream was handed over.
pub trait Transport {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), TransportError>;

    /// Upper bound for a single [`Transport::read`].
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Fill `buf` completely, or fail with [`TransportError::Timeout`] when
    /// the instrument stays silent for longer than the configured timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), TransportError> {
        (**self).configure(config)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).set_timeout(timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }
}

#[cfg(feature = "serial")]
pub use self::serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use std::io::{Read, Write};
    use std::time::Duration;

    use super::{DataBits, FlowControl, Parity, SerialConfig, StopBits, Transport, TransportError};

    fn rejected(err: serialport::Error) -> TransportError {
        TransportError::Rejected(err.to_string())
    }

    /// [`Transport`] over an OS serial port.
    pub struct SerialTransport {
        port: Box<dyn serialport::SerialPort>,
    }

    impl SerialTransport {
        pub fn open(path: &str) -> Result<Self, TransportError> {
            let port = serialport::new(path, SerialConfig::DEFAULT_115200_8N1.baud_rate)
                .open()
                .map_err(|e| TransportError::Io(e.to_string()))?;
            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn configure(&mut self, config: &SerialConfig) -> Result<(), TransportError> {
            self.port.set_baud_rate(config.baud_rate).map_err(rejected)?;
            self.port
                .set_data_bits(match config.data_bits {
                    DataBits::Seven => serialport::DataBits::Seven,
                    DataBits::Eight => serialport::DataBits::Eight,
                })
                .map_err(rejected)?;
            self.port
                .set_parity(match config.parity {
                    Parity::None => serialport::Parity::None,
                    Parity::Odd => serialport::Parity::Odd,
                    Parity::Even => serialport::Parity::Even,
                })
                .map_err(rejected)?;
            self.port
                .set_stop_bits(match config.stop_bits {
                    StopBits::One => serialport::StopBits::One,
                    StopBits::Two => serialport::StopBits::Two,
                })
                .map_err(rejected)?;
            self.port
                .set_flow_control(match config.flow_control {
                    FlowControl::None => serialport::FlowControl::None,
                    FlowControl::Software => serialport::FlowControl::Software,
                    FlowControl::Hardware => serialport::FlowControl::Hardware,
                })
                .map_err(rejected)
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
            self.port.set_timeout(timeout).map_err(rejected)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
            self.port.read_exact(buf)?;
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.port.write_all(data)?;
            self.port.flush()?;
            Ok(())
        }
    }
}
