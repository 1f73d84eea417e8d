pub mod abyssal;
pub mod checksum;
pub mod error;
pub mod family;
pub mod ffi;
pub mod models;
pub mod transport;
pub mod transport_mock;

uniffi::setup_scaffolding!();

pub use error::{DiveError, ErrorKind, Result};
pub use family::{Device, Family, Parser, Samples};
pub use models::{
    DecoKind, DecoModel, DecoModelType, DeviceEvent, DiveMode, DiveRecord, EventKind, Field,
    FieldKind, GasMix, GasUsage, Location, Salinity, Sample, SampleKind, Tank, TankVolume,
    WaterType, FINGERPRINT_SIZE,
};
pub use transport::{SerialConfig, Transport, TransportError};
pub use transport_mock::MockTransport;
