//! The Abyssal family: a page-oriented serial protocol and a compact
//! variable-stride dive record.
//!
//! See [`protocol`] for the wire format and [`layout`] for the record format.

use std::time::Duration;

pub mod device;
pub mod layout;
pub mod parser;
pub mod protocol;

pub use device::AbyssalDevice;
pub use parser::{AbyssalParser, SampleIter};

/// Receive timeout applied to the transport on open.
pub const TIMEOUT: Duration = Duration::from_millis(3000);

/// Bytes requested per READ command.
pub const PAGE_SIZE: usize = 256;

/// Largest dive the driver will allocate for.
pub const MAX_DIVE_SIZE: usize = 1 << 20;
