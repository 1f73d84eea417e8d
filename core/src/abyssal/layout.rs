//! Dive record layout and a writer for it.
//!
//! ```text
//! offset  size  field
//!      0     4  timestamp, s since 2000-01-01 local (also the fingerprint)
//!      4     2  dive time, s
//!      6     2  max depth, cm
//!      8     2  avg depth, cm
//!     10     2  min temperature, 0.1 °C signed (0x7FFF: no sensor)
//!     12     2  max temperature, 0.1 °C signed (0x7FFF: no sensor)
//!     14     2  atmospheric pressure, mbar (0: not recorded)
//!     16     1  dive mode
//!     17     1  water type
//!     18     1  deco model
//!     19     1  conservatism, signed
//!     20     1  GF low, %
//!     21     1  GF high, %
//!     22     1  sample interval, s
//!     23     1  gas mix count
//!     24     1  tank count
//!     25     1  format version
//!     26  3*n   gas mixes: O2 %, He %, usage
//!      …  10*m  tanks: volume 0.1 L, work bar, begin 0.1 bar, end 0.1 bar, mix, usage
//!      …     …  samples, one variable-length entry per timestep
//!   len-2    2  CRC-16/CCITT-FALSE of everything before it
//! ```
//!
//! A sample entry is `flags u8, depth u16 cm, temperature i16 0.1 °C`
//! followed by the optional blocks selected by `flags`, in bit order. A
//! sample temperature of 0x7FFF means no reading for that timestep.

use crate::checksum;

pub const HEADER_SIZE: usize = 26;
pub const TRAILER_SIZE: usize = 2;
pub const MIN_RECORD_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;
pub const FORMAT_VERSION: u8 = 1;

pub const GASMIX_SIZE: usize = 3;
pub const TANK_SIZE: usize = 10;
pub const MAX_GASMIXES: usize = 5;
pub const MAX_TANKS: usize = 5;

pub const TEMPERATURE_ABSENT: i16 = 0x7FFF;
pub const TANK_NO_GASMIX: u8 = 0xFF;

pub const SAMPLE_BASE_SIZE: usize = 5;
pub const SAMPLE_PRESSURE: u8 = 0x01;
pub const SAMPLE_GASMIX: u8 = 0x02;
pub const SAMPLE_EVENT: u8 = 0x04;
pub const SAMPLE_DECO: u8 = 0x08;
pub const SAMPLE_PPO2: u8 = 0x10;
pub const SAMPLE_CNS: u8 = 0x20;
pub const SAMPLE_RESERVED: u8 = 0xC0;

/// Seconds between the Unix epoch and the instrument epoch (2000-01-01).
pub const EPOCH_2000: i64 = 946_684_800;
/// First second outside the plausible clock range (2100-01-01).
pub const TIMESTAMP_LIMIT: u32 = 3_155_760_000;

/// Raw sample entry, in instrument units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSample {
    pub depth_cm: u16,
    pub temperature_dc: i16,
    /// Tank index and pressure in 0.1 bar.
    pub pressure: Option<(u8, u16)>,
    pub gasmix: Option<u8>,
    /// Event type and value.
    pub event: Option<(u8, u8)>,
    /// Deco kind, stop depth in cm, stop time in s.
    pub deco: Option<(u8, u16, u16)>,
    pub ppo2_cbar: Option<u8>,
    pub cns_percent: Option<u8>,
}

impl RawSample {
    pub fn new(depth_cm: u16, temperature_dc: i16) -> Self {
        Self {
            depth_cm,
            temperature_dc,
            ..Self::default()
        }
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.pressure.is_some() {
            flags |= SAMPLE_PRESSURE;
        }
        if self.gasmix.is_some() {
            flags |= SAMPLE_GASMIX;
        }
        if self.event.is_some() {
            flags |= SAMPLE_EVENT;
        }
        if self.deco.is_some() {
            flags |= SAMPLE_DECO;
        }
        if self.ppo2_cbar.is_some() {
            flags |= SAMPLE_PPO2;
        }
        if self.cns_percent.is_some() {
            flags |= SAMPLE_CNS;
        }
        flags
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.flags());
        out.extend_from_slice(&self.depth_cm.to_le_bytes());
        out.extend_from_slice(&self.temperature_dc.to_le_bytes());
        if let Some((tank, pressure)) = self.pressure {
            out.push(tank);
            out.extend_from_slice(&pressure.to_le_bytes());
        }
        if let Some(mix) = self.gasmix {
            out.push(mix);
        }
        if let Some((kind, value)) = self.event {
            out.extend_from_slice(&[kind, value]);
        }
        if let Some((kind, depth, time)) = self.deco {
            out.push(kind);
            out.extend_from_slice(&depth.to_le_bytes());
            out.extend_from_slice(&time.to_le_bytes());
        }
        if let Some(ppo2) = self.ppo2_cbar {
            out.push(ppo2);
        }
        if let Some(cns) = self.cns_percent {
            out.push(cns);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawTank {
    pub volume_dl: u16,
    pub work_pressure_bar: u16,
    pub begin_pressure_dbar: u16,
    pub end_pressure_dbar: u16,
    pub gasmix: u8,
    pub usage: u8,
}

/// Serializes a dive record with a valid trailer.
#[derive(Clone, Debug)]
pub struct RecordBuilder {
    header: [u8; HEADER_SIZE],
    gasmixes: Vec<[u8; GASMIX_SIZE]>,
    tanks: Vec<RawTank>,
    samples: Vec<u8>,
}

impl RecordBuilder {
    /// A minimal open-circuit salt water dive with a 10 s sample interval.
    pub fn new(timestamp: u32) -> Self {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&timestamp.to_le_bytes());
        header[10..12].copy_from_slice(&TEMPERATURE_ABSENT.to_le_bytes());
        header[12..14].copy_from_slice(&TEMPERATURE_ABSENT.to_le_bytes());
        header[16] = 2;
        header[17] = 1;
        header[22] = 10;
        header[25] = FORMAT_VERSION;
        Self {
            header,
            gasmixes: Vec::new(),
            tanks: Vec::new(),
            samples: Vec::new(),
        }
    }

    fn put_u16(&mut self, offset: usize, value: u16) -> &mut Self {
        self.header[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn divetime(&mut self, seconds: u16) -> &mut Self {
        self.put_u16(4, seconds)
    }

    pub fn depths(&mut self, max_cm: u16, avg_cm: u16) -> &mut Self {
        self.put_u16(6, max_cm).put_u16(8, avg_cm)
    }

    pub fn temperatures(&mut self, min_dc: i16, max_dc: i16) -> &mut Self {
        self.put_u16(10, min_dc as u16).put_u16(12, max_dc as u16)
    }

    pub fn atmospheric(&mut self, mbar: u16) -> &mut Self {
        self.put_u16(14, mbar)
    }

    pub fn dive_mode(&mut self, mode: u8) -> &mut Self {
        self.header[16] = mode;
        self
    }

    pub fn water(&mut self, water: u8) -> &mut Self {
        self.header[17] = water;
        self
    }

    pub fn deco_model(
        &mut self,
        model: u8,
        conservatism: i8,
        gf_low: u8,
        gf_high: u8,
    ) -> &mut Self {
        self.header[18] = model;
        self.header[19] = conservatism as u8;
        self.header[20] = gf_low;
        self.header[21] = gf_high;
        self
    }

    pub fn interval(&mut self, seconds: u8) -> &mut Self {
        self.header[22] = seconds;
        self
    }

    pub fn version(&mut self, version: u8) -> &mut Self {
        self.header[25] = version;
        self
    }

    pub fn gasmix(&mut self, oxygen: u8, helium: u8, usage: u8) -> &mut Self {
        self.gasmixes.push([oxygen, helium, usage]);
        self
    }

    pub fn tank(&mut self, tank: RawTank) -> &mut Self {
        self.tanks.push(tank);
        self
    }

    pub fn sample(&mut self, sample: RawSample) -> &mut Self {
        sample.write(&mut self.samples);
        self
    }

    /// Append bytes to the sample section verbatim.
    pub fn raw_samples(&mut self, bytes: &[u8]) -> &mut Self {
        self.samples.extend_from_slice(bytes);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = self.header;
        header[23] = self.gasmixes.len() as u8;
        header[24] = self.tanks.len() as u8;

        let mut out = Vec::with_capacity(
            HEADER_SIZE
                + self.gasmixes.len() * GASMIX_SIZE
                + self.tanks.len() * TANK_SIZE
                + self.samples.len()
                + TRAILER_SIZE,
        );
        out.extend_from_slice(&header);
        for mix in &self.gasmixes {
            out.extend_from_slice(mix);
        }
        for tank in &self.tanks {
            out.extend_from_slice(&tank.volume_dl.to_le_bytes());
            out.extend_from_slice(&tank.work_pressure_bar.to_le_bytes());
            out.extend_from_slice(&tank.begin_pressure_dbar.to_le_bytes());
            out.extend_from_slice(&tank.end_pressure_dbar.to_le_bytes());
            out.push(tank.gasmix);
            out.push(tank.usage);
        }
        out.extend_from_slice(&self.samples);
        let crc = checksum::crc16_ccitt(0xFFFF, &out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}
