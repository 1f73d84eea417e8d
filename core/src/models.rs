//! Value types shared by every family: dive records, field values, samples
//! and device events.

/// Length of the deduplication fingerprint.
pub const FINGERPRINT_SIZE: usize = 4;

/// One dive exactly as the instrument stored it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiveRecord {
    data: Vec<u8>,
}

impl DiveRecord {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Leading bytes that identify this dive in a later session, or `None`
    /// for a record too short to carry them.
    pub fn fingerprint(&self) -> Option<[u8; FINGERPRINT_SIZE]> {
        self.data
            .get(..FINGERPRINT_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for DiveRecord {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Selector for [`crate::Parser::field`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    DiveTime,
    MaxDepth,
    AvgDepth,
    TemperatureSurface,
    TemperatureMinimum,
    TemperatureMaximum,
    Atmospheric,
    Salinity,
    DiveMode,
    GasMixCount,
    /// Indexed, bounded by [`FieldKind::GasMixCount`].
    GasMix,
    TankCount,
    /// Indexed, bounded by [`FieldKind::TankCount`].
    Tank,
    DecoModel,
    Location,
}

impl FieldKind {
    pub fn is_indexed(self) -> bool {
        matches!(self, FieldKind::GasMix | FieldKind::Tank)
    }
}

/// A decoded summary value. The variant always matches the requested kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    /// Seconds.
    DiveTime(u32),
    /// Metres.
    MaxDepth(f64),
    /// Metres.
    AvgDepth(f64),
    /// Degrees Celsius.
    TemperatureSurface(f64),
    TemperatureMinimum(f64),
    TemperatureMaximum(f64),
    /// Bar.
    Atmospheric(f64),
    Salinity(Salinity),
    DiveMode(DiveMode),
    GasMixCount(u32),
    GasMix(GasMix),
    TankCount(u32),
    Tank(Tank),
    DecoModel(DecoModel),
    Location(Location),
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::DiveTime(_) => FieldKind::DiveTime,
            Field::MaxDepth(_) => FieldKind::MaxDepth,
            Field::AvgDepth(_) => FieldKind::AvgDepth,
            Field::TemperatureSurface(_) => FieldKind::TemperatureSurface,
            Field::TemperatureMinimum(_) => FieldKind::TemperatureMinimum,
            Field::TemperatureMaximum(_) => FieldKind::TemperatureMaximum,
            Field::Atmospheric(_) => FieldKind::Atmospheric,
            Field::Salinity(_) => FieldKind::Salinity,
            Field::DiveMode(_) => FieldKind::DiveMode,
            Field::GasMixCount(_) => FieldKind::GasMixCount,
            Field::GasMix(_) => FieldKind::GasMix,
            Field::TankCount(_) => FieldKind::TankCount,
            Field::Tank(_) => FieldKind::Tank,
            Field::DecoModel(_) => FieldKind::DecoModel,
            Field::Location(_) => FieldKind::Location,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasUsage {
    None,
    Oxygen,
    Diluent,
    Sidemount,
}

/// Breathing gas as fractions; `helium + oxygen + nitrogen == 1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GasMix {
    pub helium: f64,
    pub oxygen: f64,
    pub nitrogen: f64,
    pub usage: GasUsage,
}

impl GasMix {
    /// Build a mix from whole percentages, deriving nitrogen as the balance.
    pub fn from_percent(oxygen: u8, helium: u8, usage: GasUsage) -> Self {
        let oxygen = f64::from(oxygen) / 100.0;
        let helium = f64::from(helium) / 100.0;
        Self {
            helium,
            oxygen,
            nitrogen: 1.0 - oxygen - helium,
            usage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaterType {
    Fresh,
    Salt,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Salinity {
    pub water: WaterType,
    /// kg/m³
    pub density: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiveMode {
    Freedive,
    Gauge,
    OpenCircuit,
    ClosedCircuit,
    SemiClosedCircuit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TankVolume {
    /// Volume unknown; `volume` is zero.
    None,
    Metric,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tank {
    pub volume_type: TankVolume,
    /// Litres.
    pub volume: f64,
    /// Bar; zero when the instrument does not record it.
    pub work_pressure: f64,
    pub begin_pressure: f64,
    pub end_pressure: f64,
    /// Index into the gas mix table.
    pub gasmix: Option<u32>,
    pub usage: GasUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoModelType {
    None,
    Buhlmann { gf_low: u32, gf_high: u32 },
    Vpm,
    Rgbm,
    Dciem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoModel {
    pub model: DecoModelType,
    /// Zero is the neutral setting, positive is more conservative.
    pub conservatism: i32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Bookmark,
    AscentRate,
    DecoViolation,
    Ppo2High,
    Ppo2Low,
    LowBattery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoKind {
    NoDecoLimit,
    SafetyStop,
    DecoStop,
    DeepStop,
}

/// Channel selector for [`Sample`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Time,
    Depth,
    Temperature,
    Pressure,
    GasMix,
    Event,
    Deco,
    Ppo2,
    Cns,
}

/// One channel value. A timestep starts with [`Sample::Time`]; every value
/// up to the next `Time` belongs to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    /// Seconds since the start of the dive.
    Time(u32),
    /// Metres.
    Depth(f64),
    /// Degrees Celsius.
    Temperature(f64),
    /// Tank pressure in bar.
    Pressure { tank: u32, bar: f64 },
    /// Switch to the gas mix with this index.
    GasMix(u32),
    Event { kind: EventKind, value: u32 },
    /// `depth` in metres, `time` in seconds.
    Deco { kind: DecoKind, depth: f64, time: u32 },
    /// Bar.
    Ppo2(f64),
    /// Fraction, 1.0 = 100 %.
    Cns(f64),
}

impl Sample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Time(_) => SampleKind::Time,
            Sample::Depth(_) => SampleKind::Depth,
            Sample::Temperature(_) => SampleKind::Temperature,
            Sample::Pressure { .. } => SampleKind::Pressure,
            Sample::GasMix(_) => SampleKind::GasMix,
            Sample::Event { .. } => SampleKind::Event,
            Sample::Deco { .. } => SampleKind::Deco,
            Sample::Ppo2(_) => SampleKind::Ppo2,
            Sample::Cns(_) => SampleKind::Cns,
        }
    }
}

/// Notifications emitted by a device while it downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    DevInfo {
        model: u32,
        firmware: u32,
        serial: u32,
    },
    /// Instrument clock and host clock captured at the same moment.
    Clock { devtime: u32, systime: i64 },
    /// Bytes downloaded so far out of the expected total.
    Progress { current: u32, maximum: u32 },
}
