//! Dive record decoder.
//!
//! Every query validates the record trailer before trusting a single byte.
//! The decoded header is memoized after the first successful validation; a
//! failed validation is not cached and is reported again on the next query.

use std::cell::OnceCell;
use std::collections::VecDeque;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use nom::combinator::cond;
use nom::multi::count;
use nom::number::complete::{le_i16, le_i8, le_u16, le_u32, le_u8};
use nom::{IResult, Parser as _};

use crate::abyssal::layout::{
    RawSample, RawTank, EPOCH_2000, FORMAT_VERSION, MAX_GASMIXES, MAX_TANKS, MIN_RECORD_SIZE,
    SAMPLE_CNS, SAMPLE_DECO, SAMPLE_EVENT, SAMPLE_GASMIX, SAMPLE_PPO2, SAMPLE_PRESSURE,
    SAMPLE_RESERVED, TANK_NO_GASMIX, TEMPERATURE_ABSENT, TIMESTAMP_LIMIT,
};
use crate::checksum;
use crate::error::{DiveError, Result};
use crate::models::{
    DecoKind, DecoModel, DecoModelType, DiveMode, EventKind, Field, FieldKind, GasMix, GasUsage,
    Salinity, Sample, Tank, TankVolume, WaterType,
};

type PResult<'a, T> = IResult<&'a [u8], T>;

fn byte(input: &[u8]) -> PResult<'_, u8> {
    le_u8(input)
}

fn word(input: &[u8]) -> PResult<'_, u16> {
    le_u16(input)
}

fn sword(input: &[u8]) -> PResult<'_, i16> {
    le_i16(input)
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone)]
struct Header {
    timestamp: u32,
    divetime: u16,
    max_depth: u16,
    avg_depth: u16,
    temperature_min: i16,
    temperature_max: i16,
    atmospheric: u16,
    dive_mode: u8,
    water: u8,
    deco_model: u8,
    conservatism: i8,
    gf_low: u8,
    gf_high: u8,
    interval: u8,
    gasmix_count: u8,
    tank_count: u8,
    version: u8,
}

/// Header plus the raw gas and tank tables. Table entries are decoded per
/// query so a bad entry only fails the field that asks for it.
#[derive(Debug, Clone)]
struct Summary {
    header: Header,
    gasmixes: Vec<(u8, u8, u8)>,
    tanks: Vec<RawTank>,
    /// Start of the sample section, from the record start.
    samples_start: usize,
    /// End of the sample section (start of the trailer).
    samples_end: usize,
}

fn header(input: &[u8]) -> PResult<'_, Header> {
    let (input, timestamp) = le_u32(input)?;
    let (input, divetime) = word(input)?;
    let (input, max_depth) = word(input)?;
    let (input, avg_depth) = word(input)?;
    let (input, temperature_min) = sword(input)?;
    let (input, temperature_max) = sword(input)?;
    let (input, atmospheric) = word(input)?;
    let (input, dive_mode) = byte(input)?;
    let (input, water) = byte(input)?;
    let (input, deco_model) = byte(input)?;
    let (input, conservatism) = le_i8(input)?;
    let (input, gf_low) = byte(input)?;
    let (input, gf_high) = byte(input)?;
    let (input, interval) = byte(input)?;
    let (input, gasmix_count) = byte(input)?;
    let (input, tank_count) = byte(input)?;
    let (input, version) = byte(input)?;
    Ok((
        input,
        Header {
            timestamp,
            divetime,
            max_depth,
            avg_depth,
            temperature_min,
            temperature_max,
            atmospheric,
            dive_mode,
            water,
            deco_model,
            conservatism,
            gf_low,
            gf_high,
            interval,
            gasmix_count,
            tank_count,
            version,
        },
    ))
}

fn gasmix_entry(input: &[u8]) -> PResult<'_, (u8, u8, u8)> {
    let (input, oxygen) = byte(input)?;
    let (input, helium) = byte(input)?;
    let (input, usage) = byte(input)?;
    Ok((input, (oxygen, helium, usage)))
}

fn tank_entry(input: &[u8]) -> PResult<'_, RawTank> {
    let (input, volume_dl) = word(input)?;
    let (input, work_pressure_bar) = word(input)?;
    let (input, begin_pressure_dbar) = word(input)?;
    let (input, end_pressure_dbar) = word(input)?;
    let (input, gasmix) = byte(input)?;
    let (input, usage) = byte(input)?;
    Ok((
        input,
        RawTank {
            volume_dl,
            work_pressure_bar,
            begin_pressure_dbar,
            end_pressure_dbar,
            gasmix,
            usage,
        },
    ))
}

fn gas_usage(raw: u8) -> Result<GasUsage> {
    match raw {
        0 => Ok(GasUsage::None),
        1 => Ok(GasUsage::Oxygen),
        2 => Ok(GasUsage::Diluent),
        3 => Ok(GasUsage::Sidemount),
        other => Err(DiveError::data_format(format!("unknown gas usage {other}"))),
    }
}

fn decode_gasmix(index: u32, (oxygen, helium, usage): (u8, u8, u8)) -> Result<GasMix> {
    if u16::from(oxygen) + u16::from(helium) > 100 {
        return Err(DiveError::data_format(format!(
            "gas mix {index} has {oxygen}% O2 and {helium}% He"
        )));
    }
    Ok(GasMix::from_percent(oxygen, helium, gas_usage(usage)?))
}

fn decode_tank(index: u32, raw: RawTank, gasmix_count: usize) -> Result<Tank> {
    let gasmix = match raw.gasmix {
        TANK_NO_GASMIX => None,
        mix if usize::from(mix) < gasmix_count => Some(u32::from(mix)),
        mix => {
            return Err(DiveError::data_format(format!(
                "tank {index} refers to gas mix {mix} of {gasmix_count}"
            )))
        }
    };
    let volume_type = if raw.volume_dl == 0 {
        TankVolume::None
    } else {
        TankVolume::Metric
    };
    Ok(Tank {
        volume_type,
        volume: f64::from(raw.volume_dl) / 10.0,
        work_pressure: f64::from(raw.work_pressure_bar),
        begin_pressure: f64::from(raw.begin_pressure_dbar) / 10.0,
        end_pressure: f64::from(raw.end_pressure_dbar) / 10.0,
        gasmix,
        usage: gas_usage(raw.usage)?,
    })
}

fn parse_summary(data: &[u8]) -> Result<Summary> {
    if data.len() < MIN_RECORD_SIZE {
        return Err(DiveError::data_format(format!(
            "record of {} bytes is shorter than the {MIN_RECORD_SIZE} byte minimum",
            data.len()
        )));
    }
    let body = checksum::verify_crc16_trailer(data)?;

    let (rest, header) =
        header(body).map_err(|_| DiveError::data_format("truncated record header"))?;
    if header.version != FORMAT_VERSION {
        return Err(DiveError::data_format(format!(
            "unknown record format version {}",
            header.version
        )));
    }
    if header.interval == 0 {
        return Err(DiveError::data_format("sample interval is zero"));
    }
    let gasmix_count = usize::from(header.gasmix_count);
    let tank_count = usize::from(header.tank_count);
    if gasmix_count > MAX_GASMIXES || tank_count > MAX_TANKS {
        return Err(DiveError::data_format(format!(
            "record announces {gasmix_count} gas mixes and {tank_count} tanks"
        )));
    }

    let (rest, gasmixes) = count(gasmix_entry, gasmix_count)
        .parse(rest)
        .map_err(|_| DiveError::data_format("truncated gas mix table"))?;
    let (rest, tanks) = count(tank_entry, tank_count)
        .parse(rest)
        .map_err(|_| DiveError::data_format("truncated tank table"))?;

    Ok(Summary {
        header,
        gasmixes,
        tanks,
        samples_start: body.len() - rest.len(),
        samples_end: body.len(),
    })
}

fn temperature(raw: i16, kind: FieldKind) -> Result<f64> {
    if raw == TEMPERATURE_ABSENT {
        Err(DiveError::Unsupported(format!(
            "{kind:?}: no temperature sensor data"
        )))
    } else {
        Ok(f64::from(raw) / 10.0)
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parser bound to one dive record for its whole lifetime.
#[derive(Debug)]
pub struct AbyssalParser<'a> {
    data: &'a [u8],
    summary: OnceCell<Summary>,
}

impl<'a> AbyssalParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            summary: OnceCell::new(),
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn summary(&self) -> Result<&Summary> {
        if let Some(summary) = self.summary.get() {
            return Ok(summary);
        }
        let summary = parse_summary(self.data).inspect_err(|err| {
            warn!("rejecting dive record of {} bytes: {err}", self.data.len());
        })?;
        Ok(self.summary.get_or_init(|| summary))
    }

    /// Start of the dive on the instrument's local clock.
    pub fn datetime(&self) -> Result<NaiveDateTime> {
        let timestamp = self.summary()?.header.timestamp;
        if timestamp >= TIMESTAMP_LIMIT {
            return Err(DiveError::data_format(format!(
                "timestamp {timestamp} is past the instrument epoch"
            )));
        }
        DateTime::<Utc>::from_timestamp(EPOCH_2000 + i64::from(timestamp), 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| DiveError::data_format(format!("timestamp {timestamp} out of range")))
    }

    /// Decode one summary field. `index` selects the element for
    /// [`FieldKind::GasMix`] and [`FieldKind::Tank`] and is ignored otherwise.
    pub fn field(&self, kind: FieldKind, index: u32) -> Result<Field> {
        let summary = self.summary()?;
        let header = &summary.header;
        match kind {
            FieldKind::DiveTime => Ok(Field::DiveTime(u32::from(header.divetime))),
            FieldKind::MaxDepth => Ok(Field::MaxDepth(f64::from(header.max_depth) / 100.0)),
            FieldKind::AvgDepth => Ok(Field::AvgDepth(f64::from(header.avg_depth) / 100.0)),
            FieldKind::TemperatureMinimum => {
                temperature(header.temperature_min, kind).map(Field::TemperatureMinimum)
            }
            FieldKind::TemperatureMaximum => {
                temperature(header.temperature_max, kind).map(Field::TemperatureMaximum)
            }
            FieldKind::Atmospheric => match header.atmospheric {
                0 => Err(DiveError::Unsupported(
                    "atmospheric pressure not recorded".to_string(),
                )),
                mbar => Ok(Field::Atmospheric(f64::from(mbar) / 1000.0)),
            },
            FieldKind::Salinity => {
                let salinity = match header.water {
                    0 => Salinity {
                        water: WaterType::Fresh,
                        density: 1000.0,
                    },
                    1 => Salinity {
                        water: WaterType::Salt,
                        density: 1025.0,
                    },
                    2 => Salinity {
                        water: WaterType::Salt,
                        density: 1020.0,
                    },
                    other => {
                        return Err(DiveError::data_format(format!("unknown water type {other}")))
                    }
                };
                Ok(Field::Salinity(salinity))
            }
            FieldKind::DiveMode => {
                let mode = match header.dive_mode {
                    0 => DiveMode::Freedive,
                    1 => DiveMode::Gauge,
                    2 => DiveMode::OpenCircuit,
                    3 => DiveMode::ClosedCircuit,
                    4 => DiveMode::SemiClosedCircuit,
                    other => {
                        return Err(DiveError::data_format(format!("unknown dive mode {other}")))
                    }
                };
                Ok(Field::DiveMode(mode))
            }
            FieldKind::GasMixCount => Ok(Field::GasMixCount(summary.gasmixes.len() as u32)),
            FieldKind::GasMix => {
                let raw = summary.gasmixes.get(index as usize).copied().ok_or_else(|| {
                    DiveError::InvalidArgs(format!(
                        "gas mix {index} requested, record has {}",
                        summary.gasmixes.len()
                    ))
                })?;
                decode_gasmix(index, raw).map(Field::GasMix)
            }
            FieldKind::TankCount => Ok(Field::TankCount(summary.tanks.len() as u32)),
            FieldKind::Tank => {
                let raw = summary.tanks.get(index as usize).copied().ok_or_else(|| {
                    DiveError::InvalidArgs(format!(
                        "tank {index} requested, record has {}",
                        summary.tanks.len()
                    ))
                })?;
                decode_tank(index, raw, summary.gasmixes.len()).map(Field::Tank)
            }
            FieldKind::DecoModel => {
                let model = match header.deco_model {
                    0 => DecoModelType::None,
                    1 => DecoModelType::Buhlmann {
                        gf_low: u32::from(header.gf_low),
                        gf_high: u32::from(header.gf_high),
                    },
                    2 => DecoModelType::Vpm,
                    3 => DecoModelType::Rgbm,
                    4 => DecoModelType::Dciem,
                    other => {
                        return Err(DiveError::data_format(format!("unknown deco model {other}")))
                    }
                };
                Ok(Field::DecoModel(DecoModel {
                    model,
                    conservatism: i32::from(header.conservatism),
                }))
            }
            FieldKind::TemperatureSurface | FieldKind::Location => Err(DiveError::Unsupported(
                format!("{kind:?} is not recorded by this family"),
            )),
        }
    }

    /// Lazy walk over the sample section. An empty record yields nothing.
    pub fn samples(&self) -> SampleIter<'a> {
        if self.data.is_empty() {
            return SampleIter::empty();
        }
        let data = self.data;
        match self.summary() {
            Ok(summary) => SampleIter {
                input: &data[summary.samples_start..summary.samples_end],
                offset: summary.samples_start,
                interval: u32::from(summary.header.interval),
                time: 0,
                gasmix_count: summary.gasmixes.len(),
                tank_count: summary.tanks.len(),
                queue: VecDeque::new(),
                error: None,
                done: false,
            },
            Err(err) => SampleIter {
                error: Some(err),
                ..SampleIter::empty()
            },
        }
    }

    /// Deliver every channel value in order. Stops at the first malformed
    /// entry; values of earlier timesteps have already been delivered then.
    pub fn samples_foreach<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&Sample),
    {
        for sample in self.samples() {
            callback(&sample?);
        }
        Ok(())
    }
}

// ============================================================================
// Samples
// ============================================================================

fn pressure_block(input: &[u8]) -> PResult<'_, (u8, u16)> {
    let (input, tank) = byte(input)?;
    let (input, pressure) = word(input)?;
    Ok((input, (tank, pressure)))
}

fn event_block(input: &[u8]) -> PResult<'_, (u8, u8)> {
    let (input, kind) = byte(input)?;
    let (input, value) = byte(input)?;
    Ok((input, (kind, value)))
}

fn deco_block(input: &[u8]) -> PResult<'_, (u8, u16, u16)> {
    let (input, kind) = byte(input)?;
    let (input, depth) = word(input)?;
    let (input, time) = word(input)?;
    Ok((input, (kind, depth, time)))
}

fn sample_entry(input: &[u8]) -> PResult<'_, RawSample> {
    let (input, flags) = byte(input)?;
    let (input, depth_cm) = word(input)?;
    let (input, temperature_dc) = sword(input)?;
    let (input, pressure) = cond(flags & SAMPLE_PRESSURE != 0, pressure_block).parse(input)?;
    let (input, gasmix) = cond(flags & SAMPLE_GASMIX != 0, byte).parse(input)?;
    let (input, event) = cond(flags & SAMPLE_EVENT != 0, event_block).parse(input)?;
    let (input, deco) = cond(flags & SAMPLE_DECO != 0, deco_block).parse(input)?;
    let (input, ppo2_cbar) = cond(flags & SAMPLE_PPO2 != 0, byte).parse(input)?;
    let (input, cns_percent) = cond(flags & SAMPLE_CNS != 0, byte).parse(input)?;
    Ok((
        input,
        RawSample {
            depth_cm,
            temperature_dc,
            pressure,
            gasmix,
            event,
            deco,
            ppo2_cbar,
            cns_percent,
        },
    ))
}

fn event_kind(raw: u8) -> Option<EventKind> {
    match raw {
        1 => Some(EventKind::Bookmark),
        2 => Some(EventKind::AscentRate),
        3 => Some(EventKind::DecoViolation),
        4 => Some(EventKind::Ppo2High),
        5 => Some(EventKind::Ppo2Low),
        6 => Some(EventKind::LowBattery),
        _ => None,
    }
}

fn deco_kind(raw: u8) -> Option<DecoKind> {
    match raw {
        0 => Some(DecoKind::NoDecoLimit),
        1 => Some(DecoKind::SafetyStop),
        2 => Some(DecoKind::DecoStop),
        3 => Some(DecoKind::DeepStop),
        _ => None,
    }
}

/// Single-pass iterator over the channel values of a record.
///
/// Yields at most one error, after which it is exhausted.
#[derive(Debug)]
pub struct SampleIter<'a> {
    input: &'a [u8],
    /// Record offset of `input`, for error messages.
    offset: usize,
    interval: u32,
    time: u32,
    gasmix_count: usize,
    tank_count: usize,
    queue: VecDeque<Sample>,
    error: Option<DiveError>,
    done: bool,
}

impl<'a> SampleIter<'a> {
    fn empty() -> Self {
        Self {
            input: &[],
            offset: 0,
            interval: 0,
            time: 0,
            gasmix_count: 0,
            tank_count: 0,
            queue: VecDeque::new(),
            error: None,
            done: false,
        }
    }

    fn malformed(&self, message: String) -> DiveError {
        DiveError::data_format(format!("sample at offset {}: {message}", self.offset))
    }

    /// Decode the next entry into `queue`.
    fn decode_entry(&mut self) -> Result<()> {
        let flags = self.input[0];
        if flags & SAMPLE_RESERVED != 0 {
            return Err(self.malformed(format!("reserved flag bits set in 0x{flags:02x}")));
        }
        let (rest, raw) = sample_entry(self.input).map_err(|_| {
            self.malformed(format!("{} bytes left, entry is incomplete", self.input.len()))
        })?;

        self.time = self
            .time
            .checked_add(self.interval)
            .ok_or_else(|| self.malformed("sample time overflow".to_string()))?;

        let mut channels = Vec::with_capacity(9);
        channels.push(Sample::Time(self.time));
        channels.push(Sample::Depth(f64::from(raw.depth_cm) / 100.0));
        if raw.temperature_dc != TEMPERATURE_ABSENT {
            channels.push(Sample::Temperature(f64::from(raw.temperature_dc) / 10.0));
        }
        if let Some((tank, pressure)) = raw.pressure {
            if usize::from(tank) >= self.tank_count {
                return Err(self.malformed(format!(
                    "pressure for tank {tank} of {}",
                    self.tank_count
                )));
            }
            channels.push(Sample::Pressure {
                tank: u32::from(tank),
                bar: f64::from(pressure) / 10.0,
            });
        }
        if let Some(mix) = raw.gasmix {
            if usize::from(mix) >= self.gasmix_count {
                return Err(self.malformed(format!(
                    "switch to gas mix {mix} of {}",
                    self.gasmix_count
                )));
            }
            channels.push(Sample::GasMix(u32::from(mix)));
        }
        if let Some((kind, value)) = raw.event {
            let kind = event_kind(kind)
                .ok_or_else(|| self.malformed(format!("unknown event type {kind}")))?;
            channels.push(Sample::Event {
                kind,
                value: u32::from(value),
            });
        }
        if let Some((kind, depth, time)) = raw.deco {
            let kind =
                deco_kind(kind).ok_or_else(|| self.malformed(format!("unknown deco kind {kind}")))?;
            channels.push(Sample::Deco {
                kind,
                depth: f64::from(depth) / 100.0,
                time: u32::from(time),
            });
        }
        if let Some(ppo2) = raw.ppo2_cbar {
            channels.push(Sample::Ppo2(f64::from(ppo2) / 100.0));
        }
        if let Some(cns) = raw.cns_percent {
            channels.push(Sample::Cns(f64::from(cns) / 100.0));
        }

        self.offset += self.input.len() - rest.len();
        self.input = rest;
        self.queue.extend(channels);
        Ok(())
    }
}

impl Iterator for SampleIter<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(sample) = self.queue.pop_front() {
            return Some(Ok(sample));
        }
        if self.done {
            return None;
        }
        if let Some(err) = self.error.take() {
            self.done = true;
            return Some(Err(err));
        }
        if self.input.is_empty() {
            debug!("sample walk finished at {} s", self.time);
            self.done = true;
            return None;
        }
        match self.decode_entry() {
            Ok(()) => self.queue.pop_front().map(Ok),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for SampleIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abyssal::layout::{RecordBuilder, TANK_SIZE};
    use crate::error::ErrorKind;
    use crate::models::SampleKind;
    use proptest::prelude::*;

    fn nitrox_dive() -> Vec<u8> {
        let mut deco = RawSample::new(600, 195);
        deco.deco = Some((1, 500, 180));
        deco.ppo2_cbar = Some(64);

        let mut switch = RawSample::new(2100, 190);
        switch.gasmix = Some(1);
        switch.pressure = Some((0, 1500));
        switch.event = Some((1, 0));

        RecordBuilder::new(800_000_000)
            .divetime(2400)
            .depths(3012, 1850)
            .temperatures(182, 241)
            .atmospheric(1013)
            .deco_model(1, 0, 30, 85)
            .interval(20)
            .gasmix(32, 0, 0)
            .gasmix(50, 0, 1)
            .tank(RawTank {
                volume_dl: 120,
                work_pressure_bar: 232,
                begin_pressure_dbar: 2100,
                end_pressure_dbar: 600,
                gasmix: 0,
                usage: 0,
            })
            .sample(RawSample::new(0, 241))
            .sample(RawSample::new(3012, 182))
            .sample(switch)
            .sample(deco)
            .build()
    }

    #[test]
    fn test_datetime() {
        let data = nitrox_dive();
        let parser = AbyssalParser::new(&data);
        let dt = parser.datetime().unwrap();
        // 2000-01-01 + 800_000_000 s
        assert_eq!(dt.to_string(), "2025-05-08 06:13:20");
    }

    #[test]
    fn test_datetime_empty_record() {
        let parser = AbyssalParser::new(&[]);
        let err = parser.datetime().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn test_datetime_implausible() {
        let data = RecordBuilder::new(u32::MAX).build();
        let parser = AbyssalParser::new(&data);
        assert_eq!(parser.datetime().unwrap_err().kind(), ErrorKind::DataFormat);
        // The rest of the record is still readable.
        assert!(parser.field(FieldKind::DiveTime, 0).is_ok());
    }

    #[test]
    fn test_datetime_epoch_boundary() {
        let data = RecordBuilder::new(TIMESTAMP_LIMIT - 1).build();
        let dt = AbyssalParser::new(&data).datetime().unwrap();
        assert_eq!(dt.to_string(), "2099-12-31 23:59:59");

        let data = RecordBuilder::new(TIMESTAMP_LIMIT).build();
        let err = AbyssalParser::new(&data).datetime().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn test_scalar_fields() {
        let data = nitrox_dive();
        let parser = AbyssalParser::new(&data);
        assert_eq!(
            parser.field(FieldKind::DiveTime, 0).unwrap(),
            Field::DiveTime(2400)
        );
        assert_eq!(
            parser.field(FieldKind::MaxDepth, 0).unwrap(),
            Field::MaxDepth(30.12)
        );
        assert_eq!(
            parser.field(FieldKind::AvgDepth, 0).unwrap(),
            Field::AvgDepth(18.5)
        );
        assert_eq!(
            parser.field(FieldKind::TemperatureMinimum, 0).unwrap(),
            Field::TemperatureMinimum(18.2)
        );
        assert_eq!(
            parser.field(FieldKind::TemperatureMaximum, 0).unwrap(),
            Field::TemperatureMaximum(24.1)
        );
        assert_eq!(
            parser.field(FieldKind::Atmospheric, 0).unwrap(),
            Field::Atmospheric(1.013)
        );
        assert_eq!(
            parser.field(FieldKind::Salinity, 0).unwrap(),
            Field::Salinity(Salinity {
                water: WaterType::Salt,
                density: 1025.0
            })
        );
        assert_eq!(
            parser.field(FieldKind::DiveMode, 0).unwrap(),
            Field::DiveMode(DiveMode::OpenCircuit)
        );
        assert_eq!(
            parser.field(FieldKind::DecoModel, 0).unwrap(),
            Field::DecoModel(DecoModel {
                model: DecoModelType::Buhlmann {
                    gf_low: 30,
                    gf_high: 85
                },
                conservatism: 0
            })
        );
    }

    #[test]
    fn test_gasmix_fields() {
        let data = nitrox_dive();
        let parser = AbyssalParser::new(&data);
        assert_eq!(
            parser.field(FieldKind::GasMixCount, 0).unwrap(),
            Field::GasMixCount(2)
        );
        let Field::GasMix(mix) = parser.field(FieldKind::GasMix, 1).unwrap() else {
            panic!("expected a gas mix");
        };
        assert!((mix.oxygen - 0.50).abs() < 1e-9);
        assert_eq!(mix.helium, 0.0);
        assert_eq!(mix.usage, GasUsage::Oxygen);
        let err = parser.field(FieldKind::GasMix, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgs);
    }

    #[test]
    fn test_tank_fields() {
        let data = nitrox_dive();
        let parser = AbyssalParser::new(&data);
        let Field::TankCount(n) = parser.field(FieldKind::TankCount, 0).unwrap() else {
            panic!("expected a tank count");
        };
        assert_eq!(n, 1);
        for i in 0..n {
            let Field::Tank(tank) = parser.field(FieldKind::Tank, i).unwrap() else {
                panic!("expected a tank");
            };
            assert_eq!(tank.volume_type, TankVolume::Metric);
            assert_eq!(tank.volume, 12.0);
            assert_eq!(tank.work_pressure, 232.0);
            assert_eq!(tank.begin_pressure, 210.0);
            assert_eq!(tank.end_pressure, 60.0);
            assert_eq!(tank.gasmix, Some(0));
        }
        let err = parser.field(FieldKind::Tank, n).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgs);
    }

    #[test]
    fn test_unsupported_fields() {
        let data = RecordBuilder::new(0).build();
        let parser = AbyssalParser::new(&data);
        for kind in [
            FieldKind::TemperatureSurface,
            FieldKind::Location,
            FieldKind::TemperatureMinimum,
            FieldKind::Atmospheric,
        ] {
            let err = parser.field(kind, 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unsupported, "{kind:?}");
        }
    }

    #[test]
    fn test_bad_enum_only_fails_that_field() {
        let data = RecordBuilder::new(0).dive_mode(9).water(7).build();
        let parser = AbyssalParser::new(&data);
        assert_eq!(
            parser.field(FieldKind::DiveMode, 0).unwrap_err().kind(),
            ErrorKind::DataFormat
        );
        assert_eq!(
            parser.field(FieldKind::Salinity, 0).unwrap_err().kind(),
            ErrorKind::DataFormat
        );
        assert!(parser.datetime().is_ok());
    }

    #[test]
    fn test_sample_stream() {
        let data = nitrox_dive();
        let parser = AbyssalParser::new(&data);
        let mut samples = Vec::new();
        parser.samples_foreach(|s| samples.push(*s)).unwrap();

        let times: Vec<u32> = samples
            .iter()
            .filter_map(|s| match s {
                Sample::Time(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(times, vec![20, 40, 60, 80]);

        assert!(samples.contains(&Sample::GasMix(1)));
        assert!(samples.contains(&Sample::Pressure {
            tank: 0,
            bar: 150.0
        }));
        assert!(samples.contains(&Sample::Event {
            kind: EventKind::Bookmark,
            value: 0
        }));
        assert!(samples.contains(&Sample::Deco {
            kind: DecoKind::SafetyStop,
            depth: 5.0,
            time: 180
        }));
        assert!(samples.contains(&Sample::Ppo2(0.64)));
    }

    #[test]
    fn test_channel_order_within_timestep() {
        let mut sample = RawSample::new(1000, 200);
        sample.gasmix = Some(0);
        sample.cns_percent = Some(5);
        let data = RecordBuilder::new(0).gasmix(21, 0, 0).sample(sample).build();
        let parser = AbyssalParser::new(&data);
        let kinds: Vec<_> = parser.samples().map(|s| s.unwrap().kind()).collect();
        assert_eq!(
            kinds,
            vec![
                SampleKind::Time,
                SampleKind::Depth,
                SampleKind::Temperature,
                SampleKind::GasMix,
                SampleKind::Cns
            ]
        );
    }

    #[test]
    fn test_missing_sample_temperature_skips_channel() {
        let data = RecordBuilder::new(0)
            .sample(RawSample::new(400, TEMPERATURE_ABSENT))
            .sample(RawSample::new(800, 215))
            .build();
        let parser = AbyssalParser::new(&data);
        let samples: Vec<Sample> = parser.samples().collect::<Result<_>>().unwrap();
        assert_eq!(
            samples,
            vec![
                Sample::Time(10),
                Sample::Depth(4.0),
                Sample::Time(20),
                Sample::Depth(8.0),
                Sample::Temperature(21.5),
            ]
        );
    }

    #[test]
    fn test_empty_record_has_no_samples() {
        let parser = AbyssalParser::new(&[]);
        let mut calls = 0;
        parser.samples_foreach(|_| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_truncated_sample_stops_walk() {
        let data = RecordBuilder::new(0)
            .sample(RawSample::new(100, 200))
            .raw_samples(&[0x00, 0x10])
            .build();
        let parser = AbyssalParser::new(&data);
        let mut depths = Vec::new();
        let err = parser
            .samples_foreach(|s| {
                if let Sample::Depth(d) = s {
                    depths.push(*d)
                }
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert_eq!(depths, vec![1.0]);
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let data = RecordBuilder::new(0)
            .raw_samples(&[0x80, 0, 0, 0, 0])
            .build();
        let parser = AbyssalParser::new(&data);
        let results: Vec<_> = parser.samples().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_gasmix_switch_out_of_range() {
        let mut sample = RawSample::new(100, 200);
        sample.gasmix = Some(3);
        let data = RecordBuilder::new(0).gasmix(21, 0, 0).sample(sample).build();
        let parser = AbyssalParser::new(&data);
        assert_eq!(
            parser.samples_foreach(|_| {}).unwrap_err().kind(),
            ErrorKind::DataFormat
        );
    }

    #[test]
    fn test_checksum_flip_fails_every_query() {
        let mut data = nitrox_dive();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let parser = AbyssalParser::new(&data);
        assert_eq!(parser.datetime().unwrap_err().kind(), ErrorKind::DataFormat);
        for kind in [FieldKind::DiveTime, FieldKind::GasMixCount, FieldKind::Tank] {
            assert_eq!(
                parser.field(kind, 0).unwrap_err().kind(),
                ErrorKind::DataFormat
            );
        }
        assert_eq!(
            parser.samples_foreach(|_| {}).unwrap_err().kind(),
            ErrorKind::DataFormat
        );
    }

    #[test]
    fn test_header_validation() {
        let bad_version = RecordBuilder::new(0).version(2).build();
        assert!(AbyssalParser::new(&bad_version).datetime().is_err());

        let zero_interval = RecordBuilder::new(0).interval(0).build();
        assert!(AbyssalParser::new(&zero_interval).datetime().is_err());
    }

    #[test]
    fn test_bad_gas_usage_only_fails_that_mix() {
        let mut sample = RawSample::new(900, 200);
        sample.gasmix = Some(1);
        let data = RecordBuilder::new(0)
            .divetime(600)
            .gasmix(21, 0, 0)
            .gasmix(32, 0, 9)
            .sample(sample)
            .build();
        let parser = AbyssalParser::new(&data);

        let err = parser.field(FieldKind::GasMix, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert!(err.to_string().contains("gas usage 9"), "got: {err}");

        assert!(parser.field(FieldKind::GasMix, 0).is_ok());
        assert_eq!(
            parser.field(FieldKind::DiveTime, 0).unwrap(),
            Field::DiveTime(600)
        );
        assert!(parser.datetime().is_ok());
        assert!(parser.samples_foreach(|_| {}).is_ok());
    }

    #[test]
    fn test_bad_tank_entries_only_fail_that_tank() {
        let data = RecordBuilder::new(0)
            .gasmix(80, 30, 0)
            .tank(RawTank {
                gasmix: 0,
                ..RawTank::default()
            })
            .tank(RawTank {
                gasmix: 4,
                ..RawTank::default()
            })
            .tank(RawTank {
                gasmix: TANK_NO_GASMIX,
                usage: 7,
                ..RawTank::default()
            })
            .tank(RawTank {
                gasmix: TANK_NO_GASMIX,
                ..RawTank::default()
            })
            .build();
        let parser = AbyssalParser::new(&data);

        let err = parser.field(FieldKind::GasMix, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        // The tank's mix reference is in range even if the mix is bad.
        assert!(parser.field(FieldKind::Tank, 0).is_ok());
        let err = parser.field(FieldKind::Tank, 1).unwrap_err();
        assert!(err.to_string().contains("tank 1"), "got: {err}");
        let err = parser.field(FieldKind::Tank, 2).unwrap_err();
        assert!(err.to_string().contains("gas usage 7"), "got: {err}");
        assert!(parser.field(FieldKind::Tank, 3).is_ok());

        assert_eq!(
            parser.field(FieldKind::TankCount, 0).unwrap(),
            Field::TankCount(4)
        );
        assert!(parser.datetime().is_ok());
    }

    #[test]
    fn test_tank_table_truncated() {
        // Announce one tank but cut the table short; fix up the trailer.
        let mut data = RecordBuilder::new(0)
            .tank(RawTank::default())
            .build();
        data.truncate(data.len() - 2 - TANK_SIZE / 2);
        let crc = checksum::crc16_ccitt(0xFFFF, &data);
        data.extend_from_slice(&crc.to_le_bytes());
        let err = AbyssalParser::new(&data).datetime().unwrap_err();
        assert!(err.to_string().contains("tank table"), "got: {err}");
    }

    proptest! {
        #[test]
        fn prop_gasmix_fractions_sum_to_one(oxygen in 0u8..=100, helium_share in 0u8..=100) {
            let helium = ((100 - u16::from(oxygen)) * u16::from(helium_share) / 100) as u8;
            let data = RecordBuilder::new(0).gasmix(oxygen, helium, 0).build();
            let parser = AbyssalParser::new(&data);
            let Field::GasMix(mix) = parser.field(FieldKind::GasMix, 0).unwrap() else {
                panic!("expected a gas mix");
            };
            prop_assert!((mix.helium + mix.oxygen + mix.nitrogen - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_sample_times_non_decreasing(
            interval in 1u8..=60,
            depths in proptest::collection::vec(0u16..20000, 0..50),
        ) {
            let mut builder = RecordBuilder::new(0);
            builder.interval(interval);
            for depth in &depths {
                builder.sample(RawSample::new(*depth, 150));
            }
            let data = builder.build();
            let parser = AbyssalParser::new(&data);
            let mut last = 0;
            let mut groups = 0;
            parser.samples_foreach(|s| {
                if let Sample::Time(t) = s {
                    assert!(*t >= last);
                    last = *t;
                    groups += 1;
                }
            }).unwrap();
            prop_assert_eq!(groups, depths.len());
        }
    }
}
