//! Flat, foreign-friendly view of a parsed dive for the mobile bindings.
//!
//! Fields this family does not record come back as `None`; a corrupt record
//! is an error.

use crate::error::{DiveError, ErrorKind, Result};
use crate::family::{Family, Parser};
use crate::models::{DecoKind, DiveMode, Field, FieldKind, Sample};

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ParsedGasMix {
    pub o2_fraction: f64,
    pub he_fraction: f64,
    pub n2_fraction: f64,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ParsedTank {
    pub volume_l: Option<f64>,
    pub work_pressure_bar: Option<f64>,
    pub begin_pressure_bar: f64,
    pub end_pressure_bar: f64,
    pub gasmix_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ParsedSample {
    pub t_sec: u32,
    pub depth_m: f64,
    pub temp_c: Option<f64>,
    pub pressure_bar: Option<f64>,
    pub gasmix_index: Option<u32>,
    pub ppo2: Option<f64>,
    pub ceiling_m: Option<f64>,
    pub cns_fraction: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ParsedDive {
    /// Instrument local time, expressed as if it were UTC.
    pub start_time_unix: i64,
    pub divetime_sec: u32,
    pub max_depth_m: f64,
    pub avg_depth_m: Option<f64>,
    pub min_temp_c: Option<f64>,
    pub max_temp_c: Option<f64>,
    pub atmospheric_bar: Option<f64>,
    pub is_ccr: bool,
    pub gasmixes: Vec<ParsedGasMix>,
    pub tanks: Vec<ParsedTank>,
    pub samples: Vec<ParsedSample>,
}

/// `Ok(None)` when the family does not provide the field.
fn optional(result: Result<Field>) -> Result<Option<Field>> {
    match result {
        Ok(field) => Ok(Some(field)),
        Err(err) if err.kind() == ErrorKind::Unsupported => Ok(None),
        Err(err) => Err(err),
    }
}

fn mismatch(kind: FieldKind, field: &Field) -> DiveError {
    DiveError::data_format(format!("{kind:?} query answered with {field:?}"))
}

fn scalar_value(kind: FieldKind, field: Field) -> Result<f64> {
    if field.kind() != kind {
        return Err(mismatch(kind, &field));
    }
    match field {
        Field::MaxDepth(v)
        | Field::AvgDepth(v)
        | Field::TemperatureMinimum(v)
        | Field::TemperatureMaximum(v)
        | Field::Atmospheric(v) => Ok(v),
        other => Err(mismatch(kind, &other)),
    }
}

fn scalar(parser: &Parser<'_>, kind: FieldKind) -> Result<Option<f64>> {
    optional(parser.field(kind, 0))?
        .map(|field| scalar_value(kind, field))
        .transpose()
}

fn count_value(kind: FieldKind, field: Field) -> Result<u32> {
    if field.kind() != kind {
        return Err(mismatch(kind, &field));
    }
    match field {
        Field::GasMixCount(n) | Field::TankCount(n) => Ok(n),
        other => Err(mismatch(kind, &other)),
    }
}

fn count(parser: &Parser<'_>, kind: FieldKind) -> Result<u32> {
    count_value(kind, parser.field(kind, 0)?)
}

fn collect_samples(parser: &Parser<'_>) -> Result<Vec<ParsedSample>> {
    let mut samples: Vec<ParsedSample> = Vec::new();
    for sample in parser.samples() {
        let sample = sample?;
        if let Sample::Time(t_sec) = sample {
            samples.push(ParsedSample {
                t_sec,
                depth_m: 0.0,
                temp_c: None,
                pressure_bar: None,
                gasmix_index: None,
                ppo2: None,
                ceiling_m: None,
                cns_fraction: None,
            });
            continue;
        }
        let Some(current) = samples.last_mut() else {
            return Err(DiveError::data_format("sample value before the first time"));
        };
        match sample {
            Sample::Depth(depth) => current.depth_m = depth,
            Sample::Temperature(temp) => current.temp_c = Some(temp),
            Sample::Pressure { bar, .. } => current.pressure_bar = Some(bar),
            Sample::GasMix(index) => current.gasmix_index = Some(index),
            Sample::Ppo2(ppo2) => current.ppo2 = Some(ppo2),
            Sample::Cns(cns) => current.cns_fraction = Some(cns),
            Sample::Deco { kind, depth, .. } => {
                current.ceiling_m = match kind {
                    DecoKind::NoDecoLimit => Some(0.0),
                    _ => Some(depth),
                }
            }
            Sample::Event { .. } | Sample::Time(_) => {}
        }
    }
    Ok(samples)
}

pub(crate) fn parse_record(family: Family, data: &[u8]) -> Result<ParsedDive> {
    let parser = Parser::new(family, data);
    let start = parser.datetime()?;

    let divetime_sec = match parser.field(FieldKind::DiveTime, 0)? {
        Field::DiveTime(t) => t,
        other => return Err(mismatch(FieldKind::DiveTime, &other)),
    };
    let max_depth_m = scalar(&parser, FieldKind::MaxDepth)?
        .ok_or_else(|| DiveError::data_format("record has no maximum depth"))?;
    let is_ccr = matches!(
        optional(parser.field(FieldKind::DiveMode, 0))?,
        Some(Field::DiveMode(DiveMode::ClosedCircuit))
    );

    let mut gasmixes = Vec::new();
    for i in 0..count(&parser, FieldKind::GasMixCount)? {
        let Field::GasMix(mix) = parser.field(FieldKind::GasMix, i)? else {
            return Err(DiveError::data_format(format!("gas mix {i} is not a gas mix")));
        };
        gasmixes.push(ParsedGasMix {
            o2_fraction: mix.oxygen,
            he_fraction: mix.helium,
            n2_fraction: mix.nitrogen,
        });
    }

    let mut tanks = Vec::new();
    for i in 0..count(&parser, FieldKind::TankCount)? {
        let Field::Tank(tank) = parser.field(FieldKind::Tank, i)? else {
            return Err(DiveError::data_format(format!("tank {i} is not a tank")));
        };
        tanks.push(ParsedTank {
            volume_l: (tank.volume > 0.0).then_some(tank.volume),
            work_pressure_bar: (tank.work_pressure > 0.0).then_some(tank.work_pressure),
            begin_pressure_bar: tank.begin_pressure,
            end_pressure_bar: tank.end_pressure,
            gasmix_index: tank.gasmix,
        });
    }

    Ok(ParsedDive {
        start_time_unix: start.and_utc().timestamp(),
        divetime_sec,
        max_depth_m,
        avg_depth_m: scalar(&parser, FieldKind::AvgDepth)?,
        min_temp_c: scalar(&parser, FieldKind::TemperatureMinimum)?,
        max_temp_c: scalar(&parser, FieldKind::TemperatureMaximum)?,
        atmospheric_bar: scalar(&parser, FieldKind::Atmospheric)?,
        is_ccr,
        gasmixes,
        tanks,
        samples: collect_samples(&parser)?,
    })
}

/// Decode a stored Abyssal dive record.
#[uniffi::export]
pub fn parse_dive_record(data: Vec<u8>) -> std::result::Result<ParsedDive, DiveError> {
    parse_record(Family::Abyssal, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abyssal::layout::{RawSample, RawTank, RecordBuilder, EPOCH_2000};

    #[test]
    fn test_parse_dive_record() {
        let mut deco = RawSample::new(600, 190);
        deco.deco = Some((2, 600, 120));
        let data = RecordBuilder::new(86_400)
            .divetime(1_800)
            .depths(2_000, 1_200)
            .temperatures(190, 220)
            .gasmix(21, 0, 0)
            .tank(RawTank {
                volume_dl: 110,
                work_pressure_bar: 0,
                begin_pressure_dbar: 2_000,
                end_pressure_dbar: 500,
                gasmix: 0,
                usage: 0,
            })
            .sample(RawSample::new(2_000, 190))
            .sample(deco)
            .build();

        let dive = parse_dive_record(data).unwrap();
        assert_eq!(dive.start_time_unix, EPOCH_2000 + 86_400);
        assert_eq!(dive.divetime_sec, 1_800);
        assert_eq!(dive.max_depth_m, 20.0);
        assert_eq!(dive.min_temp_c, Some(19.0));
        assert_eq!(dive.atmospheric_bar, None, "unsupported maps to None");
        assert!(!dive.is_ccr);
        assert_eq!(dive.gasmixes.len(), 1);
        assert_eq!(dive.tanks[0].volume_l, Some(11.0));
        assert_eq!(dive.tanks[0].work_pressure_bar, None);
        assert_eq!(dive.samples.len(), 2);
        assert_eq!(dive.samples[0].t_sec, 10);
        assert_eq!(dive.samples[1].ceiling_m, Some(6.0));
    }

    #[test]
    fn test_mismatched_field_is_data_format() {
        let err = scalar_value(FieldKind::MaxDepth, Field::AvgDepth(3.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        let err = scalar_value(FieldKind::MaxDepth, Field::DiveTime(30)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert_eq!(
            scalar_value(FieldKind::MaxDepth, Field::MaxDepth(3.0)).unwrap(),
            3.0
        );

        let err = count_value(FieldKind::TankCount, Field::GasMixCount(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert_eq!(
            count_value(FieldKind::TankCount, Field::TankCount(2)).unwrap(),
            2
        );
    }

    #[test]
    fn test_bad_gas_mix_fails_the_whole_conversion() {
        let data = RecordBuilder::new(0).gasmix(21, 0, 0).gasmix(32, 0, 9).build();
        let err = parse_dive_record(data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn test_parse_dive_record_corrupt() {
        let mut data = RecordBuilder::new(0).build();
        data[3] ^= 0x10;
        let err = parse_dive_record(data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }
}
