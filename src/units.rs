//! Unit families and conversions for engine quantities.
//!
//! The engine works in a single internal unit system: nanometres, picoseconds,
//! atomic mass units and kelvin. Derived quantities follow from those, so the
//! internal energy unit `amu nm² ps⁻²` is exactly one kJ/mol and the speed unit
//! `nm/ps` is one km/s.
//!
//! Every [`Unit`] belongs to a [`UnitFamily`]; converting across families is a
//! contract violation and returns [`Error::UnitMismatch`].
//!
//! ```rust
//! use boltzsim::units::{convert, CELSIUS, KELVIN};
//!
//! let k = convert(25.0, CELSIUS, KELVIN).unwrap();
//! assert!((k - 298.15).abs() < 1e-9);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Boltzmann constant in internal units (amu nm² ps⁻² K⁻¹).
pub const BOLTZMANN: f64 = 0.008_314_462_618;

/// One atomic mass unit in kilograms.
pub const AMU_KG: f64 = 1.660_539_066_60e-27;

/// Internal energy unit in joules.
pub const ENERGY_UNIT_J: f64 = AMU_KG * 1e-18 / 1e-24;

/// Physical dimension a value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitFamily {
    Dimensionless,
    Length,
    Time,
    Mass,
    Speed,
    Energy,
    Temperature,
    /// Force (pressure in a one-dimensional arena).
    Pressure1,
    /// Force per length (pressure in a two-dimensional arena).
    Pressure2,
    /// Force per area.
    Pressure3,
    Rate,
}

impl UnitFamily {
    /// Pressure family for an arena of dimension `dim`.
    pub fn pressure(dim: usize) -> Self {
        match dim {
            1 => UnitFamily::Pressure1,
            2 => UnitFamily::Pressure2,
            _ => UnitFamily::Pressure3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnitFamily::Dimensionless => "dimensionless",
            UnitFamily::Length => "length",
            UnitFamily::Time => "time",
            UnitFamily::Mass => "mass",
            UnitFamily::Speed => "speed",
            UnitFamily::Energy => "energy",
            UnitFamily::Temperature => "temperature",
            UnitFamily::Pressure1 => "force",
            UnitFamily::Pressure2 => "line pressure",
            UnitFamily::Pressure3 => "pressure",
            UnitFamily::Rate => "rate",
        }
    }

    /// Units selectable for this family, the internal unit first.
    pub fn units(&self) -> &'static [Unit] {
        match self {
            UnitFamily::Dimensionless => &[UNITLESS],
            UnitFamily::Length => &[NANOMETER, PICOMETER, ANGSTROM, MICROMETER, METER],
            UnitFamily::Time => &[PICOSECOND, FEMTOSECOND, NANOSECOND, SECOND],
            UnitFamily::Mass => &[AMU, KILOGRAM],
            UnitFamily::Speed => &[NM_PER_PS, M_PER_S],
            UnitFamily::Energy => &[KJ_PER_MOL, ZEPTOJOULE, ELECTRONVOLT, JOULE],
            UnitFamily::Temperature => &[KELVIN, CELSIUS, FAHRENHEIT],
            UnitFamily::Pressure1 => &[FORCE_BASE, PICONEWTON, NEWTON],
            UnitFamily::Pressure2 => &[LINE_PRESSURE_BASE, NEWTON_PER_METER],
            UnitFamily::Pressure3 => &[PRESSURE_BASE, PASCAL, KILOPASCAL, BAR, ATMOSPHERE],
            UnitFamily::Rate => &[PER_PS, PER_NS, PER_S],
        }
    }

    /// The internal unit of this family.
    pub fn base(&self) -> Unit {
        self.units()[0]
    }
}

/// A concrete unit: `internal = value * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub symbol: &'static str,
    pub family: UnitFamily,
    pub scale: f64,
    pub offset: f64,
}

impl Unit {
    const fn linear(symbol: &'static str, family: UnitFamily, scale: f64) -> Self {
        Self {
            symbol,
            family,
            scale,
            offset: 0.0,
        }
    }

    /// Converts a value expressed in this unit to the internal unit.
    #[inline]
    pub fn to_base(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    /// Converts an internal value into this unit.
    #[inline]
    pub fn from_base(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}

pub const UNITLESS: Unit = Unit::linear("", UnitFamily::Dimensionless, 1.0);

pub const NANOMETER: Unit = Unit::linear("nm", UnitFamily::Length, 1.0);
pub const PICOMETER: Unit = Unit::linear("pm", UnitFamily::Length, 1e-3);
pub const ANGSTROM: Unit = Unit::linear("Å", UnitFamily::Length, 0.1);
pub const MICROMETER: Unit = Unit::linear("µm", UnitFamily::Length, 1e3);
pub const METER: Unit = Unit::linear("m", UnitFamily::Length, 1e9);

pub const PICOSECOND: Unit = Unit::linear("ps", UnitFamily::Time, 1.0);
pub const FEMTOSECOND: Unit = Unit::linear("fs", UnitFamily::Time, 1e-3);
pub const NANOSECOND: Unit = Unit::linear("ns", UnitFamily::Time, 1e3);
pub const SECOND: Unit = Unit::linear("s", UnitFamily::Time, 1e12);

pub const AMU: Unit = Unit::linear("u", UnitFamily::Mass, 1.0);
pub const KILOGRAM: Unit = Unit::linear("kg", UnitFamily::Mass, 1.0 / AMU_KG);

pub const NM_PER_PS: Unit = Unit::linear("nm/ps", UnitFamily::Speed, 1.0);
pub const M_PER_S: Unit = Unit::linear("m/s", UnitFamily::Speed, 1e-3);

pub const KJ_PER_MOL: Unit = Unit::linear("kJ/mol", UnitFamily::Energy, 1.0);
pub const JOULE: Unit = Unit::linear("J", UnitFamily::Energy, 1.0 / ENERGY_UNIT_J);
pub const ZEPTOJOULE: Unit = Unit::linear("zJ", UnitFamily::Energy, 1e-21 / ENERGY_UNIT_J);
pub const ELECTRONVOLT: Unit =
    Unit::linear("eV", UnitFamily::Energy, 1.602_176_634e-19 / ENERGY_UNIT_J);

pub const KELVIN: Unit = Unit::linear("K", UnitFamily::Temperature, 1.0);
pub const CELSIUS: Unit = Unit {
    symbol: "°C",
    family: UnitFamily::Temperature,
    scale: 1.0,
    offset: 273.15,
};
pub const FAHRENHEIT: Unit = Unit {
    symbol: "°F",
    family: UnitFamily::Temperature,
    scale: 5.0 / 9.0,
    offset: 273.15 - 32.0 * 5.0 / 9.0,
};

// amu nm ps⁻² in newtons
const FORCE_UNIT_N: f64 = AMU_KG * 1e-9 / 1e-24;
pub const FORCE_BASE: Unit = Unit::linear("u·nm/ps²", UnitFamily::Pressure1, 1.0);
pub const PICONEWTON: Unit = Unit::linear("pN", UnitFamily::Pressure1, 1e-12 / FORCE_UNIT_N);
pub const NEWTON: Unit = Unit::linear("N", UnitFamily::Pressure1, 1.0 / FORCE_UNIT_N);

// amu ps⁻² in N/m
const LINE_PRESSURE_UNIT: f64 = AMU_KG / 1e-24;
pub const LINE_PRESSURE_BASE: Unit = Unit::linear("u/ps²", UnitFamily::Pressure2, 1.0);
pub const NEWTON_PER_METER: Unit =
    Unit::linear("N/m", UnitFamily::Pressure2, 1.0 / LINE_PRESSURE_UNIT);

// amu nm⁻¹ ps⁻² in pascal
const PRESSURE_UNIT_PA: f64 = AMU_KG / (1e-9 * 1e-24);
pub const PRESSURE_BASE: Unit = Unit::linear("u/(nm·ps²)", UnitFamily::Pressure3, 1.0);
pub const PASCAL: Unit = Unit::linear("Pa", UnitFamily::Pressure3, 1.0 / PRESSURE_UNIT_PA);
pub const KILOPASCAL: Unit = Unit::linear("kPa", UnitFamily::Pressure3, 1e3 / PRESSURE_UNIT_PA);
pub const BAR: Unit = Unit::linear("bar", UnitFamily::Pressure3, 1e5 / PRESSURE_UNIT_PA);
pub const ATMOSPHERE: Unit =
    Unit::linear("atm", UnitFamily::Pressure3, 101_325.0 / PRESSURE_UNIT_PA);

pub const PER_PS: Unit = Unit::linear("1/ps", UnitFamily::Rate, 1.0);
pub const PER_NS: Unit = Unit::linear("1/ns", UnitFamily::Rate, 1e-3);
pub const PER_S: Unit = Unit::linear("1/s", UnitFamily::Rate, 1e-12);

/// Converts `value` from one unit to another of the same family.
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64> {
    if from.family != to.family {
        log::error!(
            "unit family mismatch: {} ({}) -> {} ({})",
            from.symbol,
            from.family.name(),
            to.symbol,
            to.family.name()
        );
        return Err(Error::UnitMismatch {
            from: from.symbol,
            to: to.symbol,
        });
    }
    Ok(to.from_base(from.to_base(value)))
}

/// Picks the display unit for an internal `value` among `candidates`.
///
/// Prefers the largest unit that still shows a magnitude of at least one.
/// Offset scales (temperature) always use the first candidate.
pub fn best_unit(value: f64, family: UnitFamily, candidates: &[Unit]) -> Result<Unit> {
    let Some(first) = candidates.first() else {
        return Err(Error::NoUnitAvailable(family.name()));
    };
    if let Some(bad) = candidates.iter().find(|u| u.family != family) {
        return Err(Error::UnitMismatch {
            from: family.base().symbol,
            to: bad.symbol,
        });
    }
    if family == UnitFamily::Temperature || value == 0.0 || !value.is_finite() {
        return Ok(*first);
    }
    let mut sorted: Vec<Unit> = candidates.to_vec();
    sorted.sort_by(|a, b| a.scale.total_cmp(&b.scale));
    let mut pick = sorted[0];
    for u in &sorted {
        if u.from_base(value).abs() >= 1.0 {
            pick = *u;
        }
    }
    Ok(pick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn celsius_and_fahrenheit_round_to_kelvin() -> Result<()> {
        assert_relative_eq!(convert(0.0, CELSIUS, KELVIN)?, 273.15);
        assert_relative_eq!(convert(32.0, FAHRENHEIT, KELVIN)?, 273.15, epsilon = 1e-9);
        assert_relative_eq!(convert(373.15, KELVIN, FAHRENHEIT)?, 212.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn internal_energy_unit_is_kj_per_mol() -> Result<()> {
        // 1 kJ/mol = 1000 J / N_A
        let joules = convert(1.0, KJ_PER_MOL, JOULE)?;
        assert_relative_eq!(joules, 1000.0 / 6.022_140_76e23, max_relative = 1e-8);
        Ok(())
    }

    #[test]
    fn boltzmann_matches_si() -> Result<()> {
        let kb_si = convert(BOLTZMANN, KJ_PER_MOL, JOULE)?;
        assert_relative_eq!(kb_si, 1.380_649e-23, max_relative = 1e-6);
        Ok(())
    }

    #[test]
    fn speed_units() -> Result<()> {
        assert_relative_eq!(convert(1.0, NM_PER_PS, M_PER_S)?, 1000.0);
        Ok(())
    }

    #[test]
    fn mismatched_families_fail() {
        let err = convert(1.0, NANOMETER, KELVIN).unwrap_err();
        assert!(matches!(err, Error::UnitMismatch { .. }));
    }

    #[test]
    fn best_unit_without_candidates_fails() {
        let err = best_unit(1.0, UnitFamily::Length, &[]).unwrap_err();
        assert!(matches!(err, Error::NoUnitAvailable("length")));
    }

    #[test]
    fn best_unit_picks_readable_magnitude() -> Result<()> {
        let u = best_unit(0.25, UnitFamily::Length, UnitFamily::Length.units())?;
        assert_eq!(u.symbol, "Å");
        let u = best_unit(5.0, UnitFamily::Length, UnitFamily::Length.units())?;
        assert_eq!(u.symbol, "nm");
        Ok(())
    }

    #[test]
    fn pressure_family_follows_dimension() {
        assert_eq!(UnitFamily::pressure(1), UnitFamily::Pressure1);
        assert_eq!(UnitFamily::pressure(2), UnitFamily::Pressure2);
        assert_eq!(UnitFamily::pressure(3), UnitFamily::Pressure3);
    }
}
