use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical quantities a meter can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Energy,
    Power,
    Volume,
}

/// Written as the lower case name in config files, e.g. `gj` or `l`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    KWH,
    GJ,
    M3,
    L,
    KW,
}

#[derive(Error, Debug, PartialEq)]
pub enum UnitError {
    #[error("Cannot convert {0:?} into {1:?}")]
    IncompatibleUnits(Unit, Unit),
    #[error("Unit {0:?} is not a unit of {1:?}")]
    WrongQuantity(Unit, Quantity),
    #[error("Unknown unit {0}, supported are: {supported}", supported = supported_units())]
    UnknownUnit(String),
}

pub const ALL_UNITS: [Unit; 5] = [Unit::KWH, Unit::GJ, Unit::M3, Unit::L, Unit::KW];

/* "kwh (kilo Watt hour), gj (Giga Joule), ..." */
pub fn supported_units() -> String {
    return ALL_UNITS.iter()
        .map(|u| format!("{} ({})", u.lower_case_name(), u.explanation()))
        .collect::<Vec<String>>()
        .join(", ");
}

/* kWh per GJ is 1/0.0036 */
const GJ_PER_KWH: f64 = 0.0036;
const L_PER_M3: f64 = 1000.0;

impl Unit {
    pub fn quantity(&self) -> Quantity {
        match self {
            Unit::KWH | Unit::GJ => Quantity::Energy,
            Unit::M3 | Unit::L => Quantity::Volume,
            Unit::KW => Quantity::Power,
        }
    }

    pub fn lower_case_name(&self) -> &'static str {
        match self {
            Unit::KWH => "kwh",
            Unit::GJ => "gj",
            Unit::M3 => "m3",
            Unit::L => "l",
            Unit::KW => "kw",
        }
    }

    pub fn human_name(&self) -> &'static str {
        match self {
            Unit::KWH => "kWh",
            Unit::GJ => "GJ",
            Unit::M3 => "m3",
            Unit::L => "l",
            Unit::KW => "kW",
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            Unit::KWH => "kilo Watt hour",
            Unit::GJ => "Giga Joule",
            Unit::M3 => "cubic meter",
            Unit::L => "litre",
            Unit::KW => "kilo Watt",
        }
    }
}

pub fn to_unit(s: &str) -> Option<Unit> {
    match s {
        "kwh" => Some(Unit::KWH),
        "gj" => Some(Unit::GJ),
        "m3" => Some(Unit::M3),
        "l" => Some(Unit::L),
        "kw" => Some(Unit::KW),
        _ => None,
    }
}

impl TryFrom<String> for Unit {
    type Error = UnitError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        to_unit(&s).ok_or(UnitError::UnknownUnit(s))
    }
}

impl From<Unit> for String {
    fn from(u: Unit) -> Self {
        u.lower_case_name().to_string()
    }
}

pub fn is_quantity(u: Unit, q: Quantity) -> bool {
    return u.quantity() == q;
}

pub fn assert_quantity(u: Unit, q: Quantity) -> Result<(), UnitError> {
    if !is_quantity(u, q) {
        return Err(UnitError::WrongQuantity(u, q));
    }
    Ok(())
}

pub fn can_convert(from: Unit, to: Unit) -> bool {
    return from.quantity() == to.quantity();
}

pub fn convert(v: f64, from: Unit, to: Unit) -> Result<f64, UnitError> {
    if from == to {
        return Ok(v);
    }

    match (from, to) {
        (Unit::KWH, Unit::GJ) => Ok(v * GJ_PER_KWH),
        (Unit::GJ, Unit::KWH) => Ok(v / GJ_PER_KWH),
        (Unit::M3, Unit::L) => Ok(v * L_PER_M3),
        (Unit::L, Unit::M3) => Ok(v / L_PER_M3),
        _ => Err(UnitError::IncompatibleUnits(from, to)),
    }
}

pub fn str_with_unit_hr(v: f64, u: Unit) -> String {
    return format!("{:.3} {}", v, u.human_name());
}
