use crate::units::Quantity;
use super::field_extractor::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// What a decoded field feeds into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    TotalEnergy,
    TotalVolume,
    CurrentPower,
    /* Recorded in the trace, never stored */
    Unknown,
}

impl FieldRole {
    pub fn quantity(&self) -> Option<Quantity> {
        match self {
            FieldRole::TotalEnergy => Some(Quantity::Energy),
            FieldRole::TotalVolume => Some(Quantity::Volume),
            FieldRole::CurrentPower => Some(Quantity::Power),
            FieldRole::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub offset: usize,
    pub width: usize,
    pub byte_order: ByteOrder,
    pub role: FieldRole,
    pub label: String,
    /// Multiplier applied to the composed raw integer
    pub scale: f64,
}

impl FieldSpec {
    pub fn measurement(offset: usize, width: usize, role: FieldRole, label: &str, scale: f64) -> Self {
        FieldSpec {
            offset,
            width,
            byte_order: ByteOrder::LittleEndian,
            role,
            label: label.to_string(),
            scale,
        }
    }

    pub fn unknown(offset: usize, width: usize) -> Self {
        FieldSpec {
            offset,
            width,
            byte_order: ByteOrder::LittleEndian,
            role: FieldRole::Unknown,
            label: "unknown".to_string(),
            scale: 1.0,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Field layout selected by one frame type byte
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    pub discriminant: u8,
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl FrameLayout {
    /// Number of content bytes a complete frame of this type carries
    pub fn expected_len(&self) -> usize {
        self.fields.iter().map(|f| f.end()).max().unwrap_or(0)
    }
}

/// Which quantities a meter is able to report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub energy: bool,
    pub power: bool,
    pub volume: bool,
}

impl Capabilities {
    pub fn supports(&self, q: Quantity) -> bool {
        match q {
            Quantity::Energy => self.energy,
            Quantity::Power => self.power,
            Quantity::Volume => self.volume,
        }
    }
}

/// Values one frame carried, `None` for quantities absent from its layout
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub total_energy_kwh: Option<f64>,
    pub current_power_kw: Option<f64>,
    pub total_volume_m3: Option<f64>,
}

impl Readings {
    pub fn set(&mut self, role: FieldRole, value: f64) {
        match role {
            FieldRole::TotalEnergy => self.total_energy_kwh = Some(value),
            FieldRole::TotalVolume => self.total_volume_m3 = Some(value),
            FieldRole::CurrentPower => self.current_power_kw = Some(value),
            FieldRole::Unknown => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeReport {
    pub frame_type: u8,
    pub layout_name: String,
    pub readings: Readings,
    /// Fields the content ended before, read as zero padded
    pub out_of_bounds: Vec<FieldError>,
}

impl DecodeReport {
    pub fn is_truncated(&self) -> bool {
        !self.out_of_bounds.is_empty()
    }
}
