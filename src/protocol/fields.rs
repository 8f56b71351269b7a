//! Field names shared by the two wire formats.

use crate::data::{SensorFrame, Tilt, Vector3};
use crate::error::{Error, Result};

/// A telemetry field, independent of how the wire format spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Gyroscope X.
    GyroX,
    /// Gyroscope Y.
    GyroY,
    /// Gyroscope Z.
    GyroZ,
    /// Accelerometer X.
    AccX,
    /// Accelerometer Y.
    AccY,
    /// Accelerometer Z.
    AccZ,
    /// Tilt X.
    TiltX,
    /// Tilt Y.
    TiltY,
    /// Linear displacement along Z.
    ZStroke,
    /// Temperature.
    Temperature,
}

impl Field {
    /// All fields, in wire order.
    pub const ALL: [Field; 10] = [
        Field::GyroX,
        Field::GyroY,
        Field::GyroZ,
        Field::AccX,
        Field::AccY,
        Field::AccZ,
        Field::TiltX,
        Field::TiltY,
        Field::ZStroke,
        Field::Temperature,
    ];

    /// Resolve a wire key. Unit suffixes such as `(degree)` or `(m)` are ignored.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        let name = match key.find('(') {
            Some(open) if key.ends_with(')') => key[..open].trim_end(),
            _ => key,
        };

        match name {
            "gyroX" => Some(Self::GyroX),
            "gyroY" => Some(Self::GyroY),
            "gyroZ" => Some(Self::GyroZ),
            "accX" => Some(Self::AccX),
            "accY" => Some(Self::AccY),
            "accZ" => Some(Self::AccZ),
            "tiltX" => Some(Self::TiltX),
            "tiltY" => Some(Self::TiltY),
            "zStroke" | "distance" => Some(Self::ZStroke),
            "temperature" => Some(Self::Temperature),
            _ => None,
        }
    }

    /// Canonical key name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GyroX => "gyroX",
            Self::GyroY => "gyroY",
            Self::GyroZ => "gyroZ",
            Self::AccX => "accX",
            Self::AccY => "accY",
            Self::AccZ => "accZ",
            Self::TiltX => "tiltX",
            Self::TiltY => "tiltY",
            Self::ZStroke => "zStroke",
            Self::Temperature => "temperature",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Accumulates field values for one record.
#[derive(Debug, Default)]
pub struct FieldSet {
    values: [Option<f64>; 10],
}

impl FieldSet {
    /// Record a value. A field seen twice invalidates the record.
    pub fn set(&mut self, field: Field, value: f64) -> Result<()> {
        let slot = &mut self.values[field.index()];
        if slot.is_some() {
            return Err(Error::decode(format!("duplicate field {}", field.name())));
        }
        *slot = Some(value);
        Ok(())
    }

    /// Build the frame. Every field must be present.
    pub fn into_frame(self) -> Result<SensorFrame> {
        let get = |field: Field| {
            self.values[field.index()]
                .ok_or_else(|| Error::decode(format!("missing field {}", field.name())))
        };

        SensorFrame::new(
            Vector3::new(get(Field::GyroX)?, get(Field::GyroY)?, get(Field::GyroZ)?),
            Vector3::new(get(Field::AccX)?, get(Field::AccY)?, get(Field::AccZ)?),
            Tilt::new(get(Field::TiltX)?, get(Field::TiltY)?),
            get(Field::ZStroke)?,
            get(Field::Temperature)?,
        )
    }
}
