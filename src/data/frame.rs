//! Decoded telemetry samples.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// A three-axis reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vector3 {
    /// X axis.
    pub x: f64,
    /// Y axis.
    pub y: f64,
    /// Z axis.
    pub z: f64,
}

impl Vector3 {
    /// Create a new vector.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Tilt about the X and Y axes, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tilt {
    /// Tilt about X.
    pub x: f64,
    /// Tilt about Y.
    pub y: f64,
}

impl Tilt {
    /// Create a new tilt pair.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One complete telemetry record.
///
/// Every field is finite; [`SensorFrame::new`] refuses anything else.
/// Gyroscope units are degrees or degrees per second and accelerometer units
/// are m/s² or g, whichever the firmware is built to report.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SensorFrame {
    gyro: Vector3,
    accel: Vector3,
    tilt: Tilt,
    z_stroke: f64,
    temperature: f64,
}

impl SensorFrame {
    /// Build a frame, rejecting any non-finite field.
    pub fn new(
        gyro: Vector3,
        accel: Vector3,
        tilt: Tilt,
        z_stroke: f64,
        temperature: f64,
    ) -> Result<Self> {
        let finite = gyro.is_finite()
            && accel.is_finite()
            && tilt.x.is_finite()
            && tilt.y.is_finite()
            && z_stroke.is_finite()
            && temperature.is_finite();

        if !finite {
            return Err(Error::decode("non-finite field in frame"));
        }

        Ok(Self {
            gyro,
            accel,
            tilt,
            z_stroke,
            temperature,
        })
    }

    /// Gyroscope reading.
    pub fn gyro(&self) -> Vector3 {
        self.gyro
    }

    /// Accelerometer reading.
    pub fn accel(&self) -> Vector3 {
        self.accel
    }

    /// Tilt pair in degrees.
    pub fn tilt(&self) -> Tilt {
        self.tilt
    }

    /// Linear displacement ("stroke") along Z, in metres.
    pub fn z_stroke(&self) -> f64 {
        self.z_stroke
    }

    /// Temperature in degrees Celsius.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

/// A frame together with the time the hub accepted it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TelemetrySample {
    /// The decoded frame.
    pub frame: SensorFrame,
    /// Wall-clock receive time.
    pub received_at: DateTime<Utc>,
}

impl TelemetrySample {
    /// Stamp a frame with the current time.
    pub fn now(frame: SensorFrame) -> Self {
        Self {
            frame,
            received_at: Utc::now(),
        }
    }
}
