//! Wire types exchanged with the simulation stepper
//!
//! The stepper hands the engine a [`PhysicalSnapshot`] once per timestep and
//! receives a [`ControlCommand`] back. Physical fields are exposed by name
//! through a static dispatch table so formulas and state construction can
//! read them without knowing the struct layout.

use serde::{Deserialize, Serialize};

use crate::fields::FieldLookup;

/// Three-component vector in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation as a unit quaternion `w + xi + yj + zk`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle` radians about `axis` (need not be normalized).
    pub fn from_axis_angle(axis: Vector3, angle: f64) -> Self {
        let norm = (axis.x * axis.x + axis.y * axis.y + axis.z * axis.z).sqrt();
        if norm == 0.0 {
            return Self::IDENTITY;
        }
        let (sin, cos) = (angle / 2.0).sin_cos();
        let s = sin / norm;
        Self::new(cos, axis.x * s, axis.y * s, axis.z * s)
    }

    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Hamilton product `self * other`.
    pub fn mul(self, other: Self) -> Self {
        Self::new(
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        )
    }

    /// Rotate `v` by this quaternion: `q * v * q^-1`.
    pub fn rotate(self, v: Vector3) -> Vector3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let r = self.mul(p).mul(self.conjugate());
        Vector3::new(r.x, r.y, r.z)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Per-timestep physical state supplied by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalSnapshot {
    pub position: Vector3,
    pub velocity: Vector3,
    pub orientation: Quaternion,
    /// Angular velocity about the world axes, rad/s.
    pub rotation_rate: Vector3,
    pub thrust: f64,
}

type Accessor = fn(&PhysicalSnapshot) -> f64;

/// Field name to accessor. Angles are derived from the body z-axis.
const PHYSICAL_FIELDS: &[(&str, Accessor)] = &[
    ("positionX", |s| s.position.x),
    ("positionY", |s| s.position.y),
    ("positionZ", |s| s.position.z),
    ("velocityX", |s| s.velocity.x),
    ("velocityY", |s| s.velocity.y),
    ("velocityZ", |s| s.velocity.z),
    ("angleX", |s| {
        let d = s.body_axis();
        d.x.atan2(d.z)
    }),
    ("angleY", |s| {
        let d = s.body_axis();
        d.y.atan2(d.z)
    }),
    ("angleZ", |s| s.body_axis().z.clamp(-1.0, 1.0).acos()),
    ("angleVelocityX", |s| s.rotation_rate.x),
    ("angleVelocityY", |s| s.rotation_rate.y),
    ("angleVelocityZ", |s| s.rotation_rate.z),
    ("thrust", |s| s.thrust),
];

impl PhysicalSnapshot {
    /// Names of every field the snapshot can resolve.
    pub fn field_names() -> impl Iterator<Item = &'static str> {
        PHYSICAL_FIELDS.iter().map(|(name, _)| *name)
    }

    pub fn is_physical_field(name: &str) -> bool {
        PHYSICAL_FIELDS.iter().any(|(field, _)| *field == name)
    }

    /// The vehicle's body z-axis in world coordinates.
    pub fn body_axis(&self) -> Vector3 {
        self.orientation.rotate(Vector3::new(0.0, 0.0, 1.0))
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        PHYSICAL_FIELDS
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, accessor)| accessor(self))
    }
}

impl FieldLookup for PhysicalSnapshot {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.field(field)
    }
}

/// Actuator command returned to the simulation each timestep.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCommand {
    pub thrust: f64,
    pub gimbal_x: f64,
    pub gimbal_y: f64,
    pub lateral_thrust_x: f64,
    pub lateral_thrust_y: f64,
}

impl ControlCommand {
    /// Action field names that map onto the command.
    pub const FIELDS: [&'static str; 5] = [
        "thrust",
        "gimbalX",
        "gimbalY",
        "lateralThrustX",
        "lateralThrustY",
    ];

    /// Set the command slot backing `field`. Returns `false` for non-command fields.
    pub fn set(&mut self, field: &str, value: f64) -> bool {
        let slot = match field {
            "thrust" => &mut self.thrust,
            "gimbalX" => &mut self.gimbal_x,
            "gimbalY" => &mut self.gimbal_y,
            "lateralThrustX" => &mut self.lateral_thrust_x,
            "lateralThrustY" => &mut self.lateral_thrust_y,
            _ => return false,
        };
        *slot = value;
        true
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "thrust" => Some(self.thrust),
            "gimbalX" => Some(self.gimbal_x),
            "gimbalY" => Some(self.gimbal_y),
            "lateralThrustX" => Some(self.lateral_thrust_x),
            "lateralThrustY" => Some(self.lateral_thrust_y),
            _ => None,
        }
    }
}

impl FieldLookup for ControlCommand {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.get(field)
    }
}
