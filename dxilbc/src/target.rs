//! Shader target of a DXIL program (shader kind + shader model)

use std::fmt;

/// Shader kind stored in the upper half of the DXIL program version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Pixel shader
    Pixel,
    /// Vertex shader
    Vertex,
    /// Geometry shader
    Geometry,
    /// Hull (tessellation control) shader
    Hull,
    /// Domain (tessellation evaluation) shader
    Domain,
    /// Compute shader
    Compute,
    /// Shader library
    Library,
    /// Ray generation shader
    RayGeneration,
    /// Intersection shader
    Intersection,
    /// Any-hit shader
    AnyHit,
    /// Closest-hit shader
    ClosestHit,
    /// Miss shader
    Miss,
    /// Callable shader
    Callable,
    /// Mesh shader
    Mesh,
    /// Amplification shader
    Amplification,
    /// Unrecognized kind value
    Unknown(u16),
}

impl From<u16> for ShaderKind {
    fn from(value: u16) -> Self {
        match value {
            0 => ShaderKind::Pixel,
            1 => ShaderKind::Vertex,
            2 => ShaderKind::Geometry,
            3 => ShaderKind::Hull,
            4 => ShaderKind::Domain,
            5 => ShaderKind::Compute,
            6 => ShaderKind::Library,
            7 => ShaderKind::RayGeneration,
            8 => ShaderKind::Intersection,
            9 => ShaderKind::AnyHit,
            10 => ShaderKind::ClosestHit,
            11 => ShaderKind::Miss,
            12 => ShaderKind::Callable,
            13 => ShaderKind::Mesh,
            14 => ShaderKind::Amplification,
            other => ShaderKind::Unknown(other),
        }
    }
}

impl ShaderKind {
    /// Returns the target prefix (ps, vs, cs, lib, ...)
    pub fn prefix(&self) -> &'static str {
        match self {
            ShaderKind::Pixel => "ps",
            ShaderKind::Vertex => "vs",
            ShaderKind::Geometry => "gs",
            ShaderKind::Hull => "hs",
            ShaderKind::Domain => "ds",
            ShaderKind::Compute => "cs",
            ShaderKind::Library => "lib",
            ShaderKind::RayGeneration => "raygeneration",
            ShaderKind::Intersection => "intersection",
            ShaderKind::AnyHit => "anyhit",
            ShaderKind::ClosestHit => "closesthit",
            ShaderKind::Miss => "miss",
            ShaderKind::Callable => "callable",
            ShaderKind::Mesh => "ms",
            ShaderKind::Amplification => "as",
            ShaderKind::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Decoded DXIL program version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderTarget {
    /// The shader kind
    pub kind: ShaderKind,
    /// Shader model major version
    pub major: u32,
    /// Shader model minor version
    pub minor: u32,
}

impl ShaderTarget {
    /// Creates a new shader target
    pub const fn new(kind: ShaderKind, major: u32, minor: u32) -> Self {
        ShaderTarget { kind, major, minor }
    }

    /// Splits a program version word: kind in bits 16..32, major in 4..8,
    /// minor in 0..4.
    pub fn from_program_version(version: u32) -> Self {
        ShaderTarget {
            kind: ShaderKind::from((version >> 16) as u16),
            major: (version >> 4) & 0xF,
            minor: version & 0xF,
        }
    }

    /// Inverse of [`from_program_version`](Self::from_program_version).
    pub fn program_version(&self) -> u32 {
        let kind = match self.kind {
            ShaderKind::Pixel => 0,
            ShaderKind::Vertex => 1,
            ShaderKind::Geometry => 2,
            ShaderKind::Hull => 3,
            ShaderKind::Domain => 4,
            ShaderKind::Compute => 5,
            ShaderKind::Library => 6,
            ShaderKind::RayGeneration => 7,
            ShaderKind::Intersection => 8,
            ShaderKind::AnyHit => 9,
            ShaderKind::ClosestHit => 10,
            ShaderKind::Miss => 11,
            ShaderKind::Callable => 12,
            ShaderKind::Mesh => 13,
            ShaderKind::Amplification => 14,
            ShaderKind::Unknown(value) => u32::from(value),
        };
        (kind << 16) | ((self.major & 0xF) << 4) | (self.minor & 0xF)
    }
}

impl fmt::Display for ShaderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.kind.prefix(), self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_strings() {
        assert_eq!(ShaderTarget::new(ShaderKind::Pixel, 6, 0).to_string(), "ps_6_0");
        assert_eq!(ShaderTarget::new(ShaderKind::Compute, 6, 5).to_string(), "cs_6_5");
        assert_eq!(ShaderTarget::new(ShaderKind::Library, 6, 3).to_string(), "lib_6_3");
    }

    #[test]
    fn test_program_version_fields() {
        let target = ShaderTarget::from_program_version(0x0005_0062);
        assert_eq!(target.kind, ShaderKind::Compute);
        assert_eq!(target.major, 6);
        assert_eq!(target.minor, 2);
        assert_eq!(target.program_version(), 0x0005_0062);

        let odd = ShaderTarget::from_program_version(0x0040_0060);
        assert_eq!(odd.kind, ShaderKind::Unknown(0x40));
        assert_eq!(odd.program_version(), 0x0040_0060);
    }
}
