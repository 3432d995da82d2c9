use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Lepton species as encoded in the `lep_type` column (PDG codes without sign).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleType {
    /// An electron (code 11).
    Electron,
    /// A muon (code 13).
    Muon,
    /// Any other code found in the input.
    Other(i32),
}

impl ParticleType {
    /// The integer code used in the input tables.
    pub fn code(&self) -> i32 {
        match self {
            ParticleType::Electron => 11,
            ParticleType::Muon => 13,
            ParticleType::Other(code) => *code,
        }
    }

    /// Interpret an integer code from the input tables.
    pub fn from_code(code: i32) -> Self {
        match code {
            11 => ParticleType::Electron,
            13 => ParticleType::Muon,
            other => ParticleType::Other(other),
        }
    }
}

impl Display for ParticleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticleType::Electron => write!(f, "electron"),
            ParticleType::Muon => write!(f, "muon"),
            ParticleType::Other(code) => write!(f, "type {code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_particle_type_codes() {
        assert_eq!(ParticleType::from_code(13), ParticleType::Muon);
        assert_eq!(ParticleType::from_code(11), ParticleType::Electron);
        assert_eq!(ParticleType::from_code(22), ParticleType::Other(22));
        assert_eq!(ParticleType::Muon.code(), 13);
        assert_eq!(ParticleType::Other(22).code(), 22);
    }

    #[test]
    fn test_particle_type_display() {
        assert_eq!(ParticleType::Muon.to_string(), "muon");
        assert_eq!(ParticleType::Electron.to_string(), "electron");
        assert_eq!(ParticleType::from_code(15).to_string(), "type 15");
    }
}
