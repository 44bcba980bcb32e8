//! Consistency levels.

use crate::error::ProtocolError;
use std::fmt;

/// Replica-count policy for reads and writes, encoded as a `short`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    #[default]
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
}

impl Consistency {
    pub fn from_u16(value: u16) -> Result<Self, ProtocolError> {
        match value {
            0x0000 => Ok(Consistency::Any),
            0x0001 => Ok(Consistency::One),
            0x0002 => Ok(Consistency::Two),
            0x0003 => Ok(Consistency::Three),
            0x0004 => Ok(Consistency::Quorum),
            0x0005 => Ok(Consistency::All),
            0x0006 => Ok(Consistency::LocalQuorum),
            0x0007 => Ok(Consistency::EachQuorum),
            other => Err(ProtocolError::UnknownConsistency(other)),
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_values() {
        assert_eq!(Consistency::Any as u16, 0);
        assert_eq!(Consistency::One as u16, 1);
        assert_eq!(Consistency::Quorum as u16, 4);
        assert_eq!(Consistency::EachQuorum as u16, 7);
    }

    #[test]
    fn test_consistency_roundtrip() {
        for value in 0..=7 {
            let c = Consistency::from_u16(value).unwrap();
            assert_eq!(c as u16, value);
        }
    }

    #[test]
    fn test_unknown_consistency() {
        assert!(matches!(
            Consistency::from_u16(8),
            Err(ProtocolError::UnknownConsistency(8))
        ));
    }

    #[test]
    fn test_default_is_quorum() {
        assert_eq!(Consistency::default(), Consistency::Quorum);
    }
}
