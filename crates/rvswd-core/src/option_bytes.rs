//! Option bytes reader.
//!
//! The option block holds four 32-bit words, each carrying two
//! (byte, complement) pairs. A pair whose complement does not match marks a
//! corrupted or never-programmed field; it is reported per field and never
//! aborts the read.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::error::ProgrammerError;
use crate::poll::Delay;
use crate::protocol::{OPTION_BYTES_ADDR, OPTION_BYTES_WORDS};
use crate::target::Target;
use crate::transport::RvswdTransport;

/// RDPR value that disables read protection.
pub const RDPR_UNPROTECTED: u8 = 0xA5;

/// Named option byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionField {
    ReadProtection,
    User,
    Data0,
    Data1,
    WriteProtection(u8),
}

impl fmt::Display for OptionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionField::ReadProtection => write!(f, "read protection config"),
            OptionField::User => write!(f, "user config"),
            OptionField::Data0 => write!(f, "user data 0"),
            OptionField::Data1 => write!(f, "user data 1"),
            OptionField::WriteProtection(n) => write!(f, "write protection {}", n),
        }
    }
}

/// A field whose complement byte does not match.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid {field} 0x{value:02x} 0x{complement:02x}")]
pub struct InvalidOptionByte {
    pub field: OptionField,
    pub value: u8,
    pub complement: u8,
}

/// Validate one 16-bit (byte, complement) pair.
pub fn decode_pair(field: OptionField, half: u16) -> Result<u8, InvalidOptionByte> {
    let value = (half & 0xFF) as u8;
    let complement = (half >> 8) as u8;
    if !complement == value {
        Ok(value)
    } else {
        Err(InvalidOptionByte {
            field,
            value,
            complement,
        })
    }
}

fn low(word: u32) -> u16 {
    word as u16
}

fn high(word: u32) -> u16 {
    (word >> 16) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProtection {
    Disabled,
    /// Any RDPR value other than `0xA5`.
    Enabled(u8),
}

impl From<u8> for ReadProtection {
    fn from(rdpr: u8) -> Self {
        if rdpr == RDPR_UNPROTECTED {
            ReadProtection::Disabled
        } else {
            ReadProtection::Enabled(rdpr)
        }
    }
}

/// USER option byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserConfig(pub u8);

impl UserConfig {
    /// IWDG_SW: watchdog is not forced on by hardware.
    pub fn iwdg_disabled_by_hardware(&self) -> bool {
        self.0 & (1 << 0) != 0
    }

    /// STOP_RST cleared: entering stop mode resets the system.
    pub fn reset_on_stop(&self) -> bool {
        self.0 & (1 << 1) == 0
    }

    /// STANDBY_RST cleared: entering standby mode resets the system.
    pub fn reset_on_standby(&self) -> bool {
        self.0 & (1 << 2) == 0
    }

    /// RAM_CODE_MOD, bits 7:6.
    pub fn ram_code_mode(&self) -> u8 {
        (self.0 >> 6) & 0b11
    }
}

/// Decoded option bytes block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionBytes {
    pub raw: [u32; OPTION_BYTES_WORDS],
    pub read_protection: Result<ReadProtection, InvalidOptionByte>,
    pub user: Result<UserConfig, InvalidOptionByte>,
    pub data0: Result<u8, InvalidOptionByte>,
    pub data1: Result<u8, InvalidOptionByte>,
    pub write_protection: [Result<u8, InvalidOptionByte>; 4],
}

impl OptionBytes {
    pub fn decode(raw: [u32; OPTION_BYTES_WORDS]) -> Self {
        Self {
            raw,
            read_protection: decode_pair(OptionField::ReadProtection, low(raw[0]))
                .map(ReadProtection::from),
            user: decode_pair(OptionField::User, high(raw[0])).map(UserConfig),
            data0: decode_pair(OptionField::Data0, low(raw[1])),
            data1: decode_pair(OptionField::Data1, high(raw[1])),
            write_protection: [
                decode_pair(OptionField::WriteProtection(0), low(raw[2])),
                decode_pair(OptionField::WriteProtection(1), high(raw[2])),
                decode_pair(OptionField::WriteProtection(2), low(raw[3])),
                decode_pair(OptionField::WriteProtection(3), high(raw[3])),
            ],
        }
    }

    /// Every field that failed its complement check.
    pub fn errors(&self) -> Vec<InvalidOptionByte> {
        let mut errors = Vec::new();
        if let Err(e) = self.read_protection {
            errors.push(e);
        }
        if let Err(e) = self.user {
            errors.push(e);
        }
        for field in [&self.data0, &self.data1].into_iter().chain(&self.write_protection) {
            if let Err(e) = field {
                errors.push(*e);
            }
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }
}

impl fmt::Display for OptionBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read_protection {
            Ok(ReadProtection::Disabled) => writeln!(f, "Read protection disabled")?,
            Ok(ReadProtection::Enabled(_)) => writeln!(f, "Read protection enabled")?,
            Err(e) => writeln!(f, "{}", e)?,
        }

        match self.user {
            Ok(user) => {
                if user.iwdg_disabled_by_hardware() {
                    writeln!(f, "Independent watchdog is disabled by hardware")?;
                } else {
                    writeln!(f, "Independent watchdog is not disabled by hardware")?;
                }
                if user.reset_on_stop() {
                    writeln!(f, "System will reset when entering stop mode")?;
                } else {
                    writeln!(f, "System will not reset when entering stop mode")?;
                }
                if user.reset_on_standby() {
                    writeln!(f, "System is reset when entering standby mode")?;
                } else {
                    writeln!(f, "System is not reset when entering standby mode")?;
                }
                writeln!(f, "RAM code mode: {:02X}", user.ram_code_mode())?;
            }
            Err(e) => writeln!(f, "{}", e)?,
        }

        for (name, field) in [("User data 0", &self.data0), ("User data 1", &self.data1)] {
            match field {
                Ok(v) => writeln!(f, "{}: 0x{:02x}", name, v)?,
                Err(e) => writeln!(f, "{}", e)?,
            }
        }
        for (n, field) in self.write_protection.iter().enumerate() {
            match field {
                Ok(v) => writeln!(f, "Write protection {}: 0x{:02x}", n, v)?,
                Err(e) => writeln!(f, "{}", e)?,
            }
        }
        Ok(())
    }
}

impl<T: RvswdTransport, D: Delay> Target<T, D> {
    /// Read and decode the option bytes block. The core must be halted.
    pub fn read_option_bytes(&mut self) -> Result<OptionBytes, ProgrammerError> {
        let mut raw = [0u32; OPTION_BYTES_WORDS];
        for (i, word) in raw.iter_mut().enumerate() {
            *word = self.read_memory_word(OPTION_BYTES_ADDR + (i * 4) as u32)?;
        }

        let decoded = OptionBytes::decode(raw);
        for e in decoded.errors() {
            warn!("{}", e);
        }
        info!(
            raw = %format!("{:08X?}", raw),
            valid = decoded.is_valid(),
            "Option bytes read"
        );
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::tests::RecordingDelay;
    use crate::transport::SimulatedTarget;

    #[test]
    fn test_pair_with_zero_complement_is_invalid() {
        let err = decode_pair(OptionField::Data0, low(0x00A5_005A)).unwrap_err();
        assert_eq!(
            err,
            InvalidOptionByte {
                field: OptionField::Data0,
                value: 0x5A,
                complement: 0x00
            }
        );
    }

    #[test]
    fn test_pair_with_matching_complement() {
        assert_eq!(decode_pair(OptionField::Data0, 0xA55A), Ok(0x5A));
        assert_eq!(decode_pair(OptionField::Data1, high(0xA55A_0000)), Ok(0x5A));
    }

    #[test]
    fn test_decode_factory_defaults() {
        let ob = OptionBytes::decode([0x00FF_5AA5, 0x00FF_00FF, 0x00FF_00FF, 0x00FF_00FF]);
        assert!(ob.is_valid());
        assert_eq!(ob.read_protection, Ok(ReadProtection::Disabled));
        let user = ob.user.unwrap();
        assert!(user.iwdg_disabled_by_hardware());
        assert!(!user.reset_on_stop());
        assert!(!user.reset_on_standby());
        assert_eq!(user.ram_code_mode(), 0b11);
        assert_eq!(ob.data0, Ok(0xFF));
        assert_eq!(ob.write_protection, [Ok(0xFF); 4]);
    }

    #[test]
    fn test_decode_reports_every_invalid_field() {
        let ob = OptionBytes::decode([0x00FF_0000, 0xFFFF_00FF, 0x00FF_00FF, 0x1234_00FF]);
        let fields: Vec<OptionField> = ob.errors().iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                OptionField::ReadProtection,
                OptionField::Data1,
                OptionField::WriteProtection(3)
            ]
        );
        assert!(!ob.is_valid());
    }

    #[test]
    fn test_read_protection_enabled() {
        let ob = OptionBytes::decode([0x00FF_FF00, 0, 0, 0]);
        assert_eq!(ob.read_protection, Ok(ReadProtection::Enabled(0x00)));
    }

    #[test]
    fn test_display_mentions_invalid_field() {
        let ob = OptionBytes::decode([0x00FF_5AA5, 0x00FF_00FF, 0x00FF_00FF, 0x0000_00FF]);
        let text = ob.to_string();
        assert!(text.contains("Read protection disabled"));
        assert!(text.contains("Invalid write protection 3 0x00 0x00"));
    }

    #[test]
    fn test_read_from_target() {
        let mut sim = SimulatedTarget::halted();
        sim.set_option_bytes([0x00FF_5AA5, 0xA55A_00FF, 0x00FF_00FF, 0x00FF_00FF]);
        let mut delay = RecordingDelay::default();
        let ob = Target::new(&mut sim, &mut delay)
            .read_option_bytes()
            .unwrap();
        assert_eq!(ob.data1, Ok(0x5A));
        assert!(ob.is_valid());
    }
}
