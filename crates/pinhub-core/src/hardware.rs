//! # HARDWARE Body Grammar
//!
//! HARDWARE bodies are NUL-separated fields: `op \0 pin [\0 value ...]`.
//!
//! ```text
//!  "vw\09\042"  ──►  VirtualWrite { pin: 9, value: "42" }
//!  "vr\0V9"     ──►  VirtualRead  { pin: 9 }
//! ```
//!
//! Trailing empty fields are ignored, so `"vr\09\0"` reads pin 9 and
//! `"vw\09\0"` is missing its value.

use bytes::Bytes;

use crate::error::CommandError;
use crate::types::VirtualPin;

/// Field separator inside HARDWARE bodies.
pub const FIELD_SEPARATOR: char = '\0';

/// Value returned for a pin with no known value.
pub const DEFAULT_PIN_VALUE: &str = "0";

/// A parsed HARDWARE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCommand {
    VirtualWrite { pin: VirtualPin, value: String },
    VirtualRead { pin: VirtualPin },
}

impl HardwareCommand {
    /// Parses a HARDWARE body.
    ///
    /// ## Errors
    /// - fewer than two fields, bad pin, missing value: `IllegalBody`
    /// - unknown operation: `IllegalCommand`
    pub fn parse(body: &[u8]) -> Result<Self, CommandError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| CommandError::IllegalBody("body is not valid UTF-8".into()))?;

        let fields = split_fields(text);
        if fields.len() < 2 {
            return Err(CommandError::IllegalBody(format!(
                "expected at least 2 fields, got {}",
                fields.len()
            )));
        }

        match fields[0] {
            "vw" => {
                let pin = parse_pin(fields[1])?;
                let value = fields
                    .get(2)
                    .ok_or_else(|| CommandError::IllegalBody("vw without a value".into()))?;
                Ok(HardwareCommand::VirtualWrite {
                    pin,
                    value: (*value).to_string(),
                })
            }
            "vr" => Ok(HardwareCommand::VirtualRead {
                pin: parse_pin(fields[1])?,
            }),
            other => Err(CommandError::IllegalCommand(format!(
                "unknown hardware operation '{}'",
                other
            ))),
        }
    }

    /// Returns the pin this command targets.
    pub fn pin(&self) -> VirtualPin {
        match self {
            HardwareCommand::VirtualWrite { pin, .. } | HardwareCommand::VirtualRead { pin } => *pin,
        }
    }
}

/// Builds the `vw\0<pin>\0<value>` body used for reads and pushes.
pub fn write_body(pin: VirtualPin, value: &str) -> Bytes {
    Bytes::from(format!(
        "vw{sep}{pin}{sep}{value}",
        sep = FIELD_SEPARATOR,
        pin = pin,
        value = value
    ))
}

fn split_fields(text: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

fn parse_pin(field: &str) -> Result<VirtualPin, CommandError> {
    field
        .parse::<VirtualPin>()
        .map_err(|e| CommandError::IllegalBody(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(n: u8) -> VirtualPin {
        VirtualPin::new(n).unwrap()
    }

    #[test]
    fn test_parse_write() {
        assert_eq!(
            HardwareCommand::parse(b"vw\x009\x0042").unwrap(),
            HardwareCommand::VirtualWrite {
                pin: pin(9),
                value: "42".into()
            }
        );
        assert_eq!(
            HardwareCommand::parse(b"vw\x00V10\x00hello world").unwrap(),
            HardwareCommand::VirtualWrite {
                pin: pin(10),
                value: "hello world".into()
            }
        );
    }

    #[test]
    fn test_parse_read() {
        assert_eq!(
            HardwareCommand::parse(b"vr\x009").unwrap(),
            HardwareCommand::VirtualRead { pin: pin(9) }
        );
        assert_eq!(
            HardwareCommand::parse(b"vr\x00v3\x00").unwrap(),
            HardwareCommand::VirtualRead { pin: pin(3) }
        );
    }

    #[test]
    fn test_too_few_fields() {
        assert!(matches!(
            HardwareCommand::parse(b"vw"),
            Err(CommandError::IllegalBody(_))
        ));
        assert!(matches!(
            HardwareCommand::parse(b""),
            Err(CommandError::IllegalBody(_))
        ));
        assert!(matches!(
            HardwareCommand::parse(b"vr\x00\x00"),
            Err(CommandError::IllegalBody(_))
        ));
    }

    #[test]
    fn test_write_without_value() {
        assert!(matches!(
            HardwareCommand::parse(b"vw\x009"),
            Err(CommandError::IllegalBody(_))
        ));
        assert!(matches!(
            HardwareCommand::parse(b"vw\x009\x00"),
            Err(CommandError::IllegalBody(_))
        ));
    }

    #[test]
    fn test_bad_pin() {
        for body in [
            &b"vw\x00x\x001"[..],
            &b"vr\x00128"[..],
            &b"vr\x00V"[..],
            &b"vw\x00\x003"[..],
        ] {
            assert!(
                matches!(HardwareCommand::parse(body), Err(CommandError::IllegalBody(_))),
                "{:?}",
                body
            );
        }
    }

    #[test]
    fn test_unknown_operation() {
        assert!(matches!(
            HardwareCommand::parse(b"dw\x001\x001"),
            Err(CommandError::IllegalCommand(_))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            HardwareCommand::parse(&[b'v', b'w', 0, 0xff, 0, b'1']),
            Err(CommandError::IllegalBody(_))
        ));
    }

    #[test]
    fn test_write_body() {
        assert_eq!(&write_body(pin(9), "42")[..], b"vw\x009\x0042");
        assert_eq!(&write_body(pin(0), "0")[..], b"vw\x000\x000");
    }
}
