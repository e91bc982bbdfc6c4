//! Serial frame parsing
//!
//! Splits the significant bytes of a serial frame into a [`LinId`] and its
//! [`Payload`]. Parsing has no side effects, committing the result is up to
//! the caller.

use crate::{Error, LinId, Payload, RawFrame, PAYLOAD_LEN};

/// A successfully parsed serial frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinFrame {
    /// The LIN frame identifier
    pub id: LinId,
    /// The data to publish for `id`
    pub payload: Payload,
}

/// Parse the significant bytes of a serial frame
///
/// No checksum or parity is validated. The id byte must be a plain
/// identifier in `0..=63`, anything else is an [`Error::MalformedFrame`].
pub fn parse(raw: &RawFrame) -> Result<LinFrame, Error> {
    let id = LinId::try_from(raw[0])?;

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&raw[1..]);
    Ok(LinFrame { id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_and_payload() {
        let raw = [0x32, 1, 2, 3, 4, 5, 6, 7, 8];
        let frame = parse(&raw).unwrap();
        assert_eq!(frame.id.get(), 0x32);
        assert_eq!(frame.payload, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn accepts_edges_of_id_space() {
        assert_eq!(parse(&[0; 9]).unwrap().id.get(), 0);
        assert_eq!(parse(&[63, 0xFF, 0, 0, 0, 0, 0, 0, 0]).unwrap().id, LinId::MAX);
    }

    #[test]
    fn rejects_out_of_range_id() {
        for id in [64u8, 0x80, 0xB4, 0xFF] {
            let raw = [id, 9, 9, 9, 9, 9, 9, 9, 9];
            assert_eq!(parse(&raw), Err(Error::MalformedFrame { id }));
        }
    }

    #[test]
    fn protected_ids_are_not_stripped() {
        // 0x32 with parity bits is 0xB2; it must not be folded back to 0x32
        assert_eq!(
            parse(&[0xB2, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(Error::MalformedFrame { id: 0xB2 })
        );
    }
}
