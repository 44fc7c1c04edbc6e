//! Sphero V1 packet framing
//!
//! ```text
//! Command:  FF SOP2 DID CID SEQ DLEN <data..> CHK        DLEN = data + 1
//! Sync ack: FF FF   MRSP SEQ DLEN <data..> CHK
//! Async:    FF FE   ID  DLEN_MSB DLEN_LSB <data..> CHK   DLEN = data + 1
//! ```
//!
//! CHK is the bit-inverted modulo-256 sum of every byte after SOP2 up to
//! and including the last data byte.

use super::{
    AsyncEventType, CommandFrame, DecodeError, DeviceInfoType, FrameKind, ResponseFrame,
    ASYNC_POWER_NOTIFICATION,
};
use bytes::Bytes;

/// First start-of-packet byte, always 0xFF
pub const SOP1: u8 = 0xFF;

/// SOP2 for commands: answer requested + reset inactivity timeout
pub const SOP2_COMMAND: u8 = 0xFF;

/// SOP2 marking a synchronous response
pub const SOP2_SYNC: u8 = 0xFF;

/// SOP2 marking an asynchronous packet
pub const SOP2_ASYNC: u8 = 0xFE;

/// Smallest valid sync frame (no data)
const MIN_SYNC_LEN: usize = 6;

/// Smallest valid async frame (no data)
const MIN_ASYNC_LEN: usize = 6;

/// Largest data section a command can carry (DLEN is one byte)
pub const MAX_COMMAND_DATA: usize = 254;

/// Compute the packet checksum over `bytes`
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode a command frame into `output`
///
/// Clears `output` first. Payloads longer than `MAX_COMMAND_DATA` are a
/// programming error in the command encoder and are truncated.
pub fn encode_command_into(frame: &CommandFrame, output: &mut Vec<u8>) {
    let data = &frame.payload[..frame.payload.len().min(MAX_COMMAND_DATA)];

    output.clear();
    output.reserve(data.len() + 7);
    output.push(SOP1);
    output.push(SOP2_COMMAND);
    output.push(frame.opcode.device);
    output.push(frame.opcode.command);
    output.push(frame.sequence);
    output.push(data.len() as u8 + 1);
    output.extend_from_slice(data);
    let chk = checksum(&output[2..]);
    output.push(chk);
}

/// Encode a command frame into a fresh buffer
pub fn encode_command(frame: &CommandFrame) -> Bytes {
    let mut output = Vec::with_capacity(frame.payload.len() + 7);
    encode_command_into(frame, &mut output);
    Bytes::from(output)
}

/// Decode one inbound notification into a response frame
///
/// Every notification must hold exactly one complete frame.
pub fn decode_frame(data: &[u8]) -> Result<ResponseFrame, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::Truncated {
            expected: MIN_SYNC_LEN,
            actual: data.len(),
        });
    }

    match (data[0], data[1]) {
        (SOP1, SOP2_SYNC) => decode_sync(data),
        (SOP1, SOP2_ASYNC) => decode_async(data),
        (a, b) => Err(DecodeError::BadStartOfPacket(a, b)),
    }
}

fn decode_sync(data: &[u8]) -> Result<ResponseFrame, DecodeError> {
    if data.len() < MIN_SYNC_LEN {
        return Err(DecodeError::Truncated {
            expected: MIN_SYNC_LEN,
            actual: data.len(),
        });
    }

    let code = data[2];
    let sequence = data[3];
    let dlen = data[4] as usize;
    // DLEN includes the checksum byte
    if dlen == 0 || data.len() != 5 + dlen {
        return Err(DecodeError::LengthMismatch {
            declared: dlen,
            actual: data.len().saturating_sub(5),
        });
    }

    verify_checksum(data)?;

    Ok(ResponseFrame {
        kind: FrameKind::SyncAck { sequence, code },
        payload: Bytes::copy_from_slice(&data[5..data.len() - 1]),
    })
}

fn decode_async(data: &[u8]) -> Result<ResponseFrame, DecodeError> {
    if data.len() < MIN_ASYNC_LEN {
        return Err(DecodeError::Truncated {
            expected: MIN_ASYNC_LEN,
            actual: data.len(),
        });
    }

    let id = data[2];
    let dlen = u16::from_be_bytes([data[3], data[4]]) as usize;
    if dlen == 0 || data.len() != 5 + dlen {
        return Err(DecodeError::LengthMismatch {
            declared: dlen,
            actual: data.len().saturating_sub(5),
        });
    }

    verify_checksum(data)?;

    let kind = match id {
        ASYNC_POWER_NOTIFICATION => FrameKind::DeviceInfo(DeviceInfoType::PowerNotification),
        other => FrameKind::AsyncEvent(AsyncEventType::from_id(other)),
    };

    Ok(ResponseFrame {
        kind,
        payload: Bytes::copy_from_slice(&data[5..data.len() - 1]),
    })
}

fn verify_checksum(data: &[u8]) -> Result<(), DecodeError> {
    let expected = checksum(&data[2..data.len() - 1]);
    let actual = data[data.len() - 1];
    if expected != actual {
        return Err(DecodeError::BadChecksum { expected, actual });
    }
    Ok(())
}

/// Build a sync response frame (device side)
///
/// Used by the simulated peripheral and by tests.
pub fn encode_sync_response(code: u8, sequence: u8, data: &[u8]) -> Bytes {
    let mut output = Vec::with_capacity(data.len() + 6);
    output.extend_from_slice(&[SOP1, SOP2_SYNC, code, sequence, data.len() as u8 + 1]);
    output.extend_from_slice(data);
    let chk = checksum(&output[2..]);
    output.push(chk);
    Bytes::from(output)
}

/// Build an async frame (device side)
pub fn encode_async(id: u8, data: &[u8]) -> Bytes {
    let dlen = (data.len() + 1) as u16;
    let mut output = Vec::with_capacity(data.len() + 6);
    output.extend_from_slice(&[SOP1, SOP2_ASYNC, id]);
    output.extend_from_slice(&dlen.to_be_bytes());
    output.extend_from_slice(data);
    let chk = checksum(&output[2..]);
    output.push(chk);
    Bytes::from(output)
}

/// Parse a command frame (device side)
///
/// Returns the frame together with whether an answer was requested.
pub fn decode_command(data: &[u8]) -> Result<(CommandFrame, bool), DecodeError> {
    if data.len() < 7 {
        return Err(DecodeError::Truncated {
            expected: 7,
            actual: data.len(),
        });
    }
    if data[0] != SOP1 || data[1] & 0xFC != 0xFC {
        return Err(DecodeError::BadStartOfPacket(data[0], data[1]));
    }

    let dlen = data[5] as usize;
    if dlen == 0 || data.len() != 6 + dlen {
        return Err(DecodeError::LengthMismatch {
            declared: dlen,
            actual: data.len().saturating_sub(6),
        });
    }
    verify_checksum(data)?;

    let frame = CommandFrame {
        sequence: data[4],
        opcode: super::Opcode {
            device: data[2],
            command: data[3],
        },
        payload: Bytes::copy_from_slice(&data[6..data.len() - 1]),
    };
    Ok((frame, data[1] & 0x01 != 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Opcode;

    #[test]
    fn test_checksum_matches_reference_ping() {
        // Ping with SEQ=0x52: FF FF 00 01 52 01 AB
        let frame = CommandFrame {
            sequence: 0x52,
            opcode: Opcode {
                device: 0x00,
                command: 0x01,
            },
            payload: Bytes::new(),
        };
        let bytes = encode_command(&frame);
        assert_eq!(bytes.as_ref(), &[0xFF, 0xFF, 0x00, 0x01, 0x52, 0x01, 0xAB]);
    }

    #[test]
    fn test_encode_command_with_payload() {
        let frame = CommandFrame {
            sequence: 7,
            opcode: Opcode {
                device: 0x02,
                command: 0x21,
            },
            payload: Bytes::from_static(&[0xFF]),
        };
        let bytes = encode_command(&frame);
        assert_eq!(&bytes[..7], &[0xFF, 0xFF, 0x02, 0x21, 7, 2, 0xFF]);
        assert_eq!(bytes[7], checksum(&bytes[2..7]));
    }

    #[test]
    fn test_encode_into_clears_output() {
        let frame = CommandFrame {
            sequence: 1,
            opcode: Opcode {
                device: 0x00,
                command: 0x01,
            },
            payload: Bytes::new(),
        };
        let mut output = vec![0xAA; 32];
        encode_command_into(&frame, &mut output);
        assert_eq!(output.len(), 7);
        assert_eq!(output[0], SOP1);
    }

    #[test]
    fn test_decode_sync_ack() {
        let raw = encode_sync_response(0x00, 9, &[0x01, 0x02]);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.kind, FrameKind::SyncAck { sequence: 9, code: 0 });
        assert_eq!(frame.payload.as_ref(), &[0x01, 0x02]);
    }

    #[test]
    fn test_decode_async_collision() {
        let raw = encode_async(0x07, &[0u8; 16]);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.kind, FrameKind::AsyncEvent(AsyncEventType::Collision));
        assert_eq!(frame.payload.len(), 16);
    }

    #[test]
    fn test_decode_power_notification_is_device_info() {
        let raw = encode_async(0x01, &[0x02]);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(
            frame.kind,
            FrameKind::DeviceInfo(DeviceInfoType::PowerNotification)
        );
    }

    #[test]
    fn test_decode_unknown_async_id() {
        let raw = encode_async(0x42, &[]);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(
            frame.kind,
            FrameKind::AsyncEvent(AsyncEventType::Other(0x42))
        );
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut raw = encode_sync_response(0x00, 1, &[0x10]).to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        assert!(matches!(
            decode_frame(&raw),
            Err(DecodeError::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let raw = encode_sync_response(0x00, 1, &[0x10, 0x20]);
        assert!(matches!(
            decode_frame(&raw[..raw.len() - 1]),
            Err(DecodeError::LengthMismatch { .. })
        ));
        assert!(matches!(
            decode_frame(&[0xFF]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_start_of_packet() {
        assert_eq!(
            decode_frame(&[0x00, 0xFF, 0x00, 0x01, 0x01, 0xFE]),
            Err(DecodeError::BadStartOfPacket(0x00, 0xFF))
        );
    }

    #[test]
    fn test_decode_command_device_side() {
        let frame = CommandFrame {
            sequence: 200,
            opcode: Opcode {
                device: 0x02,
                command: 0x30,
            },
            payload: Bytes::from_static(&[0x80, 0x00, 0x5A, 0x01]),
        };
        let bytes = encode_command(&frame);
        let (decoded, answer) = decode_command(&bytes).unwrap();
        assert!(answer);
        assert_eq!(decoded, frame);
    }
}
