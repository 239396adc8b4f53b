//! Wire framing: PDU ⇄ RTU ADU (CRC-16 framed) and PDU ⇄ TCP ADU (MBAP framed).

use super::crc::{checksum, Crc16};
use super::pdu::{
    Pdu, FUNC_MASK_WRITE_REGISTER, FUNC_READ_COILS, FUNC_READ_DISCRETE_INPUTS,
    FUNC_READ_FIFO_QUEUE, FUNC_READ_HOLDING_REGISTERS, FUNC_READ_INPUT_REGISTERS,
    FUNC_READ_WRITE_MULTIPLE_REGISTERS, FUNC_WRITE_MULTIPLE_COILS, FUNC_WRITE_MULTIPLE_REGISTERS,
    FUNC_WRITE_SINGLE_COIL, FUNC_WRITE_SINGLE_REGISTER,
};
use crate::errors::{FrameError, FrameFormatKind, FrameSizeKind};

pub const RTU_MIN_SIZE: usize = 4;
pub const RTU_MAX_SIZE: usize = 256;
pub const RTU_EXCEPTION_SIZE: usize = 5;
pub const MBAP_HEADER_SIZE: usize = 7;

/// `slave_id ‖ function_code ‖ data ‖ CRC_LE`. Fails if the assembled frame
/// would exceed [`RTU_MAX_SIZE`].
pub fn encode_rtu(pdu: &Pdu) -> Result<Vec<u8>, FrameError> {
    let len = 2 + pdu.data.len() + 2;
    if len > RTU_MAX_SIZE {
        return Err(FrameError::Size {
            kind: FrameSizeKind::TooLong,
            details: format!("RTU frame of {len} bytes exceeds {RTU_MAX_SIZE}"),
            frame_data: None,
        });
    }

    let mut frame = Vec::with_capacity(len);
    frame.push(pdu.slave_id);
    frame.push(pdu.function_code);
    frame.extend_from_slice(&pdu.data);

    let crc = checksum(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Requires `frame.len() >= 4`, validates the trailing CRC, returns the PDU.
pub fn decode_rtu(frame: &[u8]) -> Result<Pdu, FrameError> {
    if frame.len() < RTU_MIN_SIZE {
        return Err(FrameError::Size {
            kind: FrameSizeKind::TooShort,
            details: format!("RTU frame of {} bytes is below the {RTU_MIN_SIZE} minimum", frame.len()),
            frame_data: Some(frame.to_vec()),
        });
    }

    let body_len = frame.len() - 2;
    let calculated = checksum(&frame[..body_len]);
    let received = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);

    if calculated != received {
        return Err(FrameError::Crc {
            calculated,
            received,
            frame_hex: hex::encode(&frame[..body_len]),
        });
    }

    Ok(Pdu::new(
        frame[0],
        frame[1],
        frame[2..body_len].to_vec(),
    ))
}

/// 7-byte MBAP header followed by unit id, function code, and data.
pub fn encode_tcp(pdu: &Pdu, transaction_id: u16) -> Vec<u8> {
    let mut adu = Vec::with_capacity(MBAP_HEADER_SIZE + 2 + pdu.data.len());
    adu.extend_from_slice(&transaction_id.to_be_bytes());
    adu.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    let length = (1 + 1 + pdu.data.len()) as u16;
    adu.extend_from_slice(&length.to_be_bytes());
    adu.push(pdu.slave_id);
    adu.push(pdu.function_code);
    adu.extend_from_slice(&pdu.data);
    adu
}

/// Parses a complete MBAP ADU (header already known-complete). Returns the
/// transaction id and decoded PDU, or `LengthMismatch`-flavoured errors.
pub fn decode_tcp(adu: &[u8]) -> Result<(u16, Pdu), FrameError> {
    if adu.len() < MBAP_HEADER_SIZE + 2 {
        return Err(FrameError::Size {
            kind: FrameSizeKind::TooShort,
            details: format!("TCP ADU of {} bytes is below the minimum header+pdu size", adu.len()),
            frame_data: Some(adu.to_vec()),
        });
    }

    let transaction_id = u16::from_be_bytes([adu[0], adu[1]]);
    // Protocol-id validation happens one layer up (see `modbus_relay::handle_client`),
    // which classifies it as a protocol error rather than a framing error.
    let length = u16::from_be_bytes([adu[4], adu[5]]) as usize;
    let body_len = adu.len() - MBAP_HEADER_SIZE;
    if length == 0 || body_len != length - 1 {
        return Err(FrameError::Format {
            kind: FrameFormatKind::InvalidFormat,
            details: format!(
                "length field {length} does not match delivered body of {body_len} bytes"
            ),
            frame_data: Some(adu.to_vec()),
        });
    }

    let slave_id = adu[6];
    let function_code = adu[7];
    let data = adu[8..].to_vec();
    Ok((transaction_id, Pdu::new(slave_id, function_code, data)))
}

/// Predicts the total RTU reply length (slave_id + fc + data + crc) for a
/// request RTU frame, so the serial reader knows when a good reply is
/// complete. `count` is read from bytes 4–5 of `request` (big-endian).
pub fn predicted_reply_len(request: &[u8]) -> Option<usize> {
    if request.len() < 6 {
        return Some(RTU_MIN_SIZE);
    }
    let function = request[1];
    let count = u16::from_be_bytes([request[4], request[5]]) as usize;

    match function {
        FUNC_READ_COILS | FUNC_READ_DISCRETE_INPUTS => {
            Some(4 + 1 + (count + 7) / 8)
        }
        FUNC_READ_HOLDING_REGISTERS | FUNC_READ_INPUT_REGISTERS | FUNC_READ_WRITE_MULTIPLE_REGISTERS => {
            Some(4 + 1 + 2 * count)
        }
        FUNC_WRITE_SINGLE_COIL
        | FUNC_WRITE_SINGLE_REGISTER
        | FUNC_WRITE_MULTIPLE_COILS
        | FUNC_WRITE_MULTIPLE_REGISTERS => Some(4 + 4),
        FUNC_MASK_WRITE_REGISTER => Some(4 + 6),
        FUNC_READ_FIFO_QUEUE => None,
        _ => Some(RTU_MIN_SIZE),
    }
}

/// Re-derives the CRC accumulator a caller might want to extend incrementally
/// (e.g. framing bytes as they stream in) rather than recompute from scratch.
pub fn crc_over(data: &[u8]) -> Crc16 {
    let mut crc = Crc16::new();
    crc.push(data);
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::pdu::FUNC_WRITE_SINGLE_COIL;

    #[test]
    fn rtu_round_trip() {
        let pdu = Pdu::write_single_coil(1, 1, true);
        let frame = encode_rtu(&pdu).unwrap();
        assert_eq!(decode_rtu(&frame).unwrap(), pdu);
    }

    #[test]
    fn s1_crc_round_trip_and_tamper() {
        let frame = [0x01, 0x05, 0x00, 0x01, 0x01, 0x00, 0x9D, 0x9A];
        let pdu = decode_rtu(&frame).unwrap();
        assert_eq!(pdu.slave_id, 1);
        assert_eq!(pdu.function_code, FUNC_WRITE_SINGLE_COIL);
        assert_eq!(pdu.data, vec![0x00, 0x01, 0x01, 0x00]);

        let mut tampered = frame;
        tampered[0] = 0x02;
        assert!(matches!(decode_rtu(&tampered), Err(FrameError::Crc { .. })));
    }

    #[test]
    fn tcp_round_trip() {
        let pdu = Pdu::read_holding_registers(7, 10, 3);
        for tid in [0u16, 1, 65535] {
            let adu = encode_tcp(&pdu, tid);
            let (decoded_tid, decoded_pdu) = decode_tcp(&adu).unwrap();
            assert_eq!(decoded_tid, tid);
            assert_eq!(decoded_pdu, pdu);
        }
    }

    #[test]
    fn tcp_decode_rejects_length_mismatch() {
        let pdu = Pdu::read_holding_registers(7, 10, 3);
        let mut adu = encode_tcp(&pdu, 1);
        adu.push(0xFF); // trailing garbage byte not accounted for in length
        assert!(matches!(decode_tcp(&adu), Err(FrameError::Format { .. })));
    }

    #[test]
    fn predicted_length_for_read_coils() {
        let request = encode_rtu(&Pdu::read_coils(1, 0, 10)).unwrap();
        assert_eq!(predicted_reply_len(&request), Some(5 + (10 + 7) / 8));
    }

    #[test]
    fn predicted_length_for_fifo_is_unknown() {
        let request = [0x01, FUNC_READ_FIFO_QUEUE, 0x00, 0x00, 0x00, 0x01, 0, 0];
        assert_eq!(predicted_reply_len(&request), None);
    }
}
