//! Modbus PDU: function code plus data, independent of the wire framing
//! it travels in (RTU or TCP/MBAP — see [`super::frame`]).

use crate::errors::{FrameError, FrameFormatKind};

pub const FUNC_READ_COILS: u8 = 0x01;
pub const FUNC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FUNC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FUNC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FUNC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FUNC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FUNC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;
pub const FUNC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FUNC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FUNC_MASK_WRITE_REGISTER: u8 = 0x16;
pub const FUNC_READ_FIFO_QUEUE: u8 = 0x18;

pub const EXCEPTION_FLAG: u8 = 0x80;

/// Codes this gateway synthesises itself, as opposed to forwarding from a slave.
pub const EXC_SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const EXC_SERVER_DEVICE_BUSY: u8 = 0x06;

/// The unit of work throughout the gateway: a slave id, a function code, and
/// a data payload. `data` never exceeds 252 bytes for a well-formed PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub slave_id: u8,
    pub function_code: u8,
    pub data: Vec<u8>,
}

impl Pdu {
    pub fn new(slave_id: u8, function_code: u8, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function_code,
            data,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }

    /// Builds the exception PDU `{function_code | 0x80, [code]}` for the
    /// request this replies to.
    pub fn exception(request: &Pdu, code: u8) -> Self {
        Self {
            slave_id: request.slave_id,
            function_code: request.function_code | EXCEPTION_FLAG,
            data: vec![code],
        }
    }

    // ---- constructors -----------------------------------------------------

    pub fn read_coils(slave_id: u8, addr: u16, count: u16) -> Self {
        Self::read_request(slave_id, FUNC_READ_COILS, addr, count)
    }

    pub fn read_discrete_inputs(slave_id: u8, addr: u16, count: u16) -> Self {
        Self::read_request(slave_id, FUNC_READ_DISCRETE_INPUTS, addr, count)
    }

    pub fn read_holding_registers(slave_id: u8, addr: u16, count: u16) -> Self {
        Self::read_request(slave_id, FUNC_READ_HOLDING_REGISTERS, addr, count)
    }

    pub fn read_input_registers(slave_id: u8, addr: u16, count: u16) -> Self {
        Self::read_request(slave_id, FUNC_READ_INPUT_REGISTERS, addr, count)
    }

    fn read_request(slave_id: u8, function_code: u8, addr: u16, count: u16) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(&count.to_be_bytes());
        Self::new(slave_id, function_code, data)
    }

    pub fn write_single_coil(slave_id: u8, addr: u16, on: bool) -> Self {
        let value: u16 = if on { 0xFF00 } else { 0x0000 };
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(&value.to_be_bytes());
        Self::new(slave_id, FUNC_WRITE_SINGLE_COIL, data)
    }

    pub fn write_single_register(slave_id: u8, addr: u16, value: u16) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(&value.to_be_bytes());
        Self::new(slave_id, FUNC_WRITE_SINGLE_REGISTER, data)
    }

    pub fn write_multiple_coils(slave_id: u8, addr: u16, count: u16, bits: &[bool]) -> Self {
        let byte_count = ((count as usize) + 7) / 8;
        let mut packed = vec![0u8; byte_count];
        for (i, &bit) in bits.iter().take(count as usize).enumerate() {
            if bit {
                packed[i / 8] |= 1 << (i % 8);
            }
        }

        let mut data = Vec::with_capacity(5 + byte_count);
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(&count.to_be_bytes());
        data.push(byte_count as u8);
        data.extend_from_slice(&packed);
        Self::new(slave_id, FUNC_WRITE_MULTIPLE_COILS, data)
    }

    pub fn write_multiple_registers(slave_id: u8, addr: u16, values: &[u16]) -> Self {
        let mut data = Vec::with_capacity(5 + values.len() * 2);
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(&(values.len() as u16).to_be_bytes());
        data.push((values.len() * 2) as u8);
        for v in values {
            data.extend_from_slice(&v.to_be_bytes());
        }
        Self::new(slave_id, FUNC_WRITE_MULTIPLE_REGISTERS, data)
    }

    // ---- response decoders --------------------------------------------------

    /// Decodes a read-coils/read-discrete-inputs reply into one bool per coil.
    pub fn decode_coils(&self) -> Result<Vec<bool>, FrameError> {
        let byte_count = *self.data.first().ok_or_else(|| too_short("coil response"))? as usize;
        let bits = self
            .data
            .get(1..1 + byte_count)
            .ok_or_else(|| too_short("coil response"))?;
        let count = byte_count * 8;
        Ok((0..count)
            .map(|i| (bits[i / 8] >> (i % 8)) & 1 != 0)
            .collect())
    }

    /// Decodes a read-registers reply into `data[0]/2` big-endian u16 values.
    pub fn decode_registers(&self) -> Result<Vec<u16>, FrameError> {
        let byte_count = *self.data.first().ok_or_else(|| too_short("register response"))? as usize;
        let payload = self
            .data
            .get(1..1 + byte_count)
            .ok_or_else(|| too_short("register response"))?;
        Ok(payload
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }
}

fn too_short(what: &str) -> FrameError {
    FrameError::Format {
        kind: FrameFormatKind::InvalidFormat,
        details: format!("{what} shorter than its own byte count"),
        frame_data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_single_coil_encodes_on_off() {
        let on = Pdu::write_single_coil(1, 3, true);
        assert_eq!(&on.data, &[0x00, 0x03, 0xFF, 0x00]);
        let off = Pdu::write_single_coil(1, 3, false);
        assert_eq!(&off.data, &[0x00, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn write_multiple_coils_packs_lsb_first() {
        // coil 0 = 0, coil 1 = 1, coil 2 = 1 -> byte 0b0000_0110 = 0x06
        let pdu = Pdu::write_multiple_coils(1, 2, 3, &[false, true, true]);
        assert_eq!(pdu.data[4], 0x06);
    }

    #[test]
    fn decode_registers_round_trips_byte_count() {
        let pdu = Pdu {
            slave_id: 1,
            function_code: FUNC_READ_HOLDING_REGISTERS,
            data: vec![0x04, 0x00, 0x19, 0x00, 0x00],
        };
        assert_eq!(pdu.decode_registers().unwrap(), vec![25, 0]);
    }

    #[test]
    fn exception_sets_high_bit_and_single_byte_data() {
        let req = Pdu::read_holding_registers(1, 0, 1);
        let exc = Pdu::exception(&req, EXC_SERVER_DEVICE_BUSY);
        assert_eq!(exc.function_code, FUNC_READ_HOLDING_REGISTERS | EXCEPTION_FLAG);
        assert_eq!(exc.data, vec![EXC_SERVER_DEVICE_BUSY]);
        assert!(exc.is_exception());
    }
}
