//! Shim for relay boards that treat register writes as "0x0100 = on,
//! 0x0200 = off" instead of a boolean (spec §4.4, the "simple Chinese" board;
//! ported from `cmd/mb_gate/translators.go`'s `SimpleChineese`).

use std::collections::HashMap;
use std::sync::Mutex;

use super::Translator;
use crate::modbus::{Pdu, FUNC_READ_HOLDING_REGISTERS, FUNC_WRITE_MULTIPLE_REGISTERS, FUNC_WRITE_SINGLE_REGISTER};

const ON: u16 = 0x0100;
const OFF: u16 = 0x0200;

fn on_off(value: u16) -> u16 {
    if value == 0 {
        OFF
    } else {
        ON
    }
}

pub struct RelayShim {
    registers: Mutex<HashMap<u16, u16>>,
}

impl RelayShim {
    pub fn new() -> Self {
        Self {
            registers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RelayShim {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator for RelayShim {
    fn translate(&self, pdu: &mut Pdu) -> bool {
        let mut registers = self.registers.lock().unwrap();

        match pdu.function_code {
            FUNC_WRITE_SINGLE_REGISTER => {
                let addr = u16::from_be_bytes([pdu.data[0], pdu.data[1]]);
                let value = u16::from_be_bytes([pdu.data[2], pdu.data[3]]);
                registers.insert(addr, value);
                pdu.data[2..4].copy_from_slice(&on_off(value).to_be_bytes());
                false
            }

            FUNC_WRITE_MULTIPLE_REGISTERS => {
                let addr = u16::from_be_bytes([pdu.data[0], pdu.data[1]]);
                let count = u16::from_be_bytes([pdu.data[2], pdu.data[3]]);
                for i in 0..count {
                    let offset = 5 + 2 * i as usize;
                    let value = u16::from_be_bytes([pdu.data[offset], pdu.data[offset + 1]]);
                    registers.insert(addr + i, value);
                    pdu.data[offset..offset + 2].copy_from_slice(&on_off(value).to_be_bytes());
                }
                false
            }

            FUNC_READ_HOLDING_REGISTERS => {
                let addr = u16::from_be_bytes([pdu.data[0], pdu.data[1]]);
                let count = u16::from_be_bytes([pdu.data[2], pdu.data[3]]);

                let mut data = Vec::with_capacity(1 + 2 * count as usize);
                data.push((count * 2) as u8);
                for i in 0..count {
                    let value = registers.get(&(addr + i)).copied().unwrap_or(0);
                    data.extend_from_slice(&value.to_be_bytes());
                }
                pdu.data = data;
                true
            }

            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::Pdu;

    #[test]
    fn s2_write_single_register_on_rewrites_to_0x0100() {
        let shim = RelayShim::new();
        let mut pdu = Pdu::write_single_register(5, 1, 25);
        assert!(!shim.translate(&mut pdu));
        assert_eq!(&pdu.data[2..4], &[0x01, 0x00]);
    }

    #[test]
    fn s3_write_single_register_off_rewrites_to_0x0200() {
        let shim = RelayShim::new();
        let mut pdu = Pdu::write_single_register(5, 1, 0);
        assert!(!shim.translate(&mut pdu));
        assert_eq!(&pdu.data[2..4], &[0x02, 0x00]);
    }

    #[test]
    fn s4_read_holding_registers_answers_from_shadow_map() {
        let shim = RelayShim::new();
        let mut write = Pdu::write_single_register(5, 1, 25);
        shim.translate(&mut write);

        let mut read = Pdu::read_holding_registers(5, 1, 2);
        assert!(shim.translate(&mut read));
        assert_eq!(read.data, vec![0x04, 0x00, 0x19, 0x00, 0x00]);
    }

    #[test]
    fn write_multiple_registers_remembers_and_rewrites_each() {
        let shim = RelayShim::new();
        let mut pdu = Pdu::write_multiple_registers(5, 10, &[7, 0]);
        assert!(!shim.translate(&mut pdu));
        assert_eq!(&pdu.data[5..7], &[0x01, 0x00]);
        assert_eq!(&pdu.data[7..9], &[0x02, 0x00]);

        let mut read = Pdu::read_holding_registers(5, 10, 2);
        assert!(shim.translate(&mut read));
        assert_eq!(read.data, vec![0x04, 0x00, 0x07, 0x00, 0x00]);
    }
}
