//! Full device emulator for slave 100: a test double serving fc 1, 3, 5, 6,
//! 15, 16 from its own 65536-entry register and coil arrays (spec §4.4,
//! ported from `cmd/mb_gate/translators.go`'s `FakeTranslator`).

use std::sync::Mutex;

use super::Translator;
use crate::modbus::{
    Pdu, FUNC_READ_COILS, FUNC_READ_HOLDING_REGISTERS, FUNC_WRITE_MULTIPLE_COILS,
    FUNC_WRITE_MULTIPLE_REGISTERS, FUNC_WRITE_SINGLE_COIL, FUNC_WRITE_SINGLE_REGISTER,
};

const SPACE_SIZE: usize = 65_536;

struct State {
    registers: Vec<u16>,
    coils: Vec<bool>,
}

pub struct Emulator {
    state: Mutex<State>,
}

impl Emulator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                registers: vec![0; SPACE_SIZE],
                coils: vec![false; SPACE_SIZE],
            }),
        }
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

impl Translator for Emulator {
    fn translate(&self, pdu: &mut Pdu) -> bool {
        let mut state = self.state.lock().unwrap();

        match pdu.function_code {
            FUNC_WRITE_SINGLE_REGISTER => {
                let addr = u16_at(&pdu.data, 0) as usize;
                let value = u16_at(&pdu.data, 2);
                state.registers[addr] = value;
                true
            }

            FUNC_WRITE_MULTIPLE_REGISTERS => {
                let addr = u16_at(&pdu.data, 0) as usize;
                let count = u16_at(&pdu.data, 2) as usize;
                for i in 0..count {
                    state.registers[addr + i] = u16_at(&pdu.data, 5 + 2 * i);
                }
                true
            }

            FUNC_READ_HOLDING_REGISTERS => {
                let addr = u16_at(&pdu.data, 0) as usize;
                let count = u16_at(&pdu.data, 2) as usize;
                let mut data = Vec::with_capacity(1 + 2 * count);
                data.push((count * 2) as u8);
                for i in 0..count {
                    data.extend_from_slice(&state.registers[addr + i].to_be_bytes());
                }
                pdu.data = data;
                true
            }

            FUNC_WRITE_SINGLE_COIL => {
                let addr = u16_at(&pdu.data, 0) as usize;
                let value = u16_at(&pdu.data, 2);
                // fc 5 codifies 0xFF00 = on; any other value is treated as off (spec §9).
                state.coils[addr] = value == 0xFF00;
                true
            }

            FUNC_WRITE_MULTIPLE_COILS => {
                let addr = u16_at(&pdu.data, 0) as usize;
                let count = u16_at(&pdu.data, 2) as usize;
                let bits = &pdu.data[5..];
                for i in 0..count {
                    state.coils[addr + i] = (bits[i / 8] >> (i % 8)) & 1 != 0;
                }
                true
            }

            FUNC_READ_COILS => {
                let addr = u16_at(&pdu.data, 0) as usize;
                let count = u16_at(&pdu.data, 2) as usize;
                let byte_count = (count + 7) / 8;
                let mut data = vec![0u8; 1 + byte_count];
                data[0] = byte_count as u8;
                for i in 0..count {
                    if state.coils[addr + i] {
                        data[1 + i / 8] |= 1 << (i % 8);
                    }
                }
                pdu.data = data;
                true
            }

            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::Pdu;

    #[test]
    fn registers_round_trip_through_write_then_read() {
        let emu = Emulator::new();
        let mut write = Pdu::write_single_register(100, 42, 777);
        assert!(emu.translate(&mut write));

        let mut read = Pdu::read_holding_registers(100, 42, 1);
        assert!(emu.translate(&mut read));
        assert_eq!(read.decode_registers().unwrap(), vec![777]);
    }

    #[test]
    fn s8_coils_round_trip_through_write_multiple_then_read() {
        let emu = Emulator::new();
        let bits = [true, false, true, true, false];
        let mut write = Pdu::write_multiple_coils(100, 2, bits.len() as u16, &bits);
        assert!(emu.translate(&mut write));

        let mut read = Pdu::read_coils(100, 2, bits.len() as u16);
        assert!(emu.translate(&mut read));
        assert_eq!(read.decode_coils().unwrap()[..bits.len()], bits);
    }

    #[test]
    fn write_single_coil_treats_non_ff00_as_off() {
        let emu = Emulator::new();
        let mut on = Pdu::write_single_coil(100, 5, true);
        emu.translate(&mut on);
        let mut odd = Pdu {
            slave_id: 100,
            function_code: FUNC_WRITE_SINGLE_COIL,
            data: vec![0x00, 0x05, 0x12, 0x34],
        };
        emu.translate(&mut odd);

        let mut read = Pdu::read_coils(100, 5, 1);
        emu.translate(&mut read);
        assert_eq!(read.decode_coils().unwrap()[0], false);
    }

    #[test]
    fn unwritten_addresses_default_to_zero_value() {
        let emu = Emulator::new();
        let mut read = Pdu::read_holding_registers(100, 500, 2);
        assert!(emu.translate(&mut read));
        assert_eq!(read.decode_registers().unwrap(), vec![0, 0]);
    }
}
