mod crc;
mod frame;
mod pdu;

pub use crc::{checksum, Crc16};
pub use frame::{
    decode_rtu, decode_tcp, encode_rtu, encode_tcp, predicted_reply_len, MBAP_HEADER_SIZE,
    RTU_EXCEPTION_SIZE, RTU_MAX_SIZE, RTU_MIN_SIZE,
};
pub use pdu::{
    Pdu, EXCEPTION_FLAG, EXC_SERVER_DEVICE_BUSY, EXC_SERVER_DEVICE_FAILURE, FUNC_MASK_WRITE_REGISTER,
    FUNC_READ_COILS, FUNC_READ_DISCRETE_INPUTS, FUNC_READ_FIFO_QUEUE, FUNC_READ_HOLDING_REGISTERS,
    FUNC_READ_INPUT_REGISTERS, FUNC_READ_WRITE_MULTIPLE_REGISTERS, FUNC_WRITE_MULTIPLE_COILS,
    FUNC_WRITE_MULTIPLE_REGISTERS, FUNC_WRITE_SINGLE_COIL, FUNC_WRITE_SINGLE_REGISTER,
};
