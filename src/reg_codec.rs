//! Encodes register read/write command sequences into the FTDI byte
//! stream and decodes the responses. 
use crate::byte_link::ByteLink;
use crate::error::{SigmaError, SigmaResult};
use crate::regs::{
    ADDR_HIGH, ADDR_INC, ADDR_LOW, DATA_HIGH_WRITE, DATA_LOW, DRAM_WAIT_ACK, READ_ADDR,
    REG_MEMROW, REG_TRIGGER_POS_LOW, ROW_LENGTH_BYTES, sel_bool,
};

/// Largest command frame `write_register` will build. Exceeding it is a
/// caller bug, not a transient I/O condition.
const MAX_FRAME_BYTES: usize = 80;

fn addr_preamble(reg: u8) -> [u8; 2] {
    [ADDR_LOW | (reg & 0x0F), ADDR_HIGH | ((reg >> 4) & 0x0F)]
}

/// Writes `data` to `reg`, one address preamble followed by one
/// (low, high) nibble pair per data byte.
///
/// # Errors
///
/// Returns [`SigmaError::BufferTooSmall`] if the encoded frame would
/// exceed [`MAX_FRAME_BYTES`]; this is a programming error, never an I/O
/// failure, and no bytes are written to the link in that case.
pub fn write_register<L: ByteLink>(link: &mut L, reg: u8, data: &[u8]) -> SigmaResult<()> {
    let needed = 2 * data.len() + 2;
    if needed > MAX_FRAME_BYTES {
        return Err(SigmaError::BufferTooSmall { needed, available: MAX_FRAME_BYTES });
    }

    let mut frame = Vec::with_capacity(needed);
    frame.extend_from_slice(&addr_preamble(reg));
    for &byte in data {
        frame.push(DATA_LOW | (byte & 0x0F));
        frame.push(DATA_HIGH_WRITE | ((byte >> 4) & 0x0F));
    }
    debug_assert_eq!(frame.len(), needed);

    link.write(&frame)
}

/// Convenience wrapper over [`write_register`] for a single byte.
pub fn set_register<L: ByteLink>(link: &mut L, reg: u8, value: u8) -> SigmaResult<()> {
    write_register(link, reg, &[value])
}

/// Reads `buf.len()` bytes from `reg`. Multi-byte reads rely on the
/// caller driving address auto-increment separately (see
/// [`read_position`] and [`read_dram`] for the two cases this crate
/// needs); a plain `read_register` call only ever emits one
/// `ADDR_LOW`/`ADDR_HIGH`/`READ_ADDR` triple.
pub fn read_register<L: ByteLink>(link: &mut L, reg: u8, buf: &mut [u8]) -> SigmaResult<()> {
    let mut frame = Vec::with_capacity(3);
    frame.extend_from_slice(&addr_preamble(reg));
    frame.push(READ_ADDR);
    link.write(&frame)?;
    link.read_exact(buf)
}

/// Applies the end-of-event correction: the raw counter points past the
/// event, and the last 64 entries of
/// each 512-u16 row are metadata, so decrementing into that region must
/// skip back over it.
fn correct_position(raw: u32) -> u32 {
    let p = raw.wrapping_sub(1);
    if p & 0x1FF == 0x1FF { p.wrapping_sub(64) } else { p }
}

fn assemble_u24_le(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

/// Reads the stop and trigger positions, applying the end-of-event
/// correction. Returns `(stop_pos, trigger_pos)`.
pub fn read_position<L: ByteLink>(link: &mut L) -> SigmaResult<(u32, u32)> {
    let mut frame = Vec::with_capacity(7);
    frame.push(ADDR_LOW | (REG_TRIGGER_POS_LOW & 0x0F));
    frame.extend(std::iter::repeat(READ_ADDR | ADDR_INC).take(6));
    link.write(&frame)?;

    let mut raw = [0u8; 6];
    link.read_exact(&mut raw)?;

    let trigger_pos_raw = assemble_u24_le(&raw[0..3]);
    let stop_pos_raw = assemble_u24_le(&raw[3..6]);

    let trigger_pos = correct_position(trigger_pos_raw);
    let stop_pos = correct_position(stop_pos_raw);

    debug_assert_ne!(stop_pos & 0x1FF, 0x1FF);
    debug_assert_ne!(trigger_pos & 0x1FF, 0x1FF);

    Ok((stop_pos, trigger_pos))
}

/// Programs the DRAM start row and streams back `row_count` rows of
/// `ROW_LENGTH_BYTES` each, using a ping-pong buffer selector so the FPGA
/// fetches row `n+1` while the link drains row `n`.
///
/// `out` must be at least `row_count * ROW_LENGTH_BYTES` bytes.
pub fn read_dram<L: ByteLink>(
    link: &mut L,
    start_row: u16,
    row_count: usize,
    out: &mut [u8],
) -> SigmaResult<()> {
    let needed = row_count * ROW_LENGTH_BYTES;
    if out.len() < needed {
        return Err(SigmaError::BufferTooSmall { needed, available: out.len() });
    }

    write_register(link, REG_MEMROW, &start_row.to_le_bytes())?;

    let mut sel = false;
    for row in 0..row_count {
        link.write(&[sel_bool(!sel), DRAM_WAIT_ACK])?;

        let start = row * ROW_LENGTH_BYTES;
        let n = link.read(&mut out[start..start + ROW_LENGTH_BYTES])?;
        if n != ROW_LENGTH_BYTES {
            // Historical behavior: a
            // short DRAM read mid-download is logged and the loop
            // continues rather than aborting the whole capture.
            log::warn!(
                "short DRAM read on row {row}: wanted {ROW_LENGTH_BYTES} bytes, got {n}"
            );
        }

        sel = !sel;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_link::test_link::MockLink;

    #[test]
    fn write_register_frame_length_is_two_bytes_per_data_byte_plus_preamble() {
        let mut link = MockLink::default();
        let data = [0x12, 0x34, 0x56];
        write_register(&mut link, 0x7, &data).unwrap();
        assert_eq!(link.written.len(), 2 * data.len() + 2);
    }

    #[test]
    fn write_register_too_large_is_buffer_too_small_not_io() {
        let mut link = MockLink::default();
        let data = vec![0u8; 64];
        let err = write_register(&mut link, 0x0, &data).unwrap_err();
        assert!(matches!(err, SigmaError::BufferTooSmall { .. }));
        assert!(link.written.is_empty());
    }

    #[test]
    fn set_register_is_single_byte_write() {
        let mut link = MockLink::default();
        set_register(&mut link, 0x2, 0xAB).unwrap();
        assert_eq!(link.written.len(), 4);
    }

    #[test]
    fn read_position_applies_end_of_event_correction() {
        let mut link = MockLink::with_response([0x00, 0x02, 0x00, 0xFF, 0x01, 0x00]);
        let (stop_pos, trigger_pos) = read_position(&mut link).unwrap();
        assert_eq!(trigger_pos, 0x1BF);
        assert_eq!(stop_pos, 0x0001FE);
        assert_ne!(stop_pos & 0x1FF, 0x1FF);
        assert_ne!(trigger_pos & 0x1FF, 0x1FF);
    }

    #[test]
    fn read_dram_reads_requested_rows() {
        let mut payload = Vec::new();
        for row in 0..3u8 {
            payload.extend(std::iter::repeat(row).take(ROW_LENGTH_BYTES));
        }
        let mut link = MockLink::with_response(payload.clone());
        let mut out = vec![0u8; 3 * ROW_LENGTH_BYTES];
        read_dram(&mut link, 0, 3, &mut out).unwrap();
        assert_eq!(out, payload);
    }
}
