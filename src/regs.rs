//! Device-level constants: nibble opcodes, register addresses, and mode
//! bits that make up the wire protocol.

/// High-nibble opcodes of the command language.
/// The low nibble of the byte carries either an immediate data nibble
/// (`ADDR_LOW`/`ADDR_HIGH`/`DATA_LOW`/`DATA_HIGH_WRITE`) or the
/// [`ADDR_INC`] flag (`READ_ADDR`).
pub const ADDR_LOW: u8 = 0x00;
pub const ADDR_HIGH: u8 = 0x10;
pub const DATA_LOW: u8 = 0x20;
pub const DATA_HIGH_WRITE: u8 = 0x30;
pub const READ_ADDR: u8 = 0x40;

/// OR'd into `READ_ADDR`'s low nibble to request address post-increment.
pub const ADDR_INC: u8 = 0x01;

/// Register addresses (4-bit, loaded via `ADDR_LOW`/`ADDR_HIGH`).
pub const REG_TRIGGER_POS_LOW: u8 = 0x0;
pub const REG_MEMROW: u8 = 0x1;
pub const REG_MODE: u8 = 0x2;
pub const REG_ID: u8 = 0x3;
pub const REG_SCRATCH: u8 = 0x4;
pub const REG_TRIGGER_LUT: u8 = 0x5;

/// Expected value of `REG_ID` once the FPGA has been configured.
pub const EXPECTED_DEVICE_ID: u8 = 0xA6;

/// `WRITE_MODE` bits.
pub const WMR_FORCESTOP: u8 = 0x01;
pub const WMR_SDRAMWRITEEN: u8 = 0x02;
pub const WMR_SDRAMREADEN: u8 = 0x04;
pub const WMR_SDRAMINIT: u8 = 0x08;

/// `READ_MODE` bits.
pub const RMR_POSTTRIGGERED: u8 = 0x01;
pub const RMR_TRIGGERED: u8 = 0x02;
pub const RMR_ROUND: u8 = 0x04;

/// Gates a single DRAM row fetch during `read_dram`'s interleaved stream.
pub const DRAM_WAIT_ACK: u8 = 0x06;

/// Returns the ping-pong buffer-select command for the given boolean.
pub fn sel_bool(sel: bool) -> u8 {
    if sel { 0x07 } else { 0x08 }
}

/// FTDI bitbang pin bits used while driving the Spartan-3 slave-serial
/// configuration interface.
pub const BIT_DIN: u8 = 0x01;
pub const BIT_CCLK: u8 = 0x02;
pub const BIT_PROG: u8 = 0x04;
pub const BIT_INIT: u8 = 0x08;
pub const BIT_D2: u8 = 0x10;
pub const BIT_D3: u8 = 0x20;
pub const BIT_D7: u8 = 0x80;

/// Cluster/row geometry.
pub const EVENTS_PER_CLUSTER: usize = 7;
pub const ROW_LENGTH_BYTES: usize = 1024;
pub const EVENTS_PER_ROW: usize = 64 * EVENTS_PER_CLUSTER;
pub const ROW_COUNT: usize = 8192;
pub const ROW_MASK: usize = ROW_COUNT - 1;

/// Canonical samplerates the device supports, in Hz.
pub const CANONICAL_SAMPLERATES_HZ: [u32; 10] =
    [200_000, 250_000, 500_000, 1_000_000, 5_000_000, 10_000_000, 25_000_000, 50_000_000,
        100_000_000, 200_000_000];

/// Firmware scramble PRNG seed.
pub const SCRAMBLE_SEED: u32 = 0x3F6D_F2AB;

/// Maximum firmware file size accepted from the resource loader.
pub const MAX_FIRMWARE_BYTES: usize = 256 * 1024;
