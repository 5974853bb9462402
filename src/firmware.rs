//! Firmware unscrambling, bitbang bitstream generation, and the
//! PROG/INIT/ID-scratch handshake that brings the FPGA up.

use std::thread;
use std::time::Duration;

use crate::byte_link::ByteLink;
use crate::error::{SigmaError, SigmaResult};
use crate::reg_codec::{read_register, set_register};
use crate::regs::{
    BIT_CCLK, BIT_D2, BIT_D3, BIT_D7, BIT_DIN, BIT_INIT, BIT_PROG, EXPECTED_DEVICE_ID,
    MAX_FIRMWARE_BYTES, REG_ID, REG_MODE, REG_SCRATCH, SCRAMBLE_SEED, WMR_SDRAMINIT,
};
use crate::resource::FirmwareLoader;

/// Which of the five vendor firmware images is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareIndex {
    /// 50 MHz and below, 16 channels.
    LowRate16Channel,
    /// 100 MHz fixed, 8 channels.
    Fixed100MHz8Channel,
    /// 200 MHz fixed, 4 channels.
    Fixed200MHz4Channel,
    /// External sync clock.
    ExternalSyncClock,
    /// Frequency-counter/phasor.
    ///
    /// Indexed by the vendor firmware table but the core specifies no
    /// distinct operating mode for it.
    FrequencyCounterPhasor,
}

impl FirmwareIndex {
    const ALL: [Self; 5] = [
        Self::LowRate16Channel,
        Self::Fixed100MHz8Channel,
        Self::Fixed200MHz4Channel,
        Self::ExternalSyncClock,
        Self::FrequencyCounterPhasor,
    ];

    fn resource_name(self) -> &'static str {
        match self {
            Self::LowRate16Channel => "sigma-50.fw",
            Self::Fixed100MHz8Channel => "sigma-100.fw",
            Self::Fixed200MHz4Channel => "sigma-200.fw",
            Self::ExternalSyncClock => "sigma-extclk.fw",
            Self::FrequencyCounterPhasor => "sigma-phasor.fw",
        }
    }
}

/// Advances the scramble/unscramble keystream by one byte and returns its
/// low byte. The XOR stream is its own inverse, so the same function
/// implements both scrambling and unscrambling.
fn advance(imm: u32) -> u32 {
    let additive = imm.wrapping_add(0x00A5_3753) % 177;
    additive.wrapping_add(imm.wrapping_mul(0x0803_4052))
}

/// XORs `data` against the keystream seeded at `seed`. Scrambling and
/// unscrambling are the same operation.
pub fn xor_stream(data: &[u8], seed: u32) -> Vec<u8> {
    let mut imm = seed;
    data.iter()
        .map(|&byte| {
            imm = advance(imm);
            byte ^ (imm & 0xFF) as u8
        })
        .collect()
}

/// Expands unscrambled firmware bytes into an FTDI bitbang pin-toggle
/// stream: each bit becomes two samples, MSB-first. CCLK is inverted by
/// the cable's level shifter, so asserting it here produces the falling
/// edge the FPGA latches DIN on.
pub fn bitbang_stream(unscrambled: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(unscrambled.len() * 16);
    for &byte in unscrambled {
        for bit_index in (0..8).rev() {
            let din = if (byte >> bit_index) & 1 != 0 { BIT_DIN } else { 0 };
            out.push(din | BIT_CCLK);
            out.push(din);
        }
    }
    out
}

const SUICIDE_HIGH: u8 = BIT_D7 | BIT_D2;
const SUICIDE_LOW: u8 = BIT_D7 | BIT_D3;

fn suicide_pattern() -> [u8; 8] {
    [
        SUICIDE_HIGH,
        SUICIDE_LOW,
        SUICIDE_HIGH,
        SUICIDE_LOW,
        SUICIDE_HIGH,
        SUICIDE_LOW,
        SUICIDE_HIGH,
        SUICIDE_LOW,
    ]
}

fn prog_pulse_pattern() -> [u8; 10] {
    const IDLE: u8 = BIT_CCLK | BIT_PROG;
    [IDLE, IDLE, IDLE, BIT_CCLK, BIT_CCLK, BIT_CCLK, BIT_CCLK, IDLE, IDLE, IDLE]
}

const INIT_POLL_ATTEMPTS: u32 = 10;
const INIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Drives the FPGA configuration pipeline: unscrambling, the
/// suicide/PROG/INIT handshake, bitbang upload, and the post-upload
/// ID/scratch/mode sanity check.
#[derive(Debug, Default)]
pub struct FpgaLoader {
    cur_firmware: Option<FirmwareIndex>,
}

impl FpgaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_firmware(&self) -> Option<FirmwareIndex> {
        self.cur_firmware
    }

    /// Loads `idx`, a no-op if it is already the currently-loaded
    /// firmware.
    pub fn upload<L: ByteLink>(
        &mut self,
        link: &mut L,
        idx: FirmwareIndex,
        loader: &mut dyn FirmwareLoader,
    ) -> SigmaResult<()> {
        if self.cur_firmware == Some(idx) {
            return Ok(());
        }

        let name = idx.resource_name();
        let raw = loader.load_firmware(name)?;
        if raw.len() > MAX_FIRMWARE_BYTES {
            return Err(SigmaError::ResourceMissing {
                name: name.to_string(),
                source: format!("firmware exceeds {MAX_FIRMWARE_BYTES} byte limit"),
            });
        }
        let unscrambled = xor_stream(&raw, SCRAMBLE_SEED);

        log::info!("uploading firmware {name:?} ({} bytes)", raw.len());

        link.set_bitbang_mode(BIT_DIN | BIT_CCLK | BIT_PROG)?;
        for _ in 0..4 {
            link.write(&suicide_pattern())?;
        }
        link.write(&prog_pulse_pattern())?;
        link.purge()?;

        self.await_init(link)?;

        let stream = bitbang_stream(&unscrambled);
        link.write(&stream)?;

        link.reset_mode()?;
        link.purge()?;

        self.sanity_check(link)?;
        set_register(link, REG_MODE, WMR_SDRAMINIT)?;

        self.cur_firmware = Some(idx);
        log::info!("firmware {name:?} loaded, SDRAM init started");
        Ok(())
    }

    fn await_init<L: ByteLink>(&self, link: &mut L) -> SigmaResult<()> {
        let mut byte = [0u8; 1];
        for _ in 0..INIT_POLL_ATTEMPTS {
            if link.read(&mut byte)? > 0 && byte[0] & BIT_INIT != 0 {
                return Ok(());
            }
            thread::sleep(INIT_POLL_INTERVAL);
        }
        Err(SigmaError::Timeout { attempts: INIT_POLL_ATTEMPTS })
    }

    fn sanity_check<L: ByteLink>(&self, link: &mut L) -> SigmaResult<()> {
        let mut id = [0u8; 1];
        read_register(link, REG_ID, &mut id)?;
        if id[0] != EXPECTED_DEVICE_ID {
            return Err(SigmaError::FpgaInitFailed(format!(
                "READ_ID returned {:#04x}, expected {EXPECTED_DEVICE_ID:#04x}",
                id[0]
            )));
        }

        for pattern in [0x55u8, 0xAA] {
            set_register(link, REG_SCRATCH, pattern)?;
            let mut readback = [0u8; 1];
            read_register(link, REG_SCRATCH, &mut readback)?;
            if readback[0] != pattern {
                return Err(SigmaError::FpgaInitFailed(format!(
                    "scratch register readback {:#04x}, wrote {pattern:#04x}",
                    readback[0]
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_link::test_link::MockLink;
    use crate::resource::test_loader::MapLoader;

    #[test]
    fn scramble_round_trips() {
        let data = vec![0u8, 1, 2, 3, 0xFF, 0x80, 0x7E, 0x00, 0x13];
        let scrambled = xor_stream(&data, SCRAMBLE_SEED);
        let back = xor_stream(&scrambled, SCRAMBLE_SEED);
        assert_eq!(back, data);
    }

    #[test]
    fn scramble_is_deterministic_given_seed() {
        let data = vec![0u8; 8];
        assert_eq!(xor_stream(&data, SCRAMBLE_SEED), xor_stream(&data, SCRAMBLE_SEED));
    }

    #[test]
    fn bitbang_stream_is_sixteen_bytes_per_input_byte() {
        let fw = vec![0xAAu8, 0x55, 0x00, 0xFF];
        let stream = bitbang_stream(&fw);
        assert_eq!(stream.len(), 16 * fw.len());
    }

    #[test]
    fn bitbang_stream_bit_pairs_are_msb_first() {
        let stream = bitbang_stream(&[0b1000_0001]);
        // First bit (MSB=1): DIN asserted in both samples of the pair.
        assert_eq!(stream[0], BIT_DIN | BIT_CCLK);
        assert_eq!(stream[1], BIT_DIN);
        // Last bit (LSB=1): DIN asserted in both samples of the pair.
        assert_eq!(stream[14], BIT_DIN | BIT_CCLK);
        assert_eq!(stream[15], BIT_DIN);
        // A middle zero bit has DIN low in both samples.
        assert_eq!(stream[2], BIT_CCLK);
        assert_eq!(stream[3], 0);
    }

    fn mock_link_with_successful_handshake() -> MockLink {
        let mut link = MockLink::default();
        // INIT poll: first read asserts BIT_INIT.
        link.push_response([BIT_INIT]);
        // ID/scratch sanity check: ID, then two scratch readbacks.
        link.push_response([EXPECTED_DEVICE_ID, 0x55, 0xAA]);
        link
    }

    #[test]
    fn upload_is_noop_if_already_loaded() {
        let mut loader_impl = FpgaLoader { cur_firmware: Some(FirmwareIndex::LowRate16Channel) };
        let mut link = MockLink::default();
        let mut res_loader = MapLoader::default();
        loader_impl
            .upload(&mut link, FirmwareIndex::LowRate16Channel, &mut res_loader)
            .unwrap();
        assert!(link.written.is_empty());
    }

    #[test]
    fn upload_runs_full_handshake_and_records_firmware() {
        let mut loader_impl = FpgaLoader::new();
        let mut link = mock_link_with_successful_handshake();
        let mut res_loader = MapLoader::with_file("sigma-50.fw", vec![0u8; 16]);

        loader_impl.upload(&mut link, FirmwareIndex::LowRate16Channel, &mut res_loader).unwrap();

        assert_eq!(loader_impl.current_firmware(), Some(FirmwareIndex::LowRate16Channel));
        assert_eq!(link.bitbang_mask, None, "reset_mode should clear bitbang mode after upload");
        assert!(link.written.len() > 16 * 16, "bitstream should dominate the write log");
    }

    #[test]
    fn upload_times_out_if_init_never_asserted() {
        let mut loader_impl = FpgaLoader::new();
        let mut link = MockLink::default();
        let mut res_loader = MapLoader::with_file("sigma-50.fw", vec![0u8; 4]);

        let err = loader_impl
            .upload(&mut link, FirmwareIndex::LowRate16Channel, &mut res_loader)
            .unwrap_err();
        assert!(matches!(err, SigmaError::Timeout { attempts: 10 }));
    }

    #[test]
    fn upload_fails_on_id_mismatch() {
        let mut loader_impl = FpgaLoader::new();
        let mut link = MockLink::default();
        link.push_response([BIT_INIT]);
        link.push_response([0x00]); // wrong ID
        let mut res_loader = MapLoader::with_file("sigma-50.fw", vec![0u8; 4]);

        let err = loader_impl
            .upload(&mut link, FirmwareIndex::LowRate16Channel, &mut res_loader)
            .unwrap_err();
        assert!(matches!(err, SigmaError::FpgaInitFailed(_)));
    }

    #[test]
    fn upload_rejects_oversized_firmware() {
        let mut loader_impl = FpgaLoader::new();
        let mut link = MockLink::default();
        let mut res_loader =
            MapLoader::with_file("sigma-50.fw", vec![0u8; MAX_FIRMWARE_BYTES + 1]);

        let err = loader_impl
            .upload(&mut link, FirmwareIndex::LowRate16Channel, &mut res_loader)
            .unwrap_err();
        assert!(matches!(err, SigmaError::ResourceMissing { .. }));
    }

    #[test]
    fn all_firmware_indices_have_distinct_resource_names() {
        let names: Vec<_> = FirmwareIndex::ALL.iter().map(|f| f.resource_name()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
