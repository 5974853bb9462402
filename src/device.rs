//! `DeviceContext`/`AcqController`: samplerate and trigger selection,
//! the capture state machine, and the DRAM download procedure.

use std::thread;
use std::time::Duration;

use crate::byte_link::ByteLink;
use crate::dram::{self, CaptureState, DecoderState, DramDecoder};
use crate::error::{SigmaError, SigmaResult};
use crate::firmware::{FirmwareIndex, FpgaLoader};
use crate::reg_codec::{read_dram, read_position, read_register, set_register, write_register};
use crate::regs::{
    CANONICAL_SAMPLERATES_HZ, EVENTS_PER_ROW, REG_MODE, REG_TRIGGER_LUT, ROW_COUNT,
    ROW_LENGTH_BYTES, RMR_POSTTRIGGERED, RMR_ROUND, RMR_TRIGGERED, WMR_FORCESTOP, WMR_SDRAMREADEN,
    WMR_SDRAMWRITEEN,
};
use crate::resource::FirmwareLoader;
use crate::sink::{PacketKind, SampleSink};
use crate::trigger::{self, Trigger, TriggerLut, TriggerStage};

/// How many DRAM rows a single `read_dram` call fetches.
const ROWS_PER_BATCH: usize = 32;

/// Bound on `READ_MODE` polling during a download. Chosen to match the
/// PROG/INIT handshake's budget in [`crate::firmware`] (10 attempts),
/// scaled up since the FPGA may still be draining the write-side pipeline.
const MODE_POLL_ATTEMPTS: u32 = 50;
const MODE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result of a single [`DeviceContext::tick`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stopped,
}

fn firmware_for_rate(hz: u32) -> (FirmwareIndex, u8) {
    match hz {
        200_000_000 => (FirmwareIndex::Fixed200MHz4Channel, 4),
        100_000_000 => (FirmwareIndex::Fixed100MHz8Channel, 8),
        _ => (FirmwareIndex::LowRate16Channel, 16),
    }
}

/// Combines the numerators before dividing by the samplerate once, rather
/// than truncating each term separately and summing — the two give
/// different results under integer division.
fn compute_limit_msec(limit_samples: u64, samplerate_hz: u32) -> u64 {
    let samplerate = u64::from(samplerate_hz);
    let numerator = limit_samples * 1000 + 2 * 65536 * 1000;
    numerator / samplerate
}

fn pack_lut(lut: &TriggerLut) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32);
    for v in lut.m2d {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes.extend_from_slice(&lut.m3.to_le_bytes());
    bytes.extend_from_slice(&lut.m3s.to_le_bytes());
    bytes.extend_from_slice(&lut.m4.to_le_bytes());
    for v in lut.m0d {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    for v in lut.m1d {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes.extend_from_slice(&u16::from(lut.params.selres).to_le_bytes());
    bytes
}

/// Long-lived per-open-device state. Owns the
/// device's [`ByteLink`]; constructed by the driver at device open and
/// dropped at close.
pub struct DeviceContext<L: ByteLink> {
    link: L,
    fpga: FpgaLoader,
    samplerate_hz: u32,
    channel_count: u8,
    samples_per_event: u8,
    start_time_us: u64,
    limit_msec: u64,
    sent_samples: u64,
    limit_samples: u64,
    decoder_state: DecoderState,
    trigger: Trigger,
    trigger_stage0: TriggerStage,
    use_triggers: bool,
}

impl<L: ByteLink> DeviceContext<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            fpga: FpgaLoader::new(),
            samplerate_hz: 200_000,
            channel_count: 16,
            samples_per_event: 1,
            start_time_us: 0,
            limit_msec: 0,
            sent_samples: 0,
            limit_samples: 0,
            decoder_state: DecoderState::default(),
            trigger: Trigger::default(),
            trigger_stage0: TriggerStage::default(),
            use_triggers: false,
        }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn state(&self) -> CaptureState {
        self.decoder_state.state
    }

    pub fn sent_samples(&self) -> u64 {
        self.sent_samples
    }

    pub fn limit_msec(&self) -> u64 {
        self.limit_msec
    }

    pub fn samples_per_event(&self) -> u8 {
        self.samples_per_event
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Selects the samplerate, uploading the matching firmware image if
    /// it isn't already loaded.
    ///
    /// # Errors
    ///
    /// Returns [`SigmaError::UnsupportedSamplerate`] if `hz` is not in
    /// the canonical rate table, and propagates any firmware upload
    /// failure.
    pub fn set_samplerate(&mut self, hz: u32, loader: &mut dyn FirmwareLoader) -> SigmaResult<()> {
        if !CANONICAL_SAMPLERATES_HZ.contains(&hz) {
            return Err(SigmaError::UnsupportedSamplerate { hz });
        }

        let (idx, channels) = firmware_for_rate(hz);
        self.fpga.upload(&mut self.link, idx, loader)?;

        self.channel_count = channels;
        self.samples_per_event = 16 / channels;
        self.samplerate_hz = hz;
        self.decoder_state.state = CaptureState::Idle;
        if self.limit_samples > 0 {
            self.limit_msec = compute_limit_msec(self.limit_samples, hz);
        }

        log::info!("samplerate set to {hz} Hz ({channels} channels)");
        Ok(())
    }

    /// Sets the wall-clock sample-count goal. `0` means unlimited.
    pub fn set_limit_samples(&mut self, n: u64) {
        self.limit_samples = n;
        self.limit_msec = if n > 0 { compute_limit_msec(n, self.samplerate_hz) } else { 0 };
    }

    pub fn set_triggers(&mut self, stage0: TriggerStage) {
        self.trigger_stage0 = stage0;
    }

    pub fn set_use_triggers(&mut self, use_triggers: bool) {
        self.use_triggers = use_triggers;
    }

    /// Compiles and uploads the trigger LUT, arms the capture, and
    /// records the start time. The trigger is rebuilt on every
    /// acquisition start.
    pub fn start_acquisition(&mut self, now_monotonic_us: u64) -> SigmaResult<()> {
        let trigger = trigger::compile(&self.trigger_stage0, self.samplerate_hz)?;
        let lut = trigger::compile_lut(&trigger);
        write_register(&mut self.link, REG_TRIGGER_LUT, &pack_lut(&lut))?;

        self.trigger = trigger;
        self.decoder_state = DecoderState { state: CaptureState::ArmedCapture, ..DecoderState::default() };
        self.sent_samples = 0;
        self.start_time_us = now_monotonic_us;

        set_register(&mut self.link, REG_MODE, 0)?;

        log::info!("acquisition armed at samplerate {} Hz", self.samplerate_hz);
        Ok(())
    }

    /// Marks the capture as stopping; the next [`Self::tick`] drives the
    /// download.
    pub fn stop_acquisition(&mut self) {
        if self.decoder_state.state == CaptureState::ArmedCapture {
            self.decoder_state.state = CaptureState::Stopping;
            log::info!("acquisition stop requested");
        }
    }

    /// Drives the capture state machine one step.
    pub fn tick(
        &mut self,
        now_monotonic_us: u64,
        sink: &mut dyn SampleSink,
    ) -> SigmaResult<TickOutcome> {
        match self.decoder_state.state {
            CaptureState::Idle => Ok(TickOutcome::Continue),
            CaptureState::Stopping => {
                self.download(sink)?;
                Ok(TickOutcome::Stopped)
            }
            CaptureState::ArmedCapture => {
                let elapsed_us = now_monotonic_us.saturating_sub(self.start_time_us);
                if self.limit_samples > 0 && elapsed_us >= self.limit_msec * 1000 {
                    self.download(sink)?;
                    Ok(TickOutcome::Stopped)
                } else {
                    Ok(TickOutcome::Continue)
                }
            }
            CaptureState::Downloading => Ok(TickOutcome::Continue),
        }
    }

    fn poll_mode_until(&mut self, bit: u8) -> SigmaResult<()> {
        let mut mode = [0u8; 1];
        for _ in 0..MODE_POLL_ATTEMPTS {
            read_register(&mut self.link, REG_MODE, &mut mode)?;
            if mode[0] & bit != 0 {
                return Ok(());
            }
            thread::sleep(MODE_POLL_INTERVAL);
        }
        Err(SigmaError::Timeout { attempts: MODE_POLL_ATTEMPTS })
    }

    /// Downloads a full capture from DRAM and decodes it to the sink.
    fn download(&mut self, sink: &mut dyn SampleSink) -> SigmaResult<()> {
        self.decoder_state.reset_for_download();
        log::info!("download starting");

        set_register(&mut self.link, REG_MODE, WMR_FORCESTOP | WMR_SDRAMWRITEEN)?;
        self.poll_mode_until(RMR_POSTTRIGGERED)?;
        set_register(&mut self.link, REG_MODE, WMR_SDRAMREADEN)?;

        let (stop_pos, trigger_pos) = read_position(&mut self.link)?;

        let mut mode = [0u8; 1];
        read_register(&mut self.link, REG_MODE, &mut mode)?;
        let triggered = mode[0] & RMR_TRIGGERED != 0;
        let round = mode[0] & RMR_ROUND != 0;

        let (trg_row, trg_event) = if triggered {
            (Some((trigger_pos >> 9) as usize), Some(trigger_pos & 0x1FF))
        } else {
            (None, None)
        };

        let (start_row, total_rows) = if round {
            (((stop_pos >> 9) as usize + 2) % ROW_COUNT, ROW_COUNT - 2)
        } else {
            (0, (stop_pos >> 9) as usize + 1)
        };

        let decoder = DramDecoder::new(self.samplerate_hz, self.samples_per_event, self.trigger, self.use_triggers);

        let mut row_buf = vec![0u8; ROWS_PER_BATCH * ROW_LENGTH_BYTES];
        let mut rows_done = 0usize;
        let mut first_row_seeded = false;

        while rows_done < total_rows {
            let batch = (total_rows - rows_done).min(ROWS_PER_BATCH);
            let batch_start_abs = (start_row + rows_done) % ROW_COUNT;
            read_dram(&mut self.link, batch_start_abs as u16, batch, &mut row_buf[..batch * ROW_LENGTH_BYTES])?;

            for i in 0..batch {
                let row_index = rows_done + i;
                let abs_row = (batch_start_abs + i) % ROW_COUNT;
                let row_bytes = &row_buf[i * ROW_LENGTH_BYTES..(i + 1) * ROW_LENGTH_BYTES];

                if !first_row_seeded {
                    let cluster0 = dram::parse_cluster(&row_bytes[0..16]);
                    self.decoder_state.seed_from_first_cluster(&cluster0);
                    first_row_seeded = true;
                }

                let is_last_row = row_index == total_rows - 1;
                let events_in_row = if is_last_row {
                    let rem = (stop_pos as usize) & 0x1FF;
                    if rem == 0 { EVENTS_PER_ROW } else { rem }
                } else {
                    EVENTS_PER_ROW
                };

                let trigger_event_here =
                    if trg_row == Some(abs_row) { trg_event } else { None };

                decoder.decode_row(
                    &mut self.decoder_state,
                    &mut self.sent_samples,
                    self.limit_samples,
                    row_bytes,
                    events_in_row,
                    trigger_event_here,
                    sink,
                );
            }

            rows_done += batch;
        }

        sink.emit(PacketKind::EndOfFeed, 0, &[]);
        self.decoder_state.state = CaptureState::Idle;
        log::info!("download complete, {} samples sent", self.sent_samples);
        Ok(())
    }
}
