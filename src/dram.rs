//! Walks the DRAM ring, expands run-length-encoded gaps, deinterleaves
//! the 100/200 MHz sample packing, and splices the post-hoc trigger
//! point into the emitted sample stream.

use crate::regs::EVENTS_PER_CLUSTER;
use crate::sink::{PacketKind, SampleSink};
use crate::trigger::Trigger;

/// One 16-bit sample item as it sits on the wire: byte-swapped relative
/// to the decoded value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample16 {
    pub sample_lo: u8,
    pub sample_hi: u8,
}

/// A parsed 16-byte DRAM cluster: one timestamp plus
/// [`EVENTS_PER_CLUSTER`] sample items.
#[derive(Debug, Clone, Copy)]
pub struct DramCluster {
    pub timestamp_lo: u8,
    pub timestamp_hi: u8,
    pub samples: [Sample16; EVENTS_PER_CLUSTER],
}

/// Parses one 16-byte cluster out of a DRAM row.
pub fn parse_cluster(bytes: &[u8]) -> DramCluster {
    debug_assert_eq!(bytes.len(), 16);
    let mut samples = [Sample16::default(); EVENTS_PER_CLUSTER];
    for (i, s) in samples.iter_mut().enumerate() {
        let off = 2 + i * 2;
        s.sample_lo = bytes[off];
        s.sample_hi = bytes[off + 1];
    }
    DramCluster { timestamp_lo: bytes[0], timestamp_hi: bytes[1], samples }
}

/// Capture lifecycle state carried in [`DecoderState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    ArmedCapture,
    Stopping,
    Downloading,
}

/// State carried across cluster decoding within one capture. Reset at
/// the start of each download.
#[derive(Debug, Clone, Copy)]
pub struct DecoderState {
    pub last_timestamp: u16,
    pub last_sample: u16,
    pub state: CaptureState,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self { last_timestamp: 0, last_sample: 0, state: CaptureState::Idle }
    }
}

impl DecoderState {
    /// Clears the per-capture decode carry state ahead of a download.
    pub fn reset_for_download(&mut self) {
        self.last_timestamp = 0;
        self.last_sample = 0;
        self.state = CaptureState::Downloading;
    }

    /// Seeds `last_timestamp` from the first row's own cluster 0
    /// timestamp, so the capture's leading cluster contributes no RLE gap.
    pub fn seed_from_first_cluster(&mut self, cluster: &DramCluster) {
        self.last_timestamp = (u16::from(cluster.timestamp_hi) << 8) | u16::from(cluster.timestamp_lo);
        self.last_sample = 0;
    }
}

fn swapped_item(lo: u8, hi: u8) -> u16 {
    let raw = u16::from(lo) | (u16::from(hi) << 8);
    raw.swap_bytes()
}

/// Deinterleaves a 200 MHz event into its 4 sub-sample channel vectors.
/// Channel bit `k` of sub-sample `idx` lives at wire bit `k*4 + idx`.
fn deinterleave_200mhz(item: u16) -> [u16; 4] {
    let mut out = [0u16; 4];
    for (idx, slot) in out.iter_mut().enumerate() {
        let mut value = 0u16;
        for k in 0..4u16 {
            let bit = (item >> (k * 4 + idx as u16)) & 1;
            value |= bit << k;
        }
        *slot = value;
    }
    out
}

/// Deinterleaves a 100 MHz event into its 2 sub-sample channel vectors.
fn deinterleave_100mhz(item: u16) -> [u16; 2] {
    let mut out = [0u16; 2];
    for (idx, slot) in out.iter_mut().enumerate() {
        let mut value = 0u16;
        for k in 0..8u16 {
            let bit = (item >> (k * 2 + idx as u16)) & 1;
            value |= bit << k;
        }
        *slot = value;
    }
    out
}

fn emit_logic_samples<S: SampleSink>(
    sink: &mut S,
    sent_samples: &mut u64,
    limit_samples: u64,
    samples: &[u16],
) {
    if samples.is_empty() {
        return;
    }
    let allowed = if limit_samples == 0 {
        samples.len()
    } else {
        let remaining = limit_samples.saturating_sub(*sent_samples);
        (remaining as usize).min(samples.len())
    };
    if allowed == 0 {
        return;
    }

    let mut bytes = Vec::with_capacity(allowed * 2);
    for &sample in &samples[..allowed] {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    sink.emit(PacketKind::Logic, 2, &bytes);
    *sent_samples += allowed as u64;
}

/// Fills the RLE gap ahead of a cluster with `tsdiff` repeats of
/// `last_sample`, in packets of up to 1024 samples. Each event tick
/// counted by `tsdiff` is itself `samples_per_event` decoded samples
/// wide, the same scaling `deinterleave_200mhz`/`deinterleave_100mhz`
/// apply to the payload path, so the gap is `tsdiff * samples_per_event`
/// samples long.
fn rle_expand<S: SampleSink>(
    sink: &mut S,
    sent_samples: &mut u64,
    limit_samples: u64,
    samples_per_event: u8,
    last_sample: u16,
    tsdiff: u16,
) {
    let mut remaining = usize::from(tsdiff) * usize::from(samples_per_event.max(1));
    let mut buf = [0u16; 1024];
    while remaining > 0 {
        let chunk = remaining.min(buf.len());
        buf[..chunk].fill(last_sample);
        emit_logic_samples(sink, sent_samples, limit_samples, &buf[..chunk]);
        remaining -= chunk;
    }
}

/// Scans up to 8 successive raw event items for the first that matches
/// the compiled trigger, returning its index. Returns 0 if nothing in
/// the window matched.
fn get_trigger_offset(items: &[u16], trigger: &Trigger, initial_prev: u16) -> usize {
    let mut prev = initial_prev;
    for (i, &item) in items.iter().take(8).enumerate() {
        let value_match = (item & trigger.simple_mask) == trigger.simple_value;
        let rising_ok = trigger.rising_mask == 0
            || ((prev & trigger.rising_mask) == 0 && (item & trigger.rising_mask) == trigger.rising_mask);
        let falling_ok = trigger.falling_mask == 0
            || ((prev & trigger.falling_mask) == trigger.falling_mask && (item & trigger.falling_mask) == 0);
        if value_match && rising_ok && falling_ok {
            return i;
        }
        prev = item;
    }
    0
}

/// Decodes the DRAM sample stream at one samplerate. Stateless beyond
/// its construction parameters; all mutable decode state lives in
/// [`DecoderState`], owned by the caller across rows.
#[derive(Debug, Clone, Copy)]
pub struct DramDecoder {
    samplerate_hz: u32,
    samples_per_event: u8,
    trigger: Trigger,
    use_triggers: bool,
}

impl DramDecoder {
    pub fn new(samplerate_hz: u32, samples_per_event: u8, trigger: Trigger, use_triggers: bool) -> Self {
        Self { samplerate_hz, samples_per_event, trigger, use_triggers }
    }

    /// Decodes one cluster, expanding its leading RLE gap, deinterleaving
    /// its payload, and splicing the trigger marker if `triggered`.
    pub fn decode_cluster<S: SampleSink>(
        &self,
        state: &mut DecoderState,
        sent_samples: &mut u64,
        limit_samples: u64,
        cluster: &DramCluster,
        events_in_cluster: usize,
        triggered: bool,
        sink: &mut S,
    ) {
        let ts = (u16::from(cluster.timestamp_hi) << 8) | u16::from(cluster.timestamp_lo);
        let tsdiff = ts.wrapping_sub(state.last_timestamp);

        rle_expand(sink, sent_samples, limit_samples, self.samples_per_event, state.last_sample, tsdiff);
        state.last_timestamp = ts.wrapping_add(EVENTS_PER_CLUSTER as u16);

        let mut items = Vec::with_capacity(events_in_cluster);
        let mut decoded = Vec::with_capacity(events_in_cluster * usize::from(self.samples_per_event));
        for event in cluster.samples.iter().take(events_in_cluster) {
            let item = swapped_item(event.sample_lo, event.sample_hi);
            items.push(item);
            match self.samples_per_event {
                4 => decoded.extend_from_slice(&deinterleave_200mhz(item)),
                2 => decoded.extend_from_slice(&deinterleave_100mhz(item)),
                _ => decoded.push(item),
            }
        }

        let mut start = 0;
        if triggered {
            let offset = get_trigger_offset(&items, &self.trigger, state.last_sample);
            if offset > 0 {
                let pre = (offset * usize::from(self.samples_per_event)).min(decoded.len());
                emit_logic_samples(sink, sent_samples, limit_samples, &decoded[..pre]);
                start = pre;
            }
            if self.use_triggers {
                sink.emit(PacketKind::TriggerMark, 0, &[]);
            }
        }
        emit_logic_samples(sink, sent_samples, limit_samples, &decoded[start..]);

        if let Some(&last) = decoded.last() {
            state.last_sample = last;
        }
    }

    /// Decodes one DRAM row.
    ///
    /// `events_in_row` is 448 for every row but the last of a download,
    /// which may be partial. `trigger_event` is `Some(event_index)` if
    /// this row contains the triggering event, else `None`.
    pub fn decode_row<S: SampleSink>(
        &self,
        state: &mut DecoderState,
        sent_samples: &mut u64,
        limit_samples: u64,
        row: &[u8],
        events_in_row: usize,
        trigger_event: Option<u32>,
        sink: &mut S,
    ) {
        debug_assert_eq!(row.len(), crate::regs::ROW_LENGTH_BYTES);
        let clusters_in_row = events_in_row.div_ceil(EVENTS_PER_CLUSTER);

        let trigger_cluster = trigger_event.and_then(|te| {
            if te as usize >= crate::regs::EVENTS_PER_ROW {
                return None;
            }
            let te = if self.samplerate_hz <= 50_000_000 { te.saturating_sub(te.min(6)) } else { te };
            Some((te / EVENTS_PER_CLUSTER as u32) as usize)
        });

        for i in 0..clusters_in_row {
            let events = if i == clusters_in_row - 1 {
                let rem = events_in_row % EVENTS_PER_CLUSTER;
                if rem == 0 { EVENTS_PER_CLUSTER } else { rem }
            } else {
                EVENTS_PER_CLUSTER
            };
            let cluster = parse_cluster(&row[i * 16..i * 16 + 16]);
            let triggered = trigger_cluster == Some(i);
            self.decode_cluster(state, sent_samples, limit_samples, &cluster, events, triggered, sink);
        }
    }
}
