//! Converts a symbolic trigger match set into a [`Trigger`] and, from
//! that, a [`TriggerLut`] ready for upload to the FPGA match units.

use crate::error::{SigmaError, SigmaResult};

/// One channel's requested match condition within a trigger stage.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMatch {
    High,
    Low,
    Rising,
    Falling,
}

/// One stage of a symbolic trigger specification. Only stage 0 is
/// honored; later stages exist in the symbolic
/// input for forward compatibility with richer trigger expressions that
/// this device cannot represent.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct TriggerStage {
    /// `(channel index 0..16, requested match)` pairs. Channels not
    /// present here are unconstrained ("disabled").
    pub matches: Vec<(u8, ChannelMatch)>,
}

/// The full symbolic trigger specification set via
/// [`crate::device::DeviceContext::set_triggers`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct SymbolicTrigger {
    pub stages: Vec<TriggerStage>,
}

/// A compiled trigger: `(value & simple_mask) == simple_value` AND any
/// configured edge. for the field invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trigger {
    pub simple_value: u16,
    pub simple_mask: u16,
    pub rising_mask: u16,
    pub falling_mask: u16,
}

/// Register block controlling which trigger type the FPGA evaluates.
/// `selres == 3` selects "event" (basic value/mask/edge) triggering,
/// the only kind this crate compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerParams {
    pub selres: u8,
}

/// The 16-entry transposed LUT programmed into the FPGA's match units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerLut {
    pub m2d: [u16; 4],
    pub m3: u16,
    pub m3s: u16,
    pub m4: u16,
    pub m0d: [u16; 4],
    pub m1d: [u16; 4],
    pub params: TriggerParams,
}

/// Event-type constant for `m4`.
pub const M4_EVENT_TYPE: u16 = 0xA000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeOp {
    Rise,
    Fall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CombineFunc {
    Or,
}

/// Converts a symbolic trigger stage into a compiled [`Trigger`],
/// applying the samplerate-dependent validation rules.
///
/// # Errors
///
/// Returns [`SigmaError::UnsupportedTrigger`] if the stage cannot be
/// represented by the device at `samplerate_hz`.
pub fn compile(stage0: &TriggerStage, samplerate_hz: u32) -> SigmaResult<Trigger> {
    let high_rate = samplerate_hz >= 100_000_000;

    let mut simple_value = 0u16;
    let mut simple_mask = 0u16;
    let mut rising_mask = 0u16;
    let mut falling_mask = 0u16;
    let mut edge_count = 0u32;

    for &(channel, m) in &stage0.matches {
        let bit = 1u16 << channel;
        match m {
            ChannelMatch::High if high_rate => {
                return Err(SigmaError::UnsupportedTrigger(
                    "level matches require a samplerate <= 50 MHz".to_string(),
                ));
            }
            ChannelMatch::Low if high_rate => {
                return Err(SigmaError::UnsupportedTrigger(
                    "level matches require a samplerate <= 50 MHz".to_string(),
                ));
            }
            ChannelMatch::High => {
                simple_mask |= bit;
                simple_value |= bit;
            }
            ChannelMatch::Low => {
                simple_mask |= bit;
            }
            ChannelMatch::Rising => {
                rising_mask |= bit;
                edge_count += 1;
            }
            ChannelMatch::Falling => {
                falling_mask |= bit;
                edge_count += 1;
            }
        }
    }

    let max_edges = if high_rate { 1 } else { 2 };
    if edge_count > max_edges {
        return Err(SigmaError::UnsupportedTrigger(format!(
            "{edge_count} edge matches requested, at most {max_edges} supported at {samplerate_hz} Hz"
        )));
    }

    Ok(Trigger { simple_value, simple_mask, rising_mask, falling_mask })
}

/// `build_lut_entry`: for each quad of four
/// channels, for each 4-bit input pattern, clears the pattern's bit
/// whenever any masked channel in that quad disagrees with `value`.
fn build_lut_entry(value: u16, mask: u16, out: &mut [u16; 4]) {
    for quad in 0..4u16 {
        let mut entry = 0xFFFFu16;
        for pattern in 0..16u16 {
            for k in 0..4u16 {
                let channel = quad * 4 + k;
                let channel_bit = 1u16 << channel;
                if mask & channel_bit == 0 {
                    continue;
                }
                let pattern_bit = (pattern >> k) & 1;
                let expected_bit = (value >> channel) & 1;
                if pattern_bit != expected_bit {
                    entry &= !(1 << pattern);
                }
            }
        }
        out[quad as usize] = entry;
    }
}

/// `add_trigger_function`: folds an edge operator's
/// 2x2 truth table into `mask` at bit-pair `index` using `func`.
fn add_trigger_function(op: EdgeOp, func: CombineFunc, index: u8, neg: bool, mask: &mut u16) {
    let mut x = [[false; 2]; 2];
    match op {
        EdgeOp::Rise => x[0][1] = true,
        EdgeOp::Fall => x[1][0] = true,
    }
    if neg {
        let mut transposed = [[false; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                transposed[i][j] = x[1 - i][1 - j];
            }
        }
        x = transposed;
    }

    let mut out = 0u16;
    for i in 0u16..16 {
        let a = ((i >> (2 * index)) & 1) as usize;
        let b = ((i >> (2 * index + 1)) & 1) as usize;
        let existing = (*mask >> i) & 1 != 0;
        let xv = x[b][a];
        let combined = match func {
            CombineFunc::Or => existing || xv,
        };
        if combined {
            out |= 1 << i;
        }
    }
    *mask = out;
}

/// Compiles a [`Trigger`] into the [`TriggerLut`] the FPGA's match units
/// consume.
pub fn compile_lut(trigger: &Trigger) -> TriggerLut {
    let mut m2d = [0xFFFFu16; 4];
    build_lut_entry(trigger.simple_value, trigger.simple_mask, &mut m2d);

    let combined_edges = trigger.rising_mask | trigger.falling_mask;
    let mut edges: Vec<(u8, bool)> = Vec::with_capacity(2);
    for channel in 0..16u8 {
        if combined_edges & (1 << channel) != 0 {
            edges.push((channel, trigger.rising_mask & (1 << channel) != 0));
        }
    }

    let mut slot_masks = [0u16; 2];
    for (slot, &(channel, _)) in edges.iter().take(2).enumerate() {
        slot_masks[slot] = 1 << channel;
    }

    let mut m0d = [0xFFFFu16; 4];
    let mut m1d = [0xFFFFu16; 4];
    build_lut_entry(slot_masks[0], slot_masks[0], &mut m0d);
    build_lut_entry(slot_masks[1], slot_masks[1], &mut m1d);

    let mut m3 = if edges.is_empty() { 0xFFFFu16 } else { 0u16 };
    for (slot, &(_, is_rising)) in edges.iter().take(2).enumerate() {
        let op = if is_rising { EdgeOp::Rise } else { EdgeOp::Fall };
        add_trigger_function(op, CombineFunc::Or, slot as u8, false, &mut m3);
    }

    TriggerLut {
        m2d,
        m3,
        m3s: 0,
        m4: M4_EVENT_TYPE,
        m0d,
        m1d,
        params: TriggerParams { selres: 3 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_masks_give_all_pass_lut() {
        let trigger = Trigger::default();
        let lut = compile_lut(&trigger);
        assert_eq!(lut.m3, 0xFFFF);
        assert_eq!(lut.m4, 0xA000);
        assert!(lut.m2d.iter().all(|&e| e == 0xFFFF));
    }

    #[test]
    fn compile_lut_with_value_and_mask_only() {
        let trigger = Trigger { simple_value: 0x0005, simple_mask: 0x000F, ..Default::default() };
        let lut = compile_lut(&trigger);
        assert_eq!(lut.m2d[0], 0x0020);
        assert_eq!(&lut.m2d[1..4], &[0xFFFF, 0xFFFF, 0xFFFF]);
        assert_eq!(lut.m3, 0xFFFF);
        assert_eq!(lut.m4, 0xA000);
    }

    #[test]
    fn rejects_two_edges_at_200mhz() {
        let stage = TriggerStage {
            matches: vec![(0, ChannelMatch::Rising), (1, ChannelMatch::Rising)],
        };
        let err = compile(&stage, 200_000_000).unwrap_err();
        assert!(matches!(err, SigmaError::UnsupportedTrigger(_)));
    }

    #[test]
    fn rejects_level_match_at_200mhz() {
        let stage = TriggerStage { matches: vec![(0, ChannelMatch::High)] };
        let err = compile(&stage, 200_000_000).unwrap_err();
        assert!(matches!(err, SigmaError::UnsupportedTrigger(_)));
    }

    #[test]
    fn single_edge_allowed_at_200mhz() {
        let stage = TriggerStage { matches: vec![(3, ChannelMatch::Falling)] };
        let trigger = compile(&stage, 200_000_000).unwrap();
        assert_eq!(trigger.falling_mask, 1 << 3);
        assert_eq!(trigger.simple_mask, 0);
    }

    #[test]
    fn two_edges_allowed_at_or_below_50mhz() {
        let stage = TriggerStage {
            matches: vec![(0, ChannelMatch::Rising), (1, ChannelMatch::Falling)],
        };
        let trigger = compile(&stage, 50_000_000).unwrap();
        assert_eq!(trigger.rising_mask, 1);
        assert_eq!(trigger.falling_mask, 2);
    }

    #[test]
    fn three_edges_rejected_below_100mhz() {
        let stage = TriggerStage {
            matches: vec![
                (0, ChannelMatch::Rising),
                (1, ChannelMatch::Falling),
                (2, ChannelMatch::Rising),
            ],
        };
        let err = compile(&stage, 1_000_000).unwrap_err();
        assert!(matches!(err, SigmaError::UnsupportedTrigger(_)));
    }

    #[test]
    fn level_matches_accumulate_value_and_mask() {
        let stage = TriggerStage {
            matches: vec![(0, ChannelMatch::High), (2, ChannelMatch::Low), (1, ChannelMatch::High)],
        };
        let trigger = compile(&stage, 1_000_000).unwrap();
        assert_eq!(trigger.simple_mask, 0b0111);
        assert_eq!(trigger.simple_value, 0b0011);
        assert_eq!(trigger.simple_value & !trigger.simple_mask, 0);
    }

    #[test]
    fn compiled_lut_has_single_edge_slot_populated() {
        let trigger = Trigger { rising_mask: 1 << 2, ..Default::default() };
        let lut = compile_lut(&trigger);
        // Slot 0 carries channel 2's mask; slot 1 is unused (mask 0, all-pass).
        assert_eq!(lut.m0d, {
            let mut m = [0xFFFFu16; 4];
            build_lut_entry(1 << 2, 1 << 2, &mut m);
            m
        });
        assert!(lut.m1d.iter().all(|&e| e == 0xFFFF));
        assert_ne!(lut.m3, 0xFFFF);
    }
}
