//! The sample sink is an external collaborator: the
//! higher-level session framework that consumes decoded sample packets.
//! This crate only specifies the callback interface it emits through.

/// Discriminates the kind of packet passed to [`SampleSink::emit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `bytes` holds `unit_size`-byte little-endian logic sample values.
    Logic,
    /// A zero-length marker: the trigger point has just been reached.
    TriggerMark,
    /// A zero-length marker: the capture has been fully downloaded.
    EndOfFeed,
}

/// Receives decoded sample data during a download.
///
/// `unit_size` is `2` for [`PacketKind::Logic`] (16-bit sample vectors)
/// and unspecified (callers should ignore it) for the marker kinds.
/// Buffers passed to `emit` are only valid for the duration of the call.
pub trait SampleSink {
    fn emit(&mut self, kind: PacketKind, unit_size: u8, bytes: &[u8]);
}

#[cfg(test)]
pub(crate) mod test_sink {
    use super::{PacketKind, SampleSink};

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub samples: Vec<u16>,
        pub trigger_marks: u32,
        pub end_of_feed: u32,
    }

    impl SampleSink for RecordingSink {
        fn emit(&mut self, kind: PacketKind, unit_size: u8, bytes: &[u8]) {
            match kind {
                PacketKind::Logic => {
                    assert_eq!(unit_size, 2);
                    for chunk in bytes.chunks_exact(2) {
                        self.samples.push(u16::from_le_bytes([chunk[0], chunk[1]]));
                    }
                }
                PacketKind::TriggerMark => self.trigger_marks += 1,
                PacketKind::EndOfFeed => self.end_of_feed += 1,
            }
        }
    }
}
