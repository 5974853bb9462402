mod byte_link;
mod device;
mod dram;
mod error;
mod firmware;
mod reg_codec;
mod regs;
mod resource;
mod sink;
mod trigger;

pub use byte_link::ByteLink;
pub use device::{DeviceContext, TickOutcome};
pub use error::{SigmaError, SigmaResult};
pub use firmware::FirmwareIndex;
pub use regs::CANONICAL_SAMPLERATES_HZ;
pub use resource::FirmwareLoader;
pub use sink::{PacketKind, SampleSink};
pub use trigger::{ChannelMatch, SymbolicTrigger, TriggerStage};
