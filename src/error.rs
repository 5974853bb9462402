use thiserror::Error;

/// Every fallible operation in this crate returns this error type.
///
/// ("Error Handling Design") for the policy behind
/// each variant: all of these are surfaced to the caller immediately, the
/// core never retries silently (the bounded PROG/INIT poll is the one
/// exception, and it is folded into `Timeout` once the retry budget is
/// spent).
#[derive(Debug, Error)]
pub enum SigmaError {
    #[error("I/O failure on the device byte link: {0}")]
    IoFail(String),

    #[error(
        "register codec buffer too small: need {needed} bytes, have {available} (programming error)"
    )]
    BufferTooSmall { needed: usize, available: usize },

    #[error("timed out waiting for FPGA INIT after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("FPGA ID/scratch sanity check failed: {0}")]
    FpgaInitFailed(String),

    #[error("samplerate {hz} Hz is not in the device's canonical rate table")]
    UnsupportedSamplerate { hz: u32 },

    #[error("trigger specification is not representable by the device: {0}")]
    UnsupportedTrigger(String),

    #[error("could not load firmware resource {name:?}: {source}")]
    ResourceMissing { name: String, source: String },
}

pub type SigmaResult<T> = Result<T, SigmaError>;
