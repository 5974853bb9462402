//! The firmware resource loader is an external collaborator: this crate
//! only specifies the interface it consumes.

use crate::error::SigmaResult;

/// Supplies firmware file bytes by name. Implementations typically read
/// from an embedded resource bundle or the filesystem; this crate treats
/// the result as an opaque scrambled netlist (see [`crate::firmware`]).
pub trait FirmwareLoader {
    /// Loads the named firmware resource. Implementations should bound
    /// the result to [`crate::regs::MAX_FIRMWARE_BYTES`]; this crate
    /// double-checks that bound regardless.
    fn load_firmware(&mut self, name: &str) -> SigmaResult<Vec<u8>>;
}

#[cfg(test)]
pub(crate) mod test_loader {
    use super::FirmwareLoader;
    use crate::error::{SigmaError, SigmaResult};
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub struct MapLoader {
        pub files: HashMap<String, Vec<u8>>,
    }

    impl MapLoader {
        pub fn with_file(name: &str, bytes: Vec<u8>) -> Self {
            let mut files = HashMap::new();
            files.insert(name.to_string(), bytes);
            Self { files }
        }
    }

    impl FirmwareLoader for MapLoader {
        fn load_firmware(&mut self, name: &str) -> SigmaResult<Vec<u8>> {
            self.files.get(name).cloned().ok_or_else(|| SigmaError::ResourceMissing {
                name: name.to_string(),
                source: "not present in test fixture".to_string(),
            })
        }
    }
}
