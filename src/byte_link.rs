use crate::error::SigmaResult;

/// Thin synchronous read/write over the FTDI byte pipe.
///
/// Implementations live outside this crate; USB enumeration and open/close
/// are handled by the caller. A partial write
/// must be surfaced as an error, not silently retried — the caller is
/// issuing a multi-byte command sequence and a short write leaves the
/// device's nibble-framing out of sync with no way to resynchronize short
/// of a fresh command.
pub trait ByteLink {
    /// Writes `bytes` in full. A partial write is `Err`.
    fn write(&mut self, bytes: &[u8]) -> SigmaResult<()>;

    /// Reads up to `buf.len()` bytes, returning the number actually read.
    fn read(&mut self, buf: &mut [u8]) -> SigmaResult<usize>;

    /// Reads exactly `buf.len()` bytes, erroring on a short read.
    fn read_exact(&mut self, buf: &mut [u8]) -> SigmaResult<()> {
        let n = self.read(buf)?;
        if n != buf.len() {
            return Err(crate::error::SigmaError::IoFail(format!(
                "short read: wanted {} bytes, got {n}",
                buf.len()
            )));
        }
        Ok(())
    }

    /// Discards any buffered input on the bridge.
    fn purge(&mut self) -> SigmaResult<()>;

    /// Reconfigures the bridge into bitbang mode with the given pin
    /// direction mask (1 = output).
    fn set_bitbang_mode(&mut self, pin_mask: u8) -> SigmaResult<()>;

    /// Reconfigures the bridge's baud rate.
    fn set_baud(&mut self, rate: u32) -> SigmaResult<()>;

    /// Returns the bridge to normal byte-pipe mode.
    fn reset_mode(&mut self) -> SigmaResult<()>;
}

#[cfg(test)]
pub(crate) mod test_link {
    use super::ByteLink;
    use crate::error::SigmaResult;
    use std::collections::VecDeque;

    /// An in-memory `ByteLink` used by unit tests throughout the crate:
    /// records everything written, and serves reads from a preloaded
    /// queue of response bytes.
    #[derive(Debug, Default)]
    pub struct MockLink {
        pub written: Vec<u8>,
        pub to_read: VecDeque<u8>,
        pub bitbang_mask: Option<u8>,
        pub baud: Option<u32>,
        pub purged: u32,
    }

    impl MockLink {
        pub fn with_response(bytes: impl IntoIterator<Item = u8>) -> Self {
            Self { to_read: bytes.into_iter().collect(), ..Self::default() }
        }

        pub fn push_response(&mut self, bytes: impl IntoIterator<Item = u8>) {
            self.to_read.extend(bytes);
        }
    }

    impl ByteLink for MockLink {
        fn write(&mut self, bytes: &[u8]) -> SigmaResult<()> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> SigmaResult<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.to_read.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn purge(&mut self) -> SigmaResult<()> {
            self.purged += 1;
            self.to_read.clear();
            Ok(())
        }

        fn set_bitbang_mode(&mut self, pin_mask: u8) -> SigmaResult<()> {
            self.bitbang_mask = Some(pin_mask);
            Ok(())
        }

        fn set_baud(&mut self, rate: u32) -> SigmaResult<()> {
            self.baud = Some(rate);
            Ok(())
        }

        fn reset_mode(&mut self) -> SigmaResult<()> {
            self.bitbang_mask = None;
            Ok(())
        }
    }
}
