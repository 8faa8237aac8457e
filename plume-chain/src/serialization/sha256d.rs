//! The SHA-256d hash, defined as SHA-256 of SHA-256.

use sha2::{Digest, Sha256};
use std::io;

/// A type that lets you write out SHA-256d (double SHA-256).
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer {
    /// Consume the Writer and produce the hash result.
    pub fn finish(self) -> [u8; 32] {
        let first_hash = self.hash.finalize();
        let second_hash = Sha256::digest(&first_hash);

        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&second_hash);
        buffer
    }
}

/// Convenience wrapper: the SHA-256d digest of `data`.
pub fn digest(data: &[u8]) -> [u8; 32] {
    use io::Write;

    let mut writer = Writer::default();
    writer
        .write_all(data)
        .expect("writing to a hasher is infallible");
    writer.finish()
}
