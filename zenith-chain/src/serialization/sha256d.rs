//! The double-SHA256 hash used to identify blocks, transactions, and
//! certificates.

use sha2::{Digest, Sha256};
use std::io;

/// A type that lets you write out SHA256d (double SHA256: hash twice)
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
        let result1 = self.hash.finalize();
        let result2 = Sha256::digest(&result1);
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result2[0..32]);
        buffer
    }
}

/// Hash a byte slice with SHA256d in one call.
pub fn digest(data: &[u8]) -> [u8; 32] {
    use io::Write;
    let mut writer = Writer::default();
    writer
        .write_all(data)
        .expect("sha256d::Writer is infallible");
    writer.finish()
}
