//! zlib-stream transport decompression
//!
//! With `compress=zlib-stream` the whole connection is one zlib stream. Binary
//! frames are fed into a shared inflater; a message is complete once the
//! buffered input ends with the `00 00 ff ff` sync-flush marker.

use flate2::{Decompress, FlushDecompress, Status};

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const OUTPUT_CHUNK: usize = 32 * 1024;

/// Inflater for one gateway connection
pub struct Inflater {
    decompress: Decompress,
    input: Vec<u8>,
    output: Vec<u8>,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("buffered", &self.input.len())
            .finish_non_exhaustive()
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            input: Vec::new(),
            output: Vec::with_capacity(OUTPUT_CHUNK),
        }
    }

    /// Feed one binary frame; returns the decoded message once complete
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<String>, std::io::Error> {
        self.input.extend_from_slice(frame);
        if !self.input.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        self.output.clear();
        let mut consumed = 0;
        loop {
            if self.output.capacity() - self.output.len() < OUTPUT_CHUNK {
                self.output.reserve(OUTPUT_CHUNK);
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(&self.input[consumed..], &mut self.output, FlushDecompress::Sync)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            consumed += (self.decompress.total_in() - before_in) as usize;

            // A full output buffer may hide pending output even with all input consumed
            let output_full = self.output.len() == self.output.capacity();
            let progressed = self.decompress.total_in() != before_in
                || self.decompress.total_out() != before_out;
            if matches!(status, Status::StreamEnd)
                || !progressed
                || (consumed >= self.input.len() && !output_full)
            {
                break;
            }
        }
        self.input.clear();

        String::from_utf8(std::mem::take(&mut self.output))
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
