//! Log lines written while the generation bar is drawn would otherwise leave pieces of the
//! bar behind on the console.

use log::Record;
use log4rs::encode::{Encode, Write};

/// Wraps another encoder and clears the current line before each record.
#[derive(Debug)]
pub struct PBWrapperEncoder {
    inner: Box<dyn Encode>,
}

impl PBWrapperEncoder {
    pub fn new(inner: Box<dyn Encode>) -> Self {
        Self { inner }
    }
}

impl Encode for PBWrapperEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> Result<(), anyhow::Error> {
        // Clear the whole line and return the cursor to column zero.
        w.write_all(b"\x1B[2K\r")?;
        self.inner.encode(w, record)
    }
}
