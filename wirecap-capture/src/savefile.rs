//! Capture files: open for playback, open for writing

use std::path::Path;

use wirecap_core::{Error, Result};

use crate::engine::{CaptureEngine, Session};
use crate::reader::PacketReader;
use crate::writer::DumpFileWriter;

/// Open a capture file for reading
pub fn open_read<E, P>(engine: &E, path: P) -> Result<PacketReader<E::Session>>
where
    E: CaptureEngine,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::EmptyArgument("path"));
    }
    PacketReader::open_offline(engine, path)
}

/// Create a dump file that records frames with the framing of `source`
pub fn open_write<S, P>(source: &PacketReader<S>, path: P) -> Result<DumpFileWriter<S::Dumper>>
where
    S: Session,
    P: AsRef<Path>,
{
    DumpFileWriter::create(source, path.as_ref())
}
