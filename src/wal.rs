use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;

/// Write one `[len][bincode][crc32]` frame.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "event too large"));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact payload, or `None` at the end of the valid prefix.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    // A garbage length word must not turn into a huge allocation.
    if len > MAX_WAL_RECORD_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only log of reservation events.
///
/// Each entry is `[u32 len][bincode Event][u32 crc32]`, little endian. A torn
/// or corrupt tail (crash mid-write) ends replay; everything before it is kept
/// and the tail is cut off when the log is reopened for writing.
///
/// Appends are staged in memory and reach the file only in
/// [`Wal::flush_sync`]. A flush that fails is rolled back to the previous end
/// of file, so a failed batch never leaves bytes in front of later ones. If
/// even the rollback fails the log refuses further writes.
pub struct Wal {
    file: File,
    path: PathBuf,
    pending: Vec<u8>,
    pending_events: u64,
    /// End of the last durable frame.
    durable_len: u64,
    failed: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Open for appending. Anything past the valid prefix is truncated.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = Self::scan(path)?;
        Self::open_valid(path, valid_len)
    }

    /// Open for appending after a [`Wal::scan`] that found `valid_len` good bytes.
    pub fn open_valid(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                path = %path.display(),
                discarded = on_disk - valid_len,
                "WAL: truncating invalid tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            durable_len: valid_len,
            failed: false,
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event. Production goes through group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Stage an event. Not durable until [`Wal::flush_sync`]. On error nothing
    /// of this event is staged.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let mark = self.pending.len();
        if let Err(e) = encode_event(&mut self.pending, event) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_events += 1;
        Ok(())
    }

    /// Drop everything staged since the last flush.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_events = 0;
    }

    /// Write and fsync the staged events as one unit.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.failed {
            self.discard_pending();
            return Err(io::Error::other("WAL is in a failed state"));
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_all());
        let staged = self.pending_events;
        self.discard_pending();
        match result {
            Ok(()) => {
                self.durable_len = self.file.metadata()?.len();
                self.appends_since_compact += staged;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Cut the file back to the last durable frame.
    fn rollback(&mut self) {
        let result = self
            .file
            .set_len(self.durable_len)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = result {
            error!(path = %self.path.display(), "WAL rollback failed, refusing further writes: {e}");
            self.failed = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event set next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.file = file;
        self.discard_pending();
        self.failed = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All valid events in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.0)
    }

    /// Valid events plus the byte length of the prefix that holds them.
    pub fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            valid_len += 8 + payload.len() as u64;
        }
        Ok((events, valid_len))
    }
}
