use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Larger length prefixes are treated as corruption.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian,
/// and return the frame size. Payloads replay would refuse are not written.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Read one frame and its size in bytes. `Ok(None)` marks the end of the usable
/// log: clean EOF, a torn trailing write, a CRC mismatch or an undecodable payload.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let frame_len = 8 + payload.len() as u64;
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, frame_len)))
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of [`Event`]s.
///
/// Appends are buffered; [`flush_sync`](Wal::flush_sync) makes everything
/// buffered so far durable and [`rollback`](Wal::rollback) throws it away.
/// A crash mid-append leaves a torn last frame which replay drops.
pub struct Wal {
    /// `None` after a rollback failed to reopen the file.
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    /// File length covered by the last successful fsync.
    durable_len: u64,
    pending_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    fail_next_sync: bool,
}

fn unavailable() -> io::Error {
    io::Error::other("WAL unavailable after failed rollback")
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            pending_appends: 0,
            appends_since_compact: 0,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(unavailable)?;
        self.pending_len += write_frame(writer, event)?;
        self.pending_appends += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(unavailable)?;
        writer.flush()?;
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("injected fsync failure"));
        }
        writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Drop every append since the last successful [`flush_sync`](Wal::flush_sync),
    /// both the buffered bytes and any that already reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = match self.writer.take() {
            // Discards the buffer without flushing it.
            Some(writer) => writer.into_parts().0,
            None => OpenOptions::new().append(true).open(&self.path)?,
        };
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_appends);
        self.pending_len = 0;
        self.pending_appends = 0;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// Make the next [`flush_sync`](Wal::flush_sync) fail after its bytes reach the file.
    #[cfg(test)]
    pub fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write `events` to `<path>.tmp` and fsync it. Pair with
    /// [`swap_compact_file`](Wal::swap_compact_file).
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(compact_tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        fs::rename(compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.pending_len = 0;
        self.pending_appends = 0;
        self.writer = Some(BufWriter::new(file));
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All valid events in log order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }

    /// Replay, then cut any unusable tail off the file so later appends follow
    /// the last good frame.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = scan(path)?;
        let file_len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        if file_len > valid_len {
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - valid_len,
                "truncating torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}

fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, frame_len)) = read_frame(&mut reader)? {
        events.push(event);
        valid_len += frame_len;
    }
    Ok((events, valid_len))
}

fn compact_tmp_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}
