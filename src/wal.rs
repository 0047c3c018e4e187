//! Append-only log of engine events.
//!
//! Frame layout: `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
//!
//! The log only ever contains bytes that were acknowledged as durable. A flush
//! that fails is cut back to the last durable length before anything else is
//! written; if that cut fails too, the log refuses writes until compaction
//! replaces the file. On open, a torn or corrupt tail is truncated away so new
//! frames never land behind bytes replay would stop at.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Frames larger than this are treated as garbage on replay.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const FRAME_OVERHEAD: u64 = 8;

/// Where the log bytes go. `File` in production.
pub trait LogSink: Write + Send {
    /// Make everything written so far durable.
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the log back to `len` bytes and make the cut durable.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_all()
    }
}

fn encode_frame(out: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Fill `buf`, or report the end of the readable log as `Ok(false)`.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Valid prefix of a log.
pub(crate) struct LogScan {
    pub events: Vec<Event>,
    /// Byte length of the frames in `events`.
    pub valid_len: u64,
}

pub(crate) fn read_frames(reader: impl Read) -> io::Result<LogScan> {
    let mut reader = BufReader::new(reader);
    let mut scan = LogScan {
        events: Vec::new(),
        valid_len: 0,
    };
    loop {
        let mut len_buf = [0u8; 4];
        if !read_frame_part(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            break;
        }
        let mut payload = vec![0u8; len];
        let mut crc_buf = [0u8; 4];
        if !read_frame_part(&mut reader, &mut payload)? || !read_frame_part(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        let Ok(event) = bincode::deserialize::<Event>(&payload) else {
            break;
        };
        scan.events.push(event);
        scan.valid_len += FRAME_OVERHEAD + len as u64;
    }
    Ok(scan)
}

fn scan_file(path: &Path) -> io::Result<LogScan> {
    match File::open(path) {
        Ok(file) => read_frames(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LogScan {
            events: Vec::new(),
            valid_len: 0,
        }),
        Err(e) => Err(e),
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub struct Wal {
    sink: Box<dyn LogSink>,
    path: PathBuf,
    /// Encoded frames not yet handed to the sink.
    pending: Vec<u8>,
    pending_events: u64,
    /// Bytes acknowledged as durable.
    durable_len: u64,
    /// Why the log stopped accepting writes, if it did.
    poisoned: Option<String>,
    appends_since_compact: u64,
}

impl Wal {
    /// Open the log at `path`, returning it with every event it holds.
    /// Anything after the last valid frame is truncated.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let scan = scan_file(path)?;
        let file = open_append(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > scan.valid_len {
            warn!(
                kept = scan.events.len(),
                discarded_bytes = on_disk - scan.valid_len,
                "WAL {}: truncating torn tail",
                path.display()
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self::from_sink(Box::new(file), path.to_path_buf(), scan.valid_len);
        Ok((wal, scan.events))
    }

    /// Wrap an already positioned sink whose first `durable_len` bytes are valid frames.
    pub(crate) fn from_sink(sink: Box<dyn LogSink>, path: PathBuf, durable_len: u64) -> Self {
        Self {
            sink,
            path,
            pending: Vec::new(),
            pending_events: 0,
            durable_len,
            poisoned: None,
            appends_since_compact: 0,
        }
    }

    /// Events currently on disk at `path`, up to the first bad frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan_file(path)?.events)
    }

    fn check_writable(&self) -> io::Result<()> {
        match &self.poisoned {
            Some(reason) => Err(io::Error::other(format!("WAL unavailable: {reason}"))),
            None => Ok(()),
        }
    }

    /// Queue one event for the next `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_writable()?;
        let mut frame = Vec::new();
        encode_frame(&mut frame, event)?;
        self.pending.extend_from_slice(&frame);
        self.pending_events += 1;
        Ok(())
    }

    /// Drop queued events without writing them.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_events = 0;
    }

    /// Write and fsync every queued event. On failure none of them are kept.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_writable()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let written = self
            .sink
            .write_all(&self.pending)
            .and_then(|()| self.sink.flush())
            .and_then(|()| self.sink.sync());
        match written {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.appends_since_compact += self.pending_events;
                self.discard_pending();
                Ok(())
            }
            Err(e) => {
                self.discard_pending();
                self.roll_back();
                Err(e)
            }
        }
    }

    /// Cut the sink back to the durable length after a failed flush.
    fn roll_back(&mut self) {
        match self.sink.truncate(self.durable_len) {
            Ok(()) => warn!(len = self.durable_len, "WAL rolled back failed flush"),
            Err(e) => {
                error!("WAL rollback failed, refusing further writes: {e}");
                self.poisoned = Some(e.to_string());
            }
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over the
    /// log and reopen. A poisoned log is writable again afterwards.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let mut bytes = Vec::new();
        for event in events {
            encode_frame(&mut bytes, event)?;
        }
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.sink = Box::new(open_append(&self.path)?);
        self.durable_len = bytes.len() as u64;
        self.discard_pending();
        self.poisoned = None;
        self.appends_since_compact = 0;
        Ok(())
    }
}
