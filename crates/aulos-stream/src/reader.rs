use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

/// Blocking positional reader over a file that is still being written.
///
/// The writer publishes progress with [`add`](Self::add) after flushing bytes
/// to the file and freezes the stream with [`completed`](Self::completed).
/// Reads and seeks past the known-valid length block on an underflow
/// condition until the length advances, the terminator is reached, or
/// [`interrupt`](Self::interrupt) fires. All state lives under one mutex and
/// every mutation that can unblock a waiter broadcasts under that lock.
pub struct FileReadStream {
    state: Mutex<ReaderState>,
    underflow: Condvar,
}

struct ReaderState {
    file: File,
    position: u64,
    /// Bytes known safe to read. Monotonically non-decreasing until the
    /// terminator is set, then frozen.
    length: u64,
    /// Declared end of stream; reads at or past it return 0.
    terminator: Option<u64>,
    interrupted: bool,
}

impl ReaderState {
    fn eof_at(&self, pos: u64) -> bool {
        matches!(self.terminator, Some(t) if pos >= t)
    }
}

impl FileReadStream {
    /// Reader over a finalized cache body: the measured file length doubles
    /// as the terminator, so a read at the tail sees EOF immediately.
    pub fn finalized(mut file: File) -> io::Result<Self> {
        let length = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            state: Mutex::new(ReaderState {
                file,
                position: 0,
                length,
                terminator: Some(length),
                interrupted: false,
            }),
            underflow: Condvar::new(),
        })
    }

    /// Reader attached to an in-progress write.
    ///
    /// With `declared_len = Some(n)` for `n > 0` the stream has a known end;
    /// otherwise the terminator is unset and growth arrives via `add` and
    /// `completed`.
    pub fn streaming(file: File, declared_len: Option<u64>) -> Self {
        let terminator = declared_len.filter(|len| *len > 0);

        Self {
            state: Mutex::new(ReaderState {
                file,
                position: 0,
                length: 0,
                terminator,
                interrupted: false,
            }),
            underflow: Condvar::new(),
        }
    }

    /// Copy up to `buf.len()` bytes from the current position.
    ///
    /// Blocks while the position is at or past the known-valid length, until
    /// the length advances (reads the available window), the terminator is
    /// reached (returns 0), or an interrupt fires (returns 0). A failed file
    /// read returns the short count without retrying.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock();

        loop {
            if state.interrupted || state.eof_at(state.position) {
                return 0;
            }
            if state.position < state.length {
                break;
            }
            self.underflow.wait(&mut state);
        }

        // Window arithmetic stays at u64 width; only the final clamp against
        // the caller's buffer narrows.
        let available = state.length - state.position;
        let want = (buf.len() as u64).min(available) as usize;

        let position = state.position;
        let read = match read_at(&mut state.file, position, &mut buf[..want]) {
            Ok(n) => n,
            Err(err) => {
                warn!(%err, position, "file read failed");
                0
            }
        };

        state.position += read as u64;
        read
    }

    /// Block until `pos` is within the known-valid range, then reposition.
    ///
    /// Returns `false` when interrupted, or when the terminator is set and
    /// `pos` lies beyond it. Seeking exactly to the terminator succeeds; the
    /// next read returns 0.
    pub fn set_position(&self, pos: u64) -> bool {
        let mut state = self.state.lock();

        while pos > state.length && state.terminator.is_none() && !state.interrupted {
            self.underflow.wait(&mut state);
        }

        if state.interrupted {
            return false;
        }
        if matches!(state.terminator, Some(t) if pos > t) {
            return false;
        }

        state.position = pos;
        true
    }

    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    /// Bytes known safe to read.
    pub fn length(&self) -> u64 {
        self.state.lock().length
    }

    /// Writer-side: publish `delta` newly flushed bytes and wake waiters.
    pub fn add(&self, delta: u64) {
        let mut state = self.state.lock();
        state.length += delta;
        trace!(length = state.length, "reader length advanced");
        self.underflow.notify_all();
    }

    /// Writer-side: no more bytes will ever arrive.
    ///
    /// Freezes the length as the terminator. A declared terminator can only
    /// shrink here, covering a transfer that ended short of its declared
    /// length.
    pub fn completed(&self) {
        let mut state = self.state.lock();
        let length = state.length;
        state.terminator = Some(state.terminator.map_or(length, |t| t.min(length)));
        trace!(terminator = ?state.terminator, "reader completed");
        self.underflow.notify_all();
    }

    /// Wake every current and future waiter; subsequent reads and seeks fail
    /// fast. Idempotent.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.underflow.notify_all();
    }
}

fn read_at(file: &mut File, position: u64, buf: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(position))?;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return if filled > 0 { Ok(filled) } else { Err(e) };
            }
        }
    }
    Ok(filled)
}
