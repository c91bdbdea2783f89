use std::{
    fs::File,
    io::{self, BufWriter, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use aulos_cache::{cache_for, CacheId, LruDiskCache};
use aulos_net::{Headers, HttpTransfer, NetError, TransferSink};

use crate::{
    config::StreamEnv,
    error::{StreamError, StreamResult},
    reader::FileReadStream,
    uri::{resolve, ResolvedUri},
};

/// Open mode flags requested by the consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    bits: u32,
}

impl OpenFlags {
    pub const NONE: OpenFlags = OpenFlags { bits: 0 };
    pub const READ: OpenFlags = OpenFlags { bits: 1 };
    pub const WRITE: OpenFlags = OpenFlags { bits: 1 << 1 };
    pub const PREFETCH: OpenFlags = OpenFlags { bits: 1 << 2 };

    pub fn contains(self, other: OpenFlags) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags {
            bits: self.bits | rhs.bits,
        }
    }
}

/// Lifecycle of one open.
///
/// `Idle → (Cached | Loading) → (Finished | Error)`; transitions are one-way
/// within a single open. The final state drives the destruction policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Cached,
    Loading,
    Finished,
    Error,
}

/// State shared between the consumer-facing stream and its downloader.
struct Shared {
    state: Mutex<StreamState>,
    /// One-shot start gate. Set when the pre-cache threshold is reached or
    /// when the transfer terminates, whichever comes first; the flag is
    /// re-checked after every wake so delivery is exactly-once.
    started: Mutex<bool>,
    start_cond: Condvar,
    interrupted: AtomicBool,
    /// Total length declared by `Content-Length`, or the finalized length
    /// for cached opens. Zero until known.
    total_length: Mutex<u64>,
    content_type: Mutex<Option<String>>,
}

impl Shared {
    fn new(content_type: Option<String>) -> Self {
        Self {
            state: Mutex::new(StreamState::Idle),
            started: Mutex::new(false),
            start_cond: Condvar::new(),
            interrupted: AtomicBool::new(false),
            total_length: Mutex::new(0),
            content_type: Mutex::new(content_type),
        }
    }

    fn signal_started(&self) {
        let mut started = self.started.lock();
        if !*started {
            *started = true;
            self.start_cond.notify_all();
        }
    }

    fn wait_started(&self) {
        let mut started = self.started.lock();
        while !*started {
            self.start_cond.wait(&mut started);
        }
    }
}

/// Consumer-facing seekable byte stream over a remote URL.
///
/// Opening either serves a finalized cache entry directly or spawns a
/// downloader thread that writes the body into a new cache entry while a
/// [`FileReadStream`] over the same file serves reads. The caller is gated on
/// open until a pre-cache threshold of bytes is on disk (or the transfer
/// terminated first), so decoders probing the head of the file do not race
/// the network.
pub struct HttpDataStream {
    cache: Arc<LruDiskCache>,
    cache_id: CacheId,
    display_uri: String,
    shared: Arc<Shared>,
    reader: Option<Arc<FileReadStream>>,
    download: Option<thread::JoinHandle<()>>,
}

impl HttpDataStream {
    /// Open `raw_uri` for reading.
    ///
    /// Accepts plain `http(s)://` URIs and the `musikcube://remote-track/`
    /// envelope. The write flag is rejected; read and prefetch flags are
    /// accepted. On a cache hit this returns immediately without network
    /// traffic; otherwise it blocks until the pre-cache threshold has been
    /// written or the transfer terminated.
    pub fn open(env: &StreamEnv, raw_uri: &str, flags: OpenFlags) -> StreamResult<Self> {
        if flags.contains(OpenFlags::WRITE) {
            return Err(StreamError::WriteUnsupported);
        }

        let settings = env.settings.clone().clamped();
        let cache = cache_for(&env.cache_dir, settings.max_cache_files as usize)?;

        let ResolvedUri {
            transfer_uri,
            display_uri,
            content_type,
            request_headers,
        } = resolve(raw_uri)?;
        let cache_id = CacheId::from_uri(&transfer_uri);

        let shared = Arc::new(Shared::new(content_type));

        if cache.cached(cache_id) {
            match cache.open_read(cache_id) {
                Some((file, info)) => {
                    let reader = FileReadStream::finalized(file)?;

                    *shared.state.lock() = StreamState::Cached;
                    *shared.total_length.lock() = info.len;
                    {
                        let mut content_type = shared.content_type.lock();
                        if content_type.is_none() {
                            *content_type = Some(info.content_type);
                        }
                    }

                    debug!(id = %cache_id, "serving from cache");
                    return Ok(Self {
                        cache,
                        cache_id,
                        display_uri,
                        shared,
                        reader: Some(Arc::new(reader)),
                        download: None,
                    });
                }
                None => {
                    // The finalized body is unreadable; clear it and fall
                    // through to a fresh download.
                    warn!(id = %cache_id, "finalized entry unreadable, re-downloading");
                    cache.delete(cache_id);
                }
            }
        }

        let write_file = cache.open_write(cache_id)?;

        let spawned = (|| -> StreamResult<(Arc<FileReadStream>, thread::JoinHandle<()>)> {
            let read_file = cache.open_read_partial(cache_id).ok_or_else(|| {
                StreamError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "in-progress cache entry vanished before reader attach",
                ))
            })?;

            let reader = Arc::new(FileReadStream::streaming(read_file, None));
            let transfer = HttpTransfer::new(&env.net)?;

            let sink = DownloadSink {
                shared: Arc::clone(&shared),
                reader: Arc::clone(&reader),
                writer: BufWriter::new(write_file),
                chunk_bytes: settings.chunk_bytes,
                precache_bytes: settings.precache_bytes,
                written: 0,
                total_written: Some(0),
            };

            *shared.state.lock() = StreamState::Loading;
            debug!(id = %cache_id, uri = %transfer_uri, "download starting");

            let thread_shared = Arc::clone(&shared);
            let download = thread::Builder::new()
                .name("aulos-download".into())
                .spawn(move || {
                    run_download(thread_shared, transfer, transfer_uri, request_headers, sink);
                })?;

            Ok((reader, download))
        })();

        let (reader, download) = match spawned {
            Ok(parts) => parts,
            Err(err) => {
                // Never leave an in-progress slot behind on a failed open.
                cache.delete(cache_id);
                return Err(err);
            }
        };

        // Gate the caller until enough bytes are on disk to start decoding,
        // or the transfer terminated first.
        shared.wait_started();

        Ok(Self {
            cache,
            cache_id,
            display_uri,
            shared,
            reader: Some(reader),
            download: Some(download),
        })
    }

    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.reader.as_ref().map_or(0, |reader| reader.read(buf))
    }

    pub fn set_position(&self, position: u64) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|reader| reader.set_position(position))
    }

    pub fn position(&self) -> u64 {
        self.reader.as_ref().map_or(0, |reader| reader.position())
    }

    pub fn eof(&self) -> bool {
        match &self.reader {
            Some(reader) => reader.position() >= *self.shared.total_length.lock(),
            None => true,
        }
    }

    /// Declared total length: `Content-Length` for live transfers, the
    /// finalized body length for cached opens. Zero while unknown.
    pub fn length(&self) -> u64 {
        *self.shared.total_length.lock()
    }

    pub fn content_type(&self) -> Option<String> {
        self.shared.content_type.lock().clone()
    }

    /// The consumer-visible URI: the envelope's `originalUri`, or the input
    /// URI verbatim.
    pub fn uri(&self) -> &str {
        &self.display_uri
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    /// The underlying file is seekable and the reader blocks across the
    /// download front.
    pub fn seekable(&self) -> bool {
        true
    }

    pub fn can_prefetch(&self) -> bool {
        true
    }

    /// Unblock in-flight reads and instruct the transfer to abort at its next
    /// cancellation poll. Idempotent; teardown completes in `close`.
    pub fn interrupt(&self) {
        if let Some(reader) = &self.reader {
            reader.interrupt();
        }
        self.shared.interrupted.store(true, Ordering::SeqCst);
    }

    /// Interrupt, join the downloader, and drop the reader. Subsequent reads
    /// return 0 and seeks return false.
    pub fn close(&mut self) -> bool {
        self.interrupt();

        if let Some(handle) = self.download.take() {
            if handle.join().is_err() {
                warn!(id = %self.cache_id, "download thread panicked");
            }
        }

        self.reader = None;
        true
    }
}

impl Drop for HttpDataStream {
    /// A finished download becomes a finalized cache entry; a cached open
    /// leaves the cache untouched; anything else (error, interrupted or
    /// abandoned load) is deleted so a later open re-attempts cleanly.
    fn drop(&mut self) {
        self.close();

        match *self.shared.state.lock() {
            StreamState::Finished => {
                let content_type = self.shared.content_type.lock().clone().unwrap_or_default();
                if let Err(err) = self.cache.finalize(self.cache_id, &content_type) {
                    warn!(id = %self.cache_id, %err, "failed to finalize cache entry");
                }
            }
            StreamState::Cached => {}
            _ => self.cache.delete(self.cache_id),
        }
    }
}

/// Transfer-facing half of the stream: writes body chunks to the cache entry,
/// publishes flushed bytes to the reader at the chunk cadence, and fires the
/// one-shot pre-cache signal.
struct DownloadSink {
    shared: Arc<Shared>,
    reader: Arc<FileReadStream>,
    writer: BufWriter<File>,
    chunk_bytes: u64,
    precache_bytes: u64,
    /// Bytes written since the last flush/publication.
    written: u64,
    /// Body bytes accumulated toward the pre-cache threshold; `None` once
    /// the start gate has been signaled.
    total_written: Option<u64>,
}

impl TransferSink for DownloadSink {
    fn on_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(len) = value.parse::<u64>() {
                *self.shared.total_length.lock() = len;
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            let mut content_type = self.shared.content_type.lock();
            // The URI envelope's type wins over the response header.
            if content_type.is_none() {
                *content_type = Some(value.to_string());
            }
        }
    }

    fn on_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk)?;
        self.written += chunk.len() as u64;

        if self.written >= self.chunk_bytes {
            // Flush before publishing so a reader that observes the new
            // length finds the bytes in the file.
            self.writer.flush()?;
            self.reader.add(self.written);
            self.written = 0;
        }

        if let Some(total) = self.total_written.as_mut() {
            *total += chunk.len() as u64;
            if *total >= self.precache_bytes {
                self.shared.signal_started();
                self.total_written = None;
            }
        }

        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }
}

fn run_download(
    shared: Arc<Shared>,
    transfer: HttpTransfer,
    uri: String,
    request_headers: Headers,
    mut sink: DownloadSink,
) {
    let result = transfer.run(&uri, &request_headers, &mut sink);

    {
        let mut state = shared.state.lock();
        *state = match &result {
            Ok(()) => StreamState::Finished,
            Err(NetError::Interrupted) => {
                debug!(%uri, "download interrupted");
                StreamState::Error
            }
            Err(err) => {
                warn!(%uri, %err, "download failed");
                StreamState::Error
            }
        };
    }

    let DownloadSink {
        reader,
        mut writer,
        written,
        ..
    } = sink;

    // Publish any residual bytes below the chunk threshold, then freeze the
    // reader so pending reads observe the terminator.
    if written > 0 && writer.flush().is_ok() {
        reader.add(written);
    }
    reader.completed();

    // Covers transfers that terminated before the pre-cache threshold was
    // ever reached (small bodies, failures).
    shared.signal_started();

    // The cache write handle drops with `writer`.
}
