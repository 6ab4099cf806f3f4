//! Response recording.
//!
//! [`ResponseWriter`] is the response-writing capability a framework adapter
//! hands to the interceptor. [`ResponseRecorder`] wraps one, forwards every
//! call unchanged and keeps its own bookkeeping of the status and body.

use bytes::{Bytes, BytesMut};
use http::{Extensions, HeaderMap, StatusCode};
use http_body_util::Full;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A sink for an HTTP response, written status first then body.
pub trait ResponseWriter {
    /// Headers that will be (or were) sent.
    fn headers(&self) -> &HeaderMap;

    /// Mutable access to the headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Send the status line.
    fn write_status(&mut self, status: StatusCode);

    /// Send a chunk of body bytes.
    fn write(&mut self, chunk: &[u8]) -> io::Result<usize>;
}

/// Records the status and (optionally) the body passing through a writer.
///
/// Rules:
/// - the first status written is the recorded one; later ones are still
///   forwarded but do not change the record
/// - writing body bytes before any status records `200 OK` and forwards it
/// - with nothing written at all, [`status_code`](Self::status_code) is `200 OK`
/// - only bytes the underlying writer accepted are captured
#[derive(Debug)]
pub struct ResponseRecorder<W> {
    inner: W,
    recording: Arc<Mutex<Recording>>,
    capture_body: bool,
    bytes_written: usize,
}

#[derive(Debug, Default)]
struct Recording {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

fn lock(recording: &Mutex<Recording>) -> MutexGuard<'_, Recording> {
    recording.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<W: ResponseWriter> ResponseRecorder<W> {
    /// Wrap `inner`, buffering body bytes only when `capture_body` is set.
    pub fn new(inner: W, capture_body: bool) -> Self {
        Self {
            inner,
            recording: Arc::default(),
            capture_body,
            bytes_written: 0,
        }
    }

    /// A handle that reads what has been recorded so far, usable after the
    /// recorder itself is gone.
    pub fn handle(&self) -> RecordingHandle {
        RecordingHandle {
            recording: Arc::clone(&self.recording),
            capture_body: self.capture_body,
        }
    }

    /// Record and forward a status.
    pub fn record_status(&mut self, status: StatusCode) {
        {
            let mut recording = lock(&self.recording);
            if recording.status.is_none() {
                recording.status = Some(status);
            }
            recording.headers = self.inner.headers().clone();
        }
        self.inner.write_status(status);
    }

    /// Record and forward body bytes.
    pub fn record_write(&mut self, chunk: &[u8]) -> io::Result<usize> {
        if lock(&self.recording).status.is_none() {
            self.record_status(StatusCode::OK);
        }
        let written = self.inner.write(chunk)?;

        let mut recording = lock(&self.recording);
        if self.bytes_written == 0 {
            // Headers are on the wire with the first body byte.
            recording.headers = self.inner.headers().clone();
        }
        if self.capture_body {
            recording
                .body
                .extend_from_slice(chunk.get(..written).unwrap_or(chunk));
        }
        self.bytes_written += written;
        Ok(written)
    }

    /// The recorded status, `200 OK` when none was written.
    pub fn status_code(&self) -> StatusCode {
        lock(&self.recording).status.unwrap_or(StatusCode::OK)
    }

    /// Whether a status has been recorded explicitly or implicitly.
    pub fn has_status(&self) -> bool {
        lock(&self.recording).status.is_some()
    }

    /// Captured body so far, `None` when capture is disabled.
    pub fn captured_body(&self) -> Option<Bytes> {
        self.handle().body()
    }

    /// Number of body bytes the underlying writer accepted.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Get a reference to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Get a mutable reference to the wrapped writer.
    ///
    /// Writes made through it bypass the recorder.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the recorder, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Read side of a [`ResponseRecorder`].
///
/// Headers are a snapshot taken when the status or the first body bytes
/// were written; changes made after that are not seen.
#[derive(Clone, Debug)]
pub struct RecordingHandle {
    recording: Arc<Mutex<Recording>>,
    capture_body: bool,
}

impl RecordingHandle {
    /// The recorded status, if any was written.
    pub fn status(&self) -> Option<StatusCode> {
        lock(&self.recording).status
    }

    /// Headers as of the last status or first body write.
    pub fn headers(&self) -> HeaderMap {
        lock(&self.recording).headers.clone()
    }

    /// Captured body so far, `None` when capture is disabled.
    pub fn body(&self) -> Option<Bytes> {
        self.capture_body
            .then(|| Bytes::copy_from_slice(&lock(&self.recording).body))
    }
}

impl<W: ResponseWriter> ResponseWriter for ResponseRecorder<W> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.record_status(status);
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.record_write(chunk)
    }
}

impl<W: ResponseWriter> io::Write for ResponseRecorder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.record_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory response that behaves like a wire response: the status can
/// change until the first body byte is written, after which it is fixed.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    extensions: Extensions,
    body: BytesMut,
    committed: bool,
}

impl BufferedResponse {
    /// Create an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status that will be sent, `200 OK` if none was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Body written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether body bytes have been written (the status is final).
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Response extensions carried through to the final response.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Assemble the final `http::Response`.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let status = self.status();
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        *response.extensions_mut() = self.extensions;
        response
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.committed {
            tracing::debug!(
                target: "monoscope::recorder",
                status = status.as_u16(),
                "status written after body; ignored"
            );
            return;
        }
        self.status = Some(status);
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.committed = true;
        self.body.extend_from_slice(chunk);
        Ok(chunk.len())
    }
}
