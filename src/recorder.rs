//! In-memory response sink handed to the registered handler.

use std::io;

use http::{HeaderMap, StatusCode};

/// Captures status, headers and the fully buffered body written by a
/// handler. No socket is involved.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response status. Only the first call has an effect.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    /// Final status; `200 OK` when the handler never set one.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response headers. Still mutable after the status is written; the
    /// map as it stands when the handler returns is what the script sees.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Append bytes to the body, implicitly writing `200 OK` first.
    pub fn write_body(&mut self, bytes: &[u8]) {
        self.write_header(StatusCode::OK);
        self.body.extend_from_slice(bytes);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        let status = self.status();
        (status, self.headers, self.body)
    }
}

impl io::Write for ResponseRecorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_body(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
