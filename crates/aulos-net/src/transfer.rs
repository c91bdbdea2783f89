use std::io::Read;

use tracing::{debug, warn};
use url::Url;

use crate::{Headers, NetError, NetOptions, NetResult};

/// Read granularity for the response body. Each filled buffer becomes one
/// `on_body` call, and the interrupt flag is polled once per buffer.
const BODY_CHUNK_BYTES: usize = 16 * 1024;

/// Receives the pieces of a running transfer.
///
/// `on_header` is invoked once per response header after redirects have
/// resolved; names arrive lower-cased the way the HTTP stack canonicalizes
/// them. `on_body` is invoked per chunk in body order; returning an error
/// aborts the transfer. `interrupted` is polled between chunks and aborts the
/// transfer with [`NetError::Interrupted`] when it reports `true`.
pub trait TransferSink {
    fn on_header(&mut self, name: &str, value: &str);
    fn on_body(&mut self, chunk: &[u8]) -> std::io::Result<()>;
    fn interrupted(&self) -> bool;
}

/// A reusable blocking HTTP client configured for media transfers.
pub struct HttpTransfer {
    client: reqwest::blocking::Client,
}

impl HttpTransfer {
    pub fn new(options: &NetOptions) -> NetResult<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(options.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(options.max_redirects))
            .referer(true)
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout);

        if let Some(read_timeout) = options.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }

        if !options.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(NetError::from)?;
        Ok(Self { client })
    }

    /// Run a GET against `url`, streaming the response through `sink`.
    ///
    /// Blocks until the body is exhausted, the sink aborts, the sink reports
    /// interruption, or the connection fails.
    pub fn run(
        &self,
        url: &str,
        request_headers: &Headers,
        sink: &mut impl TransferSink,
    ) -> NetResult<()> {
        let url = Url::parse(url).map_err(|e| NetError::Http(format!("invalid url {url:?}: {e}")))?;

        let mut request = self.client.get(url.clone());
        for (name, value) in request_headers.iter() {
            request = request.header(name, value);
        }

        debug!(%url, "transfer start");
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "transfer rejected");
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                sink.on_header(name.as_str(), value.trim());
            }
        }

        let mut body = response;
        let mut buf = [0u8; BODY_CHUNK_BYTES];
        loop {
            if sink.interrupted() {
                debug!(%url, "transfer interrupted");
                return Err(NetError::Interrupted);
            }

            let n = body.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sink.on_body(&buf[..n])?;
        }

        debug!(%url, "transfer complete");
        Ok(())
    }
}
