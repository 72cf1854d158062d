//! REST front end: `GET|POST /{cmd}[/{data}]` becomes one command on the device link.

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::time::Duration;

use han_core::{Delivery, Messenger, RequestError, RestRequest, SendError, Stream};
use tracing::{debug, info, warn};

const MAX_REQUEST_BYTES: usize = 2048;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a request could not be turned into a command.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed HTTP request")]
    Malformed,
    #[error("request too large")]
    TooLarge,
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Parse the request line; `Ok(None)` if more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<RestRequest>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    let status = req.parse(buf).map_err(|_| HttpError::Malformed)?;
    if !status.is_complete() {
        return Ok(None);
    }
    let method = req.method.ok_or(HttpError::Malformed)?;
    let path = req.path.ok_or(HttpError::Malformed)?;
    if !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("POST") {
        return Err(HttpError::MethodNotAllowed(method.to_string()));
    }
    Ok(Some(RestRequest::parse(method, path)?))
}

/// Status line and body for the outcome of a send.
pub fn status_for(result: &Result<Delivery, SendError>) -> (u16, &'static str, String) {
    match result {
        Ok(Delivery::Sent) => (200, "OK", "sent\n".to_string()),
        Ok(Delivery::Acknowledged { attempts }) => {
            (200, "OK", format!("acknowledged after {attempts} attempt(s)\n"))
        }
        Err(SendError::UnknownCommand(name)) => {
            (404, "Not Found", format!("unknown command {name}\n"))
        }
        Err(SendError::AckTimeout { attempts }) => (
            504,
            "Gateway Timeout",
            format!("no acknowledgement after {attempts} attempt(s)\n"),
        ),
        Err(SendError::SeparatorInPayload) => {
            (400, "Bad Request", "data contains a separator\n".to_string())
        }
        Err(SendError::Io(e)) => (502, "Bad Gateway", format!("link error: {e}\n")),
    }
}

fn status_for_error(e: &HttpError) -> (u16, &'static str) {
    match e {
        HttpError::MethodNotAllowed(_) => (405, "Method Not Allowed"),
        HttpError::TooLarge => (413, "Payload Too Large"),
        HttpError::Malformed | HttpError::Request(_) => (400, "Bad Request"),
    }
}

fn write_response<W: Write>(out: &mut W, code: u16, reason: &str, body: &str) -> io::Result<()> {
    write!(
        out,
        "HTTP/1.1 {code} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    out.flush()
}

fn read_request<C: Read>(conn: &mut C) -> Result<RestRequest, HttpError> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = conn.read(&mut chunk).map_err(|_| HttpError::Malformed)?;
        if n == 0 {
            return Err(HttpError::Malformed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(req) = parse_request(&buf)? {
            return Ok(req);
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(HttpError::TooLarge);
        }
    }
}

/// Handle one client: parse, send the command, answer.
pub fn serve_connection<C, S>(
    conn: &mut C,
    messenger: &mut Messenger<S>,
    require_ack: bool,
) -> io::Result<()>
where
    C: Read + Write,
    S: Stream,
{
    let req = match read_request(conn) {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, "rejected request");
            let (code, reason) = status_for_error(&e);
            return write_response(conn, code, reason, &format!("{e}\n"));
        }
    };
    let ack = require_ack.then(|| messenger.ack_policy());
    let result = messenger.send_command(&req.command, &req.data, ack);
    match &result {
        Ok(delivery) => info!(command = %req.command, data = %req.data, ?delivery, "command delivered"),
        Err(e) => warn!(command = %req.command, data = %req.data, error = %e, "command failed"),
    }
    let (code, reason, body) = status_for(&result);
    write_response(conn, code, reason, &body)
}

/// Accept at most one pending client. Returns whether a client was served.
pub fn poll<S: Stream>(
    listener: &TcpListener,
    messenger: &mut Messenger<S>,
    require_ack: bool,
) -> io::Result<bool> {
    let (mut conn, peer) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
        Err(e) => return Err(e),
    };
    debug!(%peer, "client connected");
    conn.set_nonblocking(false)?;
    conn.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    conn.set_write_timeout(Some(CLIENT_TIMEOUT))?;
    if let Err(e) = serve_connection(&mut conn, messenger, require_ack) {
        warn!(%peer, error = %e, "client error");
    }
    Ok(true)
}
