use core::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::{header, HeaderValue, Request, Version};
use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{cfg::Config, error::TransportError};

const USER_AGENT: &str = concat!("hbench/", env!("CARGO_PKG_VERSION"));
/// Response head size limit, the header count is bounded by it alone.
const MAX_HEAD_LEN: usize = 8192;
/// Headers parsed without allocating.
const INLINE_HEADERS: usize = 64;
/// Each header line takes at least "x:\r\n".
const MAX_HEADERS: usize = MAX_HEAD_LEN / 4;
const READ_CHUNK: usize = 4096;

/// Builds the GET request sent by sessions.
pub fn request(cfg: &Config) -> Result<Request<()>, http::Error> {
    let mut req = Request::get(cfg.target.path.as_str())
        .version(Version::HTTP_11)
        .header(header::HOST, cfg.target.host_header())
        .header(header::USER_AGENT, USER_AGENT);
    if cfg.keep_alive {
        req = req.header(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    req.body(())
}

/// Serializes the given request head into HTTP/1.1 wire format.
pub fn encode(req: &Request<()>) -> Bytes {
    let target = req.uri().path_and_query().map(|v| v.as_str()).unwrap_or("/");

    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(req.method().as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in req.headers() {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// Received response summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Status code of the final response.
    pub status: u16,
    /// Number of bytes consumed, including interim responses.
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    Empty,
    Length(usize),
    Chunked,
    /// Delimited by the connection close.
    Eof,
}

impl Body {
    fn new(status: u16, headers: &[httparse::Header]) -> Result<Self, TransportError> {
        if (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(Self::Empty);
        }

        let mut body = Self::Eof;
        for h in headers {
            if h.name.eq_ignore_ascii_case("transfer-encoding") {
                let chunked = str::from_utf8(h.value)
                    .map(|v| v.rsplit(',').next().unwrap_or_default().trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false);
                if chunked {
                    return Ok(Self::Chunked);
                }
            } else if h.name.eq_ignore_ascii_case("content-length") {
                let len = str::from_utf8(h.value)
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or(TransportError::Framing("invalid content-length"))?;
                body = Self::Length(len);
            }
        }

        Ok(body)
    }
}

/// Reads a single complete response from the given stream.
///
/// The buffer keeps bytes read past the end of the response, so it must be
/// reused for subsequent responses on the same connection.
pub(super) async fn read_response<S>(rd: &mut S, buf: &mut BytesMut) -> Result<Response, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut len = 0;

    let (status, body) = loop {
        match parse_head(buf)? {
            Some((n, status, body)) => {
                buf.advance(n);
                len += n;

                // Skip interim responses, the final one follows.
                if (100..200).contains(&status) && status != 101 {
                    continue;
                }

                break (status, body);
            }
            None => fill(rd, buf).await?,
        }
    };

    len += match body {
        Body::Empty => 0,
        Body::Length(n) => skip(rd, buf, n).await?,
        Body::Chunked => skip_chunked(rd, buf).await?,
        Body::Eof => skip_until_eof(rd, buf).await?,
    };

    Ok(Response { status, len })
}

fn parse_head(buf: &[u8]) -> Result<Option<(usize, u16, Body)>, TransportError> {
    let mut headers = [httparse::EMPTY_HEADER; INLINE_HEADERS];
    match parse_head_with(buf, &mut headers) {
        Err(TransportError::Http(httparse::Error::TooManyHeaders)) => {}
        rc => return rc,
    }

    let mut num_headers = INLINE_HEADERS * 2;
    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; num_headers];
        match parse_head_with(buf, &mut headers) {
            Err(TransportError::Http(httparse::Error::TooManyHeaders)) if num_headers < MAX_HEADERS => {
                num_headers = (num_headers * 2).min(MAX_HEADERS);
            }
            rc => return rc,
        }
    }
}

fn parse_head_with<'b>(
    buf: &'b [u8],
    headers: &mut [httparse::Header<'b>],
) -> Result<Option<(usize, u16, Body)>, TransportError> {
    let mut resp = httparse::Response::new(headers);

    let n = match resp.parse(buf)? {
        Status::Complete(n) if n > MAX_HEAD_LEN => return Err(TransportError::Framing("response head too large")),
        Status::Complete(n) => n,
        Status::Partial if buf.len() > MAX_HEAD_LEN => {
            return Err(TransportError::Framing("response head too large"));
        }
        Status::Partial => return Ok(None),
    };
    let status = resp.code.unwrap_or(0);
    let body = Body::new(status, resp.headers)?;

    Ok(Some((n, status, body)))
}

/// Reads more data into the buffer, failing on EOF.
async fn fill<S>(rd: &mut S, buf: &mut BytesMut) -> Result<(), TransportError>
where
    S: AsyncRead + Unpin,
{
    buf.reserve(READ_CHUNK);
    match rd.read_buf(buf).await? {
        0 => Err(TransportError::Closed),
        _ => Ok(()),
    }
}

/// Discards exactly `n` bytes.
async fn skip<S>(rd: &mut S, buf: &mut BytesMut, n: usize) -> Result<usize, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut left = n;
    loop {
        let k = left.min(buf.len());
        buf.advance(k);
        left -= k;
        if left == 0 {
            return Ok(n);
        }

        fill(rd, buf).await?;
    }
}

async fn skip_chunked<S>(rd: &mut S, buf: &mut BytesMut) -> Result<usize, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut len = 0;

    loop {
        let (n, size) = match httparse::parse_chunk_size(buf) {
            Ok(Status::Complete(v)) => v,
            Ok(Status::Partial) => {
                fill(rd, buf).await?;
                continue;
            }
            Err(..) => return Err(TransportError::Framing("invalid chunk size")),
        };
        buf.advance(n);
        len += n;

        if size == 0 {
            break;
        }

        // Chunk data is followed by CRLF.
        let size = usize::try_from(size)
            .ok()
            .and_then(|v| v.checked_add(2))
            .ok_or(TransportError::Framing("chunk too large"))?;
        len += skip(rd, buf, size).await?;
    }

    // Trailer section, terminated by an empty line.
    loop {
        match buf.windows(2).position(|w| w == b"\r\n") {
            Some(idx) => {
                buf.advance(idx + 2);
                len += idx + 2;
                if idx == 0 {
                    return Ok(len);
                }
            }
            None => fill(rd, buf).await?,
        }
    }
}

async fn skip_until_eof<S>(rd: &mut S, buf: &mut BytesMut) -> Result<usize, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut len = buf.len();
    buf.clear();

    loop {
        buf.reserve(READ_CHUNK);
        match rd.read_buf(buf).await {
            Ok(0) => return Ok(len),
            Ok(n) => {
                len += n;
                buf.clear();
            }
            // Truncated TLS streams still delimit the body.
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(len),
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cfg::Target;

    fn config(keep_alive: bool) -> Config {
        let mut cfg = Config::new(Target::parse("example.com:8080/index.html?q=1", 80).unwrap());
        cfg.keep_alive = keep_alive;
        cfg
    }

    async fn read(data: &[u8]) -> Result<Response, TransportError> {
        let mut rd = data;
        let mut buf = BytesMut::new();
        read_response(&mut rd, &mut buf).await
    }

    #[test]
    fn test_encode_request() {
        let req = request(&config(false)).unwrap();
        let data = encode(&req);
        let data = str::from_utf8(&data).unwrap();

        assert!(data.starts_with("GET /index.html?q=1 HTTP/1.1\r\n"), "{data}");
        assert!(data.contains("host: example.com\r\n"), "{data}");
        assert!(data.contains(&format!("user-agent: {USER_AGENT}\r\n")), "{data}");
        assert!(!data.contains("connection:"), "{data}");
        assert!(data.ends_with("\r\n\r\n"), "{data}");
    }

    #[test]
    fn test_encode_request_keep_alive() {
        let req = request(&config(true)).unwrap();
        let data = encode(&req);
        let data = str::from_utf8(&data).unwrap();

        assert!(data.contains("connection: keep-alive\r\n"), "{data}");
    }

    #[test]
    fn test_encode_request_parses_back() {
        let data = encode(&request(&config(true)).unwrap());

        let mut headers = [httparse::EMPTY_HEADER; 8];
        let mut req = httparse::Request::new(&mut headers);
        assert_eq!(Status::Complete(data.len()), req.parse(&data).unwrap());
        assert_eq!(Some("GET"), req.method);
        assert_eq!(Some("/index.html?q=1"), req.path);
        assert_eq!(Some(1), req.version);
    }

    #[tokio::test]
    async fn test_read_content_length() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let resp = read(data).await.unwrap();

        assert_eq!(Response { status: 200, len: data.len() }, resp);
    }

    #[tokio::test]
    async fn test_read_chunked() {
        let data = b"HTTP/1.1 404 Not Found\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let resp = read(data).await.unwrap();

        assert_eq!(Response { status: 404, len: data.len() }, resp);
    }

    #[tokio::test]
    async fn test_read_until_eof() {
        let data = b"HTTP/1.0 200 OK\r\n\r\nhello world";
        let resp = read(data).await.unwrap();

        assert_eq!(Response { status: 200, len: data.len() }, resp);
    }

    #[tokio::test]
    async fn test_read_no_content() {
        let data = b"HTTP/1.1 204 No Content\r\n\r\n";
        let resp = read(data).await.unwrap();

        assert_eq!(204, resp.status);
    }

    #[tokio::test]
    async fn test_read_skips_interim_response() {
        let data = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let resp = read(data).await.unwrap();

        assert_eq!(Response { status: 200, len: data.len() }, resp);
    }

    #[tokio::test]
    async fn test_read_consecutive_responses() {
        let mut rd: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 503 Unavailable\r\nContent-Length: 1\r\n\r\nb";
        let mut buf = BytesMut::new();

        assert_eq!(200, read_response(&mut rd, &mut buf).await.unwrap().status);
        assert_eq!(503, read_response(&mut rd, &mut buf).await.unwrap().status);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_truncated() {
        assert!(matches!(read(b"").await, Err(TransportError::Closed)));
        assert!(matches!(read(b"HTTP/1.1 200 OK\r\n").await, Err(TransportError::Closed)));
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_read_malformed() {
        assert!(matches!(read(b"garbage\r\n\r\n").await, Err(TransportError::Http(..))));
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nContent-Length: x\r\n\r\n").await,
            Err(TransportError::Framing(..))
        ));
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n").await,
            Err(TransportError::Framing(..))
        ));
    }

    fn response_with_headers(num_headers: usize) -> Vec<u8> {
        let mut data = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n".to_vec();
        for idx in 0..num_headers {
            data.extend_from_slice(format!("X-H{idx}: v\r\n").as_bytes());
        }
        data.extend_from_slice(b"\r\nok");
        data
    }

    #[tokio::test]
    async fn test_read_many_headers() {
        let data = response_with_headers(70);
        assert!(data.len() < 1024);

        let resp = read(&data).await.unwrap();
        assert_eq!(200, resp.status);
        assert_eq!(data.len(), resp.len);

        let data = response_with_headers(500);
        assert!(data.len() < MAX_HEAD_LEN);
        let resp = read(&data).await.unwrap();
        assert_eq!(200, resp.status);
        assert_eq!(data.len(), resp.len);
    }

    #[tokio::test]
    async fn test_read_head_too_large() {
        let data = response_with_headers(2000);
        assert!(data.len() > MAX_HEAD_LEN);

        assert!(matches!(read(&data).await, Err(TransportError::Framing(..))));
    }
}
