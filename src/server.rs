use std::{
    fmt::Display,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    os::fd::AsRawFd,
    path::PathBuf,
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{cli::Config, error::RequestError, error::SendError, sender::FileSender};

const REQUEST_HEAD_SIZE: usize = 4096;
const MAX_HEADERS: usize = 32;
const LISTEN_BACKLOG: i32 = 128;
const INDEX_FILE: &str = "index.html";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Method {
    Get,
    Head,
}

#[derive(Debug, Eq, PartialEq)]
struct Request {
    method: Method,
    path: String,
}

/// Serves files below a root directory, one connection at a time.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    root: PathBuf,
    io_timeout: Option<Duration>,
    sender: FileSender,
}

impl Server {
    pub fn bind(config: &Config) -> io::Result<Self> {
        let socket = Socket::new(
            Domain::for_address(config.addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&config.addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        Ok(Self {
            listener: socket.into(),
            root: config.root.clone(),
            io_timeout: config.io_timeout,
            sender: FileSender::new().chunk_size(config.chunk_size),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(&self) -> ! {
        tracing::info!(message = "Accepting requests.", addr = ?self.local_addr(), root = %self.root.display());
        loop {
            if let Err(err) = self.serve_one() {
                tracing::error!(message = "Accept failed", error = %err);
            }
        }
    }

    /// Accepts one connection, answers one request on it and closes it.
    /// Only a failed accept is returned; request failures are logged.
    pub fn serve_one(&self) -> io::Result<()> {
        let (stream, peer) = self.listener.accept()?;
        let span = tracing::info_span!("connection", peer = %peer);
        let _enter = span.enter();

        let mut connection = match Connection::new(stream, self.io_timeout) {
            Ok(connection) => connection,
            Err(err) => {
                tracing::error!(message = "Could not configure connection", error = %err);
                return Ok(());
            }
        };
        tracing::debug!(message = "Accepted connection", socket = %connection);

        let request = match read_request(&mut connection) {
            Ok(request) => request,
            Err(err) => {
                let (code, reason) = err.status();
                tracing::debug!(message = "Rejected request", error = %err, status = code);
                if let Err(err) = write_status(&mut connection, code, reason) {
                    tracing::debug!(message = "Could not send rejection", error = %err);
                }
                return Ok(());
            }
        };
        tracing::debug!(message = "Successfully parsed request", method = ?request.method, path = %request.path);

        if let Err(err) = self.respond(&mut connection, &request) {
            tracing::error!(message = "Failed to answer request", path = %request.path, error = %err);
        }
        Ok(())
    }

    fn respond(&self, connection: &mut Connection, request: &Request) -> io::Result<()> {
        let path = self.root.join(&request.path);
        let opened = match self.sender.open(&path) {
            Ok(opened) => opened,
            Err(SendError::NotFound { path }) => {
                tracing::debug!(message = "No such file", path = %path.display());
                return write_status(connection, 404, "Not Found");
            }
            Err(err) => {
                tracing::error!(message = "Could not open file", path = %path.display(), error = %err);
                return write_status(connection, 500, "Internal Server Error");
            }
        };

        // Content-Length is the size at open time and the body never goes past
        // it. A file that shrinks while streaming ends the body short, and the
        // closed connection tells the client.
        let size = opened.size();
        write!(
            connection,
            "HTTP/1.1 200 OK\r\nContent-Length: {size}\r\nConnection: close\r\n\r\n"
        )?;
        if request.method == Method::Head {
            return connection.flush();
        }

        match opened.stream_at_most(size, connection) {
            Ok(_) => Ok(()),
            Err(SendError::Io { source, transferred }) => {
                tracing::debug!(message = "Body cut short", transferred);
                Err(source)
            }
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
        }
    }
}

/// An accepted socket. Closed on drop.
#[derive(Debug)]
struct Connection(TcpStream);

impl Connection {
    fn new(stream: TcpStream, io_timeout: Option<Duration>) -> io::Result<Self> {
        stream.set_read_timeout(io_timeout)?;
        stream.set_write_timeout(io_timeout)?;
        Ok(Connection(stream))
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_raw_fd().fmt(f)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::debug!(stream = %self, "Dropping tcp stream");
    }
}

fn read_request<R: Read>(stream: &mut R) -> Result<Request, RequestError> {
    let mut buf = [0u8; REQUEST_HEAD_SIZE];
    let len = read_head(stream, &mut buf)?;
    parse_request(&buf[..len])
}

/// Reads until the buffer holds a complete request head.
fn read_head<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<usize, RequestError> {
    let mut filled = 0;
    loop {
        let read = match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        filled += read;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        if req.parse(&buf[..filled])?.is_complete() {
            return Ok(filled);
        }
        if filled == buf.len() {
            return Err(RequestError::Partial(buf.len()));
        }
    }
}

fn parse_request(buf: &[u8]) -> Result<Request, RequestError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    if req.parse(buf)?.is_partial() {
        return Err(RequestError::Partial(buf.len()));
    }

    let method = match req.method {
        Some("GET") => Method::Get,
        Some("HEAD") => Method::Head,
        Some(other) => return Err(RequestError::MethodNotAllowed(other.to_owned())),
        None => return Err(RequestError::MissingMethod),
    };
    let path = parse_path(req.path)?;
    Ok(Request { method, path })
}

/// Turns a request target into a path relative to the served root.
fn parse_path(path: Option<&str>) -> Result<String, RequestError> {
    let Some(path) = path else {
        return Ok(INDEX_FILE.to_owned());
    };
    let path = match path.split_once(['?', '#']) {
        Some((path, _)) => path,
        None => path,
    };
    let Some(path) = path.strip_prefix('/') else {
        return Err(RequestError::PathDidNotStartWithSlash);
    };
    // "//etc/passwd" would otherwise join as an absolute path.
    let path = path.trim_start_matches('/');
    if path.split('/').any(|segment| segment == "..") {
        return Err(RequestError::PathContainedDotDot(path.to_owned()));
    }
    if path.is_empty() || path.ends_with('/') {
        return Ok(format!("{path}{INDEX_FILE}"));
    }
    Ok(path.to_owned())
}

fn write_status<W: Write>(sink: &mut W, code: u16, reason: &str) -> io::Result<()> {
    let body = format!("{code} {reason}\n");
    write!(
        sink,
        "HTTP/1.1 {code} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::CHUNK_SIZE;
    use rand::RngCore;
    use std::path::Path;

    struct Response {
        code: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Response {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        }
    }

    fn config(root: &Path) -> Config {
        Config {
            root: root.to_path_buf(),
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            io_timeout: Some(Duration::from_secs(5)),
            chunk_size: CHUNK_SIZE,
        }
    }

    fn roundtrip(root: &Path, request: &[u8]) -> anyhow::Result<Response> {
        let server = Server::bind(&config(root))?;
        let addr = server.local_addr()?;
        let handle = std::thread::spawn(move || server.serve_one());

        let mut client = TcpStream::connect(addr)?;
        client.set_read_timeout(Some(Duration::from_secs(5)))?;
        client.write_all(request)?;
        let mut raw = Vec::new();
        client.read_to_end(&mut raw)?;
        handle.join().expect("Join")?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        let httparse::Status::Complete(head_len) = response.parse(&raw)? else {
            anyhow::bail!("Incomplete response head");
        };
        Ok(Response {
            code: response.code.unwrap_or_default(),
            headers: response
                .headers
                .iter()
                .map(|header| {
                    (
                        header.name.to_owned(),
                        String::from_utf8_lossy(header.value).into_owned(),
                    )
                })
                .collect(),
            body: raw[head_len..].to_vec(),
        })
    }

    #[test]
    fn serves_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("hello.txt"), b"hello")?;

        let response = roundtrip(dir.path(), b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
        assert_eq!(response.code, 200);
        assert_eq!(response.header("Content-Length"), Some("5"));
        assert_eq!(response.body, b"hello");
        Ok(())
    }

    #[test]
    fn serves_multi_chunk_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut contents = vec![0u8; 3 * CHUNK_SIZE + 17];
        rand::thread_rng().fill_bytes(&mut contents);
        std::fs::write(dir.path().join("blob.bin"), &contents)?;

        let response = roundtrip(dir.path(), b"GET /blob.bin?v=2 HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 200);
        assert_eq!(response.body, contents);
        Ok(())
    }

    #[test]
    fn root_serves_index() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("index.html"), b"home")?;

        let response = roundtrip(dir.path(), b"GET / HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 200);
        assert_eq!(response.body, b"home");
        Ok(())
    }

    #[test]
    fn head_has_no_body() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("hello.txt"), b"hello")?;

        let response = roundtrip(dir.path(), b"HEAD /hello.txt HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 200);
        assert_eq!(response.header("Content-Length"), Some("5"));
        assert!(response.body.is_empty());
        Ok(())
    }

    #[test]
    fn missing_file_is_404() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = roundtrip(dir.path(), b"GET /missing.txt HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 404);
        Ok(())
    }

    #[test]
    fn directory_is_404() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        let response = roundtrip(dir.path(), b"GET /sub HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 404);
        Ok(())
    }

    #[test]
    fn path_through_a_file_is_404() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("hello.txt"), b"hello")?;
        let response = roundtrip(dir.path(), b"GET /hello.txt/x HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 404);
        Ok(())
    }

    #[test]
    fn traversal_is_403() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = roundtrip(dir.path(), b"GET /../secret HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 403);
        Ok(())
    }

    #[test]
    fn post_is_405() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = roundtrip(dir.path(), b"POST /hello.txt HTTP/1.1\r\n\r\n")?;
        assert_eq!(response.code, 405);
        Ok(())
    }

    #[test]
    fn garbage_is_400() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = roundtrip(dir.path(), b"garbage\r\n\r\n")?;
        assert_eq!(response.code, 400);
        Ok(())
    }

    #[test]
    fn oversized_head_is_400() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut request = b"GET /".to_vec();
        request.resize(REQUEST_HEAD_SIZE, b'a');
        let response = roundtrip(dir.path(), &request)?;
        assert_eq!(response.code, 400);
        Ok(())
    }

    #[test]
    fn parse_path_variants() {
        assert_eq!(parse_path(None).unwrap(), "index.html");
        assert_eq!(parse_path(Some("/")).unwrap(), "index.html");
        assert_eq!(parse_path(Some("/docs/")).unwrap(), "docs/index.html");
        assert_eq!(parse_path(Some("/a/b.txt?x=1")).unwrap(), "a/b.txt");
        assert_eq!(parse_path(Some("//etc/passwd")).unwrap(), "etc/passwd");
        assert_eq!(parse_path(Some("/a..b")).unwrap(), "a..b");
        assert!(matches!(
            parse_path(Some("hello.txt")),
            Err(RequestError::PathDidNotStartWithSlash)
        ));
        assert!(matches!(
            parse_path(Some("/a/../../etc/passwd")),
            Err(RequestError::PathContainedDotDot(_))
        ));
    }

    #[test]
    fn parse_request_methods() {
        let request = parse_request(b"HEAD /x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(
            request,
            Request {
                method: Method::Head,
                path: "x".to_owned()
            }
        );
        assert!(matches!(
            parse_request(b"DELETE /x HTTP/1.1\r\n\r\n"),
            Err(RequestError::MethodNotAllowed(method)) if method == "DELETE"
        ));
    }

    #[test]
    fn read_head_across_reads() {
        let mut stream = io::Cursor::new(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n".to_vec());
        let mut buf = [0u8; REQUEST_HEAD_SIZE];
        let len = read_head(&mut stream, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");

        let mut truncated = io::Cursor::new(b"GET /x HTTP/1.1\r\n".to_vec());
        let err = read_head(&mut truncated, &mut buf).unwrap_err();
        assert!(matches!(err, RequestError::Io(ref err) if err.kind() == io::ErrorKind::UnexpectedEof));
    }
}
