use std::path::{Path, PathBuf};

use reqwest::{header, Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = concat!("lecture-archiver/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Write granularity for streamed downloads.
pub const CHUNK_SIZE: usize = 8192;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Request(String),
    #[error("upstream returned {0}")]
    Status(StatusCode),
    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Request(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            FetchError::Request(format!("ConnectError: {}", e))
        } else {
            FetchError::Request(format!("RequestError: {}", e))
        }
    }
}

// ── HTTP client ──────────────────────────────────────────────────────────────

/// Build the client shared by every page and image request of a run.
pub fn build_client(insecure: bool) -> Result<Client, FetchError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/*,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.9"),
    );

    let mut builder = Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| FetchError::Request(e.to_string()))
}

// ── Page fetch ───────────────────────────────────────────────────────────────

/// Fetch a page and decode it as UTF-8 regardless of what the server declares.
pub async fn fetch_page(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let body = response.bytes().await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

// ── Image download ───────────────────────────────────────────────────────────

/// Stream `url` into `dest`, replacing any existing file.
pub async fn download_image(client: &Client, url: &str, dest: &Path) -> Result<(), FetchError> {
    let mut response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let file = File::create(dest).await.map_err(|source| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    let result = stream_body(&mut response, file, dest).await;
    if result.is_err() {
        // never leave a partial file behind
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

async fn stream_body(response: &mut Response, file: File, dest: &Path) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk).await.map_err(io_err)?;
    }
    writer.flush().await.map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_page_forces_utf8() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes/1/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=iso-8859-1")
                    .set_body_bytes("<p>café</p>".as_bytes()),
            )
            .mount(&mock_server)
            .await;

        let client = build_client(false).unwrap();
        let url = format!("{}/notes/1/", mock_server.uri());
        let body = fetch_page(&client, &url).await.unwrap();
        assert_eq!(body, "<p>café</p>");
    }

    #[tokio::test]
    async fn fetch_page_rejects_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = build_client(false).unwrap();
        let err = fetch_page(&client, &mock_server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn fetch_page_reports_connection_failure() {
        let client = build_client(false).unwrap();
        let err = fetch_page(&client, "http://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
    }

    #[tokio::test]
    async fn download_image_streams_to_disk_and_overwrites() {
        let mock_server = MockServer::start().await;
        let body = vec![7u8; CHUNK_SIZE * 3 + 17];
        Mock::given(method("GET"))
            .and(path("/img/big.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("big.png");
        std::fs::write(&dest, b"stale contents that are longer than nothing").unwrap();

        let client = build_client(false).unwrap();
        let url = format!("{}/img/big.png", mock_server.uri());
        download_image(&client, &url, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn download_image_error_status_writes_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("missing.png");

        let client = build_client(false).unwrap();
        let url = format!("{}/missing.png", mock_server.uri());
        let err = download_image(&client, &url, &dest).await.unwrap_err();

        assert!(matches!(err, FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn download_image_truncated_body_leaves_no_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Promise more bytes than are sent, then hang up mid-body.
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 100000\r\n\r\n")
                .await
                .unwrap();
            socket.write_all(&vec![1u8; CHUNK_SIZE * 2]).await.unwrap();
            socket.flush().await.unwrap();
        });

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("cut.png");

        let client = build_client(false).unwrap();
        let url = format!("http://{}/cut.png", addr);
        let err = download_image(&client, &url, &dest).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, FetchError::Request(_)));
        assert!(!dest.exists());
    }
}
