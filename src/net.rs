use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("empty result")]
    Empty,
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Payload(err.to_string())
    }
}

// Implementations must bound every call by their own timeout.
pub trait Transport: Send + Sync {
    fn get_json(&self, url: &str) -> Result<Value, SourceError>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, insecure: bool, user_agent: &str) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        trace!("GET {url}");
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            debug!("{url} answered {status}");
            return Err(SourceError::Status(status));
        }
        let text = resp.text()?;
        if text.trim().is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(serde_json::from_str(&text)?)
    }
}


#[cfg(all(test, feature = "net-tests"))]
mod tests {
    use super::{HttpTransport, SourceError, Transport};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nContent-Type: application/json\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}/feed")
    }

    #[test]
    fn get_json_paths() {
        let transport = HttpTransport::new(Duration::from_secs(2), false, "aqi-tui-test").unwrap();

        let url = serve_once("200 OK", r#"{"status":"ok","data":{"aqi":12}}"#);
        let value = transport.get_json(&url).unwrap();
        assert_eq!(value["data"]["aqi"], 12);

        let url = serve_once("503 Service Unavailable", "{}");
        match transport.get_json(&url) {
            Err(SourceError::Status(code)) => assert_eq!(code.as_u16(), 503),
            other => panic!("expected status error, got {other:?}"),
        }

        let url = serve_once("200 OK", "not json");
        assert!(matches!(
            transport.get_json(&url),
            Err(SourceError::Payload(_))
        ));

        assert!(transport.get_json("http://127.0.0.1:1/feed").is_err());
    }
}
