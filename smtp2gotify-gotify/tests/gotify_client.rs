//! Exercises the client against a minimal HTTP server on localhost.

use pretty_assertions::assert_eq;
use smtp2gotify_common::{
    error::SinkError,
    traits::sink::{Notification, NotificationSink},
};
use smtp2gotify_gotify::{ClientError, GotifyClient};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// A request as the server saw it.
#[derive(Debug)]
struct Request {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Answer exactly one request with `status` and the JSON `reply`.
async fn respond_once(status: &'static str, reply: &'static str) -> (String, JoinHandle<Request>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);

        let mut request_line = String::new();
        stream.read_line(&mut request_line).await.unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .map_or(0, |(_, value)| value.parse::<usize>().unwrap());
        let mut body = vec![0; length];
        stream.read_exact(&mut body).await.unwrap();

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
            reply.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();

        Request {
            request_line: request_line.trim_end().to_string(),
            headers,
            body,
        }
    });

    (url, task)
}

#[tokio::test]
async fn sends_message() {
    let (url, server) = respond_once("200 OK", r#"{"id":1,"appid":1}"#).await;
    let client = GotifyClient::new(&url, "app-token", 4).unwrap();

    client
        .send(&Notification::new("Backup finished", "All volumes copied"))
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.request_line, "POST /message HTTP/1.1");
    assert_eq!(request.header("x-gotify-key"), Some("app-token"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(
        request.json(),
        serde_json::json!({
            "title": "Backup finished",
            "message": "All volumes copied",
            "priority": 4
        })
    );
}

#[tokio::test]
async fn rejected_message() {
    let (url, server) = respond_once(
        "401 Unauthorized",
        r#"{"error":"Unauthorized","errorCode":401,"errorDescription":"you need to provide a valid access token or user credentials to access this api"}"#,
    )
    .await;
    let client = GotifyClient::new(&url, "wrong", 0).unwrap();

    let err = client
        .send(&Notification::new("title", "body"))
        .await
        .unwrap_err();
    server.await.unwrap();

    match err {
        SinkError::Rejected { status, message } => {
            assert_eq!(status, 401);
            assert!(message.starts_with("you need to provide a valid access token"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn rejection_without_body() {
    let (url, server) = respond_once("500 Internal Server Error", "").await;
    let client = GotifyClient::new(&url, "token", 0).unwrap();

    let err = client.create_message("title", "body").await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(
        err,
        ClientError::Status { status: 500, ref message } if message == "Internal Server Error"
    ));
}

#[tokio::test]
async fn unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = GotifyClient::new(&url, "token", 0).unwrap();
    let err = client
        .send(&Notification::new("title", "body"))
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Transport(_)));
}

#[tokio::test]
async fn version() {
    let (url, server) = respond_once(
        "200 OK",
        r#"{"version":"2.6.1","commit":"abc123","buildDate":"2024-11-01T00:00:00Z"}"#,
    )
    .await;
    let client = GotifyClient::new(&url, "token", 0).unwrap();

    let version = client.version().await.unwrap();
    let request = server.await.unwrap();

    assert_eq!(request.request_line, "GET /version HTTP/1.1");
    assert_eq!(version.version, "2.6.1");
    assert_eq!(version.commit, "abc123");
    assert_eq!(version.build_date, "2024-11-01T00:00:00Z");
}
