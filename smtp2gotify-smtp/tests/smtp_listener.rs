//! End-to-end tests: the SMTP protocol served by the shared listener over TCP.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use argon2::Params;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use smtp2gotify_common::{
    Signal,
    config::ServerTimeouts,
    error::SinkError,
    listener::Listener,
    traits::sink::{Notification, NotificationSink},
};
use smtp2gotify_smtp::{
    Backend, Limits, Smtp,
    auth::{Credentials, hash_password_with},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf},
    sync::broadcast,
    task::JoinHandle,
};

/// `\0admin\0test123`
const PLAIN: &str = "AGFkbWluAHRlc3QxMjM=";

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for Recorder {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Server {
    address: SocketAddr,
    sink: Arc<Recorder>,
    shutdown: broadcast::Sender<Signal>,
    task: JoinHandle<()>,
}

async fn serve(limits: Limits) -> Server {
    let hash = hash_password_with("test123", Params::new(8, 1, 1, None).unwrap()).unwrap();
    let credentials = Credentials::new("admin", hash).unwrap();

    let (shutdown, _) = broadcast::channel(4);
    let sink = Arc::new(Recorder::default());
    let backend = Backend::new(
        Arc::new(credentials),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        limits,
        shutdown.clone(),
    );

    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();

    let listener = Listener::new(
        Smtp::new(backend, "relay.test", ServerTimeouts::default()),
        address,
    );
    listener.init().unwrap();

    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move {
        listener.serve_on(socket, signal).await.unwrap();
    });

    Server {
        address,
        sink,
        shutdown,
        task,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(address: SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(address).await.unwrap().into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// The final line of the next reply.
    async fn reply(&mut self) -> String {
        loop {
            let line = self.line().await;
            if line.as_bytes().get(3) != Some(&b'-') {
                return line;
            }
        }
    }

    async fn command(&mut self, line: &str) -> String {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
        self.reply().await
    }
}

#[tokio::test]
async fn message_becomes_notification() {
    let server = serve(Limits::default()).await;
    let mut client = Client::connect(server.address).await;

    assert_eq!(client.line().await, "220 relay.test ESMTP smtp2gotify ready");
    assert_eq!(client.command("EHLO sensor.local").await, "250 8BITMIME");
    assert_eq!(
        client.command(&format!("AUTH PLAIN {PLAIN}")).await,
        "235 Authentication successful"
    );
    assert_eq!(client.command("MAIL FROM:<sensor@local>").await, "250 OK");
    assert_eq!(client.command("RCPT TO:<admin@example.com>").await, "250 OK");
    assert_eq!(
        client.command("DATA").await,
        "354 End data with <CR><LF>.<CR><LF>"
    );
    assert_eq!(
        client
            .command("Subject: Backup finished\r\n\r\nAll 3 volumes copied\r\n.")
            .await,
        "250 OK"
    );
    assert_eq!(client.command("QUIT").await, "221 relay.test closing connection");

    server.shutdown.send(Signal::Shutdown).unwrap();
    server.task.await.unwrap();

    assert_eq!(
        *server.sink.sent.lock().unwrap(),
        vec![Notification::new("Backup finished", "All 3 volumes copied\r\n")]
    );
}

#[tokio::test]
async fn connection_limit() {
    let server = serve(Limits {
        max_connections: 1,
        ..Limits::default()
    })
    .await;

    let mut first = Client::connect(server.address).await;
    assert_eq!(first.line().await, "220 relay.test ESMTP smtp2gotify ready");

    let mut second = Client::connect(server.address).await;
    assert_eq!(
        second.line().await,
        "421 Too many connections, try again later"
    );

    assert_eq!(first.command("QUIT").await, "221 relay.test closing connection");
    drop(first);

    // The permit is released once the first session has finished
    let mut third = None;
    for _ in 0..50 {
        let mut client = Client::connect(server.address).await;
        if client.line().await.starts_with("220") {
            third = Some(client);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(third.is_some(), "connection slot was never released");
}

#[tokio::test]
async fn shutdown_reaches_open_sessions() {
    let server = serve(Limits::default()).await;
    let mut client = Client::connect(server.address).await;
    client.line().await;
    client.command("EHLO sensor.local").await;

    server.shutdown.send(Signal::Shutdown).unwrap();
    assert_eq!(client.line().await, "421 Server shutting down");

    server.task.await.unwrap();
}
