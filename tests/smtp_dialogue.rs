use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::broadcast,
    task::JoinHandle,
};
use waymark::{
    config::{Config, PluginConfig},
    hooks::Registry,
    listener::Listener,
    plugins, Signal,
};

struct Server {
    address: SocketAddr,
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<()>,
}

async fn start(queue: &Path, size_limit: usize) -> Server {
    let config = Config {
        hostname: "mx.waymark.test".to_string(),
        size_limit,
        plugins: vec![
            PluginConfig::Relay {
                domains: vec!["waymark.test".to_string()],
                clients: Vec::new(),
            },
            PluginConfig::CheckLoop { max_hops: 3 },
            PluginConfig::QueueDir {
                path: queue.to_path_buf(),
            },
        ],
        ..Config::default()
    };
    config.validate().unwrap();

    let mut registry = Registry::new();
    plugins::load(&mut registry, &config.plugins).unwrap();

    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    let (shutdown, receiver) = broadcast::channel(4);

    let listener = Listener::from_config(&config, Arc::new(registry));
    let handle = tokio::spawn(async move {
        listener.serve_on(socket, receiver).await.unwrap();
    });

    Server {
        address,
        shutdown,
        handle,
    }
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
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

    async fn reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .unwrap()
                .unwrap();
            reply.push_str(&line);

            if read == 0 || line.as_bytes().get(3) != Some(&b'-') {
                return reply.trim_end().to_string();
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn command(&mut self, line: &str, expected: &str) -> String {
        self.send(line).await;
        let reply = self.reply().await;
        assert!(
            reply.starts_with(expected),
            "{line}: expected '{expected}', got '{reply}'"
        );
        reply
    }
}

fn queued(directory: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return Vec::new();
    };

    entries
        .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect()
}

#[tokio::test]
async fn delivers_local_mail() {
    let directory = tempfile::tempdir().unwrap();
    let queue = directory.path().join("queue");
    let server = start(&queue, 0).await;

    let mut client = Client::connect(server.address).await;
    assert_eq!(client.reply().await, "220 mx.waymark.test ESMTP");

    client
        .command(
            "EHLO client.example",
            "250 mx.waymark.test Hi 127.0.0.1 [127.0.0.1]; I am so happy to meet you.",
        )
        .await;
    client
        .command("MAIL FROM:<sender@example.org> BODY=8BITMIME", "250 <sender@example.org> sender OK")
        .await;
    client
        .command("RCPT TO:<someone@elsewhere.example>", "550 Relaying denied (#5.7.1)")
        .await;
    client
        .command("RCPT TO:<postmaster@waymark.test>", "250 <postmaster@waymark.test>, recipient ok")
        .await;
    client.command("DATA", "354 go ahead").await;
    client.send("From: sender@example.org").await;
    client.send("Subject: integration").await;
    client.send("").await;
    client.send("..hidden dot").await;
    let reply = client.command(".", "250 Queued as ").await;
    client.command("QUIT", "221 mx.waymark.test closing connection.").await;

    let messages = queued(&queue);
    assert_eq!(messages.len(), 1);

    let id = reply.trim_start_matches("250 Queued as ");
    assert!(queue.join(format!("{id}.eml")).exists());

    let message = &messages[0];
    assert!(message.starts_with("Received: from 127.0.0.1 (HELO client.example) ([127.0.0.1])\r\n\tby mx.waymark.test (waymark/"));
    assert!(message.contains(" with ESMTP id "));
    assert!(message.ends_with("Subject: integration\r\n\r\n.hidden dot\r\n"));

    server.shutdown.send(Signal::Shutdown).unwrap();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn mail_loops_are_refused() {
    let directory = tempfile::tempdir().unwrap();
    let queue = directory.path().join("queue");
    let server = start(&queue, 0).await;

    let mut client = Client::connect(server.address).await;
    client.reply().await;
    client.command("HELO client.example", "250").await;
    client.command("MAIL FROM:<>", "250 <> sender OK").await;
    client.command("RCPT TO:<bounce@waymark.test>", "250").await;
    client.command("DATA", "354").await;
    client.send("Received: from one").await;
    client.send("Received: from two").await;
    client.send("Received: from three").await;
    client.send("").await;
    client.send("looping").await;
    client.command(".", "552 Too many hops (#5.4.6)").await;

    assert!(queued(&queue).is_empty());

    server.shutdown.send(Signal::Shutdown).unwrap();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn pipelined_commands() {
    let directory = tempfile::tempdir().unwrap();
    let queue = directory.path().join("queue");
    let server = start(&queue, 0).await;

    let mut client = Client::connect(server.address).await;
    client.reply().await;
    client.command("EHLO client.example", "250").await;

    client
        .writer
        .write_all(b"MAIL FROM:<a@example.org>\r\nRCPT TO:<b@waymark.test>\r\nDATA\r\n")
        .await
        .unwrap();
    assert!(client.reply().await.starts_with("250 <a@example.org>"));
    assert!(client.reply().await.starts_with("250 <b@waymark.test>"));
    assert_eq!(client.reply().await, "354 go ahead");

    client
        .writer
        .write_all(b"Subject: pipelined\r\n\r\nbody\r\n.\r\nNOOP\r\n")
        .await
        .unwrap();
    assert!(client.reply().await.starts_with("250 Queued as"));
    assert_eq!(client.reply().await, "250 OK");

    assert_eq!(queued(&queue).len(), 1);

    server.shutdown.send(Signal::Shutdown).unwrap();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn oversized_message_then_retry() {
    let directory = tempfile::tempdir().unwrap();
    let queue = directory.path().join("queue");
    let server = start(&queue, 64).await;

    let mut client = Client::connect(server.address).await;
    client.reply().await;
    let reply = client.command("EHLO client.example", "250-").await;
    assert!(reply.ends_with("250 SIZE 64"));

    client.command("MAIL FROM:<a@example.org> SIZE=65", "552 Message too big!").await;

    client.command("MAIL FROM:<a@example.org>", "250").await;
    client.command("RCPT TO:<b@waymark.test>", "250").await;
    client.command("DATA", "354").await;
    client
        .send("Subject: this body will be far larger than sixty-four bytes in total")
        .await;
    client.send("").await;
    client.send("filler filler filler").await;
    client.command(".", "552 Message too big!").await;

    client.command("MAIL FROM:<a@example.org>", "250").await;
    client.command("RCPT TO:<b@waymark.test>", "250").await;
    client.command("DATA", "354").await;
    client.send("Subject: small").await;
    client.command(".", "250 Queued as").await;

    assert_eq!(queued(&queue).len(), 1);

    server.shutdown.send(Signal::Shutdown).unwrap();
    assert_eq!(client.reply().await, "421 mx.waymark.test Server shutting down");
    server.handle.await.unwrap();
}

#[tokio::test]
async fn declared_size_does_not_extend_the_body() {
    let directory = tempfile::tempdir().unwrap();
    let queue = directory.path().join("queue");
    let server = start(&queue, 10_000).await;

    let mut client = Client::connect(server.address).await;
    client.reply().await;
    client.command("EHLO client.example", "250-").await;
    client
        .command("MAIL FROM:<a@example.org> SIZE=5000", "250 <a@example.org> sender OK")
        .await;
    client.command("RCPT TO:<b@waymark.test>", "250").await;
    client.command("DATA", "354 go ahead").await;

    client
        .writer
        .write_all(b"Subject: short\r\n\r\nhi\r\n.\r\nNOOP\r\n")
        .await
        .unwrap();
    assert!(client.reply().await.starts_with("250 Queued as"));
    assert_eq!(client.reply().await, "250 OK");

    let messages = queued(&queue);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].ends_with("Subject: short\r\n\r\nhi\r\n"));

    server.shutdown.send(Signal::Shutdown).unwrap();
    server.handle.await.unwrap();
}
