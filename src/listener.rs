use std::{net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};

use crate::{
    config::Config,
    error::ListenerError,
    hooks::Registry,
    internal,
    smtp::session::{Session, SessionConfig},
    Signal,
};

/// Accepts connections and runs a [`Session`] for each
pub struct Listener {
    socket: SocketAddr,
    registry: Arc<Registry>,
    config: Arc<SessionConfig>,
    max_connections: Option<usize>,
}

impl Listener {
    #[must_use]
    pub fn new(socket: SocketAddr, registry: Arc<Registry>, config: Arc<SessionConfig>) -> Self {
        Self {
            socket,
            registry,
            config,
            max_connections: None,
        }
    }

    /// Build a listener for `config.listen` with its session settings
    #[must_use]
    pub fn from_config(config: &Config, registry: Arc<Registry>) -> Self {
        Self::new(config.listen, registry, Arc::new(SessionConfig::from(config)))
            .with_max_connections(config.max_connections)
    }

    /// Cap the number of sessions running at once. Further connections wait
    /// in the kernel backlog until a session ends.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: Option<usize>) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    /// If the address cannot be bound.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), ListenerError> {
        let listener = TcpListener::bind(self.socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: self.socket.to_string(),
                source,
            })?;

        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound socket until [`Signal::Shutdown`], then
    /// wait for every session to finish.
    ///
    /// # Errors
    /// If the bound address of `listener` cannot be read.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let local = listener.local_addr()?;
        internal!(level = INFO, "Listening on {local}");

        let semaphore = self.max_connections.map(|max| Arc::new(Semaphore::new(max)));
        let mut sessions: Vec<JoinHandle<()>> = Vec::default();

        loop {
            tokio::select! {
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(
                            level = INFO,
                            "Listener {local} received shutdown signal, finishing {} session(s) ...",
                            sessions.len()
                        );
                        break;
                    }
                }

                connection = accept(&listener, semaphore.as_ref()) => {
                    let (stream, peer, permit) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            internal!(level = WARN, "Accept failed: {err}");
                            continue;
                        }
                    };

                    tracing::debug!(target: "waymark", %local, %peer, "Connection received");
                    sessions.retain(|session| !session.is_finished());

                    let local = stream.local_addr().unwrap_or(local);
                    let session = Session::create(
                        stream,
                        local,
                        peer,
                        Arc::clone(&self.registry),
                        Arc::clone(&self.config),
                    );
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        let _permit = permit;
                        let id = session.info().id();

                        match session.run(signal).await {
                            Ok(()) => {}
                            Err(err) if err.is_client_error() => {
                                internal!(id = id, level = DEBUG, "Session ended: {err}");
                            }
                            Err(err) => internal!(id = id, level = ERROR, "Session failed: {err}"),
                        }
                    }));
                }
            }
        }

        join_all(sessions).await;
        internal!(level = INFO, "Listener {local} finished");

        Ok(())
    }
}

/// Wait for a session slot, if limited, then for a connection
async fn accept(
    listener: &TcpListener,
    semaphore: Option<&Arc<Semaphore>>,
) -> std::io::Result<(TcpStream, SocketAddr, Option<OwnedSemaphorePermit>)> {
    let permit = match semaphore {
        Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
        None => None,
    };

    let (stream, peer) = listener.accept().await?;
    Ok((stream, peer, permit))
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
        sync::broadcast,
    };

    use super::Listener;
    use crate::{error::ListenerError, hooks::Registry, smtp::session::SessionConfig, Signal};

    async fn start(
        max_connections: Option<usize>,
    ) -> (std::net::SocketAddr, broadcast::Sender<Signal>, tokio::task::JoinHandle<()>) {
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap();
        let (sender, receiver) = broadcast::channel(4);

        let listener = Listener::new(
            address,
            Arc::new(Registry::new()),
            Arc::new(SessionConfig::builder().with_hostname("listener.test").build()),
        )
        .with_max_connections(max_connections);

        let handle = tokio::spawn(async move {
            listener.serve_on(socket, receiver).await.unwrap();
        });

        (address, sender, handle)
    }

    async fn banner(stream: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn serves_and_shuts_down() {
        let (address, shutdown, handle) = start(None).await;

        let mut client = BufReader::new(TcpStream::connect(address).await.unwrap());
        assert_eq!(banner(&mut client).await, "220 listener.test ESMTP\r\n");

        shutdown.send(Signal::Shutdown).unwrap();
        assert_eq!(
            banner(&mut client).await,
            "421 listener.test Server shutting down\r\n"
        );

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn connection_cap() {
        let (address, _shutdown, _handle) = start(Some(1)).await;

        let mut first = BufReader::new(TcpStream::connect(address).await.unwrap());
        assert!(banner(&mut first).await.starts_with("220"));

        let mut second = BufReader::new(TcpStream::connect(address).await.unwrap());
        let waiting = tokio::time::timeout(Duration::from_millis(200), banner(&mut second)).await;
        assert!(waiting.is_err(), "second session should wait for a slot");

        first.get_mut().write_all(b"QUIT\r\n").await.unwrap();
        assert!(banner(&mut first).await.starts_with("221"));

        let line = tokio::time::timeout(Duration::from_secs(5), banner(&mut second))
            .await
            .unwrap();
        assert!(line.starts_with("220"));
    }

    #[tokio::test]
    async fn bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::new(
            taken.local_addr().unwrap(),
            Arc::new(Registry::new()),
            Arc::new(SessionConfig::default()),
        );

        let (_sender, receiver) = broadcast::channel(1);
        assert!(matches!(
            listener.serve(receiver).await,
            Err(ListenerError::BindFailed { .. })
        ));
    }
}
