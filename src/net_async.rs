//! Tokio transport: the server acceptor and per-connection session, and the
//! client session driving one PULL, PUSH or LIST exchange.

use crate::protocol::Command;

/// What one session accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub command: Command,
    /// Files the exchange expected
    pub total_files: u32,
    /// Files (or list entries) that completed
    pub file_count: u32,
    /// LIST results, client side only
    pub listing: Vec<String>,
}

impl SessionSummary {
    fn new(command: Command) -> Self {
        Self { command, total_files: 0, file_count: 0, listing: Vec::new() }
    }
}

pub mod server {
    use super::SessionSummary;
    use crate::config::ServerConfig;
    use crate::logger::SharedLogger;
    use crate::pattern::{resolve, with_default_root};
    use crate::protocol::Command;
    use crate::protocol_core::{
        ensure_dir_exists, read_packet, write_packet, InitiationReply, InitiationRequest,
    };
    use crate::transfer::{receive_file, send_file, send_listing, FileOutcome};
    use anyhow::{Context, Result};
    use log::{debug, error, info, warn};
    use std::future::Future;
    use std::net::{IpAddr, SocketAddr, UdpSocket};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpSocket, TcpStream};
    use tokio::task::JoinSet;

    /// Listening socket plus the state every session needs.
    pub struct Server {
        listener: TcpListener,
        config: Arc<ServerConfig>,
        logger: SharedLogger,
    }

    impl Server {
        /// Bind with address reuse and the configured backlog.
        pub async fn bind(config: ServerConfig, logger: SharedLogger) -> Result<Self> {
            let addr = tokio::net::lookup_host(&config.bind)
                .await
                .with_context(|| format!("resolve {}", config.bind))?
                .next()
                .with_context(|| format!("no address for {}", config.bind))?;
            let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
            socket.set_reuseaddr(true).context("set SO_REUSEADDR")?;
            socket.bind(addr).with_context(|| format!("bind {}", addr))?;
            let listener = socket.listen(config.backlog).context("listen")?;
            Ok(Self { listener, config: Arc::new(config), logger })
        }

        pub fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.listener.local_addr()?)
        }

        /// Accept until an accept error.
        pub async fn run(self) -> Result<()> {
            self.run_until(std::future::pending()).await
        }

        /// Accept until `shutdown` resolves or accept fails. Each connection
        /// gets its own task; on the way out, sessions still running are
        /// aborted and awaited and the listener is closed.
        pub async fn run_until<F>(self, shutdown: F) -> Result<()>
        where
            F: Future<Output = ()>,
        {
            let Server { listener, config, logger } = self;
            if let Ok(addr) = listener.local_addr() {
                info!("dexft server listening on {}", addr);
            }
            let mut sessions = JoinSet::new();
            tokio::pin!(shutdown);

            let result = loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("shutdown requested, {} session(s) still running", sessions.len());
                        break Ok(());
                    }
                    Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!("session task panicked: {}", e);
                            }
                        }
                    }
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(v) => v,
                            Err(e) => {
                                error!("Server accept failed: {}", e);
                                break Err(e).context("accept");
                            }
                        };
                        let _ = stream.set_nodelay(true);
                        info!("New client connection from {}", peer);
                        let config = config.clone();
                        let logger = logger.clone();
                        sessions.spawn(async move {
                            match handle_conn(stream, peer, &config, &logger).await {
                                Ok(summary) => info!(
                                    "{} session with {} done: {}/{} file(s)",
                                    summary.command, peer, summary.file_count, summary.total_files
                                ),
                                Err(e) => error!("session with {} failed: {:#}", peer, e),
                            }
                        });
                    }
                }
            };

            sessions.shutdown().await;
            drop(listener);
            result
        }
    }

    /// Bind and accept until an accept error.
    pub async fn serve(config: ServerConfig, logger: SharedLogger) -> Result<()> {
        Server::bind(config, logger).await?.run().await
    }

    /// Per-connection state. Counters belong to this session alone.
    struct Session<'a> {
        stream: TcpStream,
        peer: SocketAddr,
        config: &'a ServerConfig,
        logger: &'a SharedLogger,
        total_files: u32,
        file_count: u32,
    }

    async fn handle_conn(
        stream: TcpStream,
        peer: SocketAddr,
        config: &ServerConfig,
        logger: &SharedLogger,
    ) -> Result<SessionSummary> {
        let mut session = Session { stream, peer, config, logger, total_files: 0, file_count: 0 };
        let result = session.run().await;
        // Close regardless of how the exchange ended
        let _ = session.stream.shutdown().await;
        result
    }

    impl Session<'_> {
        async fn run(&mut self) -> Result<SessionSummary> {
            let req: InitiationRequest = read_packet(&mut self.stream)
                .await
                .context("receive initiation request")?;
            debug!("received command {} pattern {:?} from {}", req.command, req.pattern, self.peer);
            self.logger.session(Some(self.peer), req.command, &req.pattern);

            match req.command {
                Command::Pull | Command::List => self.serve_matches(&req).await,
                Command::Push => self.accept_uploads(&req).await,
            }
        }

        fn summary(&self, command: Command) -> SessionSummary {
            SessionSummary {
                command,
                total_files: self.total_files,
                file_count: self.file_count,
                listing: Vec::new(),
            }
        }

        fn record(&mut self, outcome: &FileOutcome) {
            match outcome {
                FileOutcome::Done { path, bytes } => {
                    self.file_count += 1;
                    self.logger.file_done(path, *bytes);
                }
                FileOutcome::Failed { path, reason } => {
                    warn!("transfer of {} failed: {}", path.display(), reason);
                    self.logger.file_failed(path, reason);
                }
            }
        }

        async fn serve_matches(&mut self, req: &InitiationRequest) -> Result<SessionSummary> {
            let pattern = with_default_root(&req.pattern, self.config.default_root.as_deref());
            info!("Finding files: {}", pattern);
            // A literal path resolves to itself alone, so the single named
            // file is served without any directory listing.
            let files = resolve(&pattern);
            self.total_files = u32::try_from(files.len()).context("too many matches")?;

            let reply = InitiationReply { proceed: self.total_files > 0, total_files: self.total_files };
            write_packet(&mut self.stream, &reply).await.context("send initiation reply")?;
            if self.total_files == 0 {
                info!("No file(s) found: {}", pattern);
                return Ok(self.summary(req.command));
            }

            if req.command == Command::List {
                self.file_count = send_listing(&mut self.stream, &files).await?;
                info!("File list sent completed ({} entries)", self.file_count);
            } else {
                for file in &files {
                    let outcome = send_file(&mut self.stream, std::path::Path::new(file)).await?;
                    self.record(&outcome);
                    if outcome.is_done() {
                        info!("File sent: {}/{} {}", self.file_count, self.total_files, file);
                    }
                }
                info!("Total sent files: {}", self.file_count);
            }
            self.logger.done(self.file_count, self.total_files);
            Ok(self.summary(req.command))
        }

        /// Replies proceed=true once the upload directory exists. If it cannot
        /// be created the reply is proceed=false, so the client stops before
        /// streaming files that could only be drained.
        async fn accept_uploads(&mut self, req: &InitiationRequest) -> Result<SessionSummary> {
            self.total_files = req.total_files;
            let upload_dir = self.config.upload_dir.clone();
            let ready = match ensure_dir_exists(&upload_dir) {
                Ok(()) => true,
                Err(e) => {
                    error!("cannot provision upload directory: {:#}", e);
                    false
                }
            };

            let reply = InitiationReply { proceed: ready, total_files: self.total_files };
            write_packet(&mut self.stream, &reply).await.context("send initiation reply")?;
            if !ready {
                return Ok(self.summary(Command::Push));
            }

            info!("Receiving {} file(s) into {}", self.total_files, upload_dir.display());
            for _ in 0..self.total_files {
                let outcome = receive_file(&mut self.stream, &upload_dir).await?;
                self.record(&outcome);
                if let FileOutcome::Done { path, .. } = &outcome {
                    info!("File received: {}/{} {}", self.file_count, self.total_files, path.display());
                }
            }
            info!("Total received files: {}", self.file_count);
            self.logger.done(self.file_count, self.total_files);
            Ok(self.summary(Command::Push))
        }
    }

    /// Address of the interface that routes outward, for telling users what
    /// to connect to. Nothing is sent.
    pub fn local_private_ip() -> Option<IpAddr> {
        let sock = UdpSocket::bind("0.0.0.0:0").ok()?;
        sock.connect("10.255.255.255:1").ok()?;
        sock.local_addr().ok().map(|a| a.ip()).filter(|ip| !ip.is_unspecified())
    }
}

pub mod client {
    use super::SessionSummary;
    use crate::config::ClientConfig;
    use crate::logger::SharedLogger;
    use crate::pattern::resolve;
    use crate::protocol::Command;
    use crate::protocol_core::{
        ensure_dir_exists, read_packet, write_packet, InitiationReply, InitiationRequest,
    };
    use crate::transfer::{receive_file, receive_listing, send_file, FileOutcome};
    use anyhow::{Context, Result};
    use log::{debug, info, warn};
    use std::path::Path;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connect {}", addr))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Run one command against `host`. Files matching nothing is not an
    /// error; the summary then reports zero files.
    pub async fn run(
        config: &ClientConfig,
        host: &str,
        command: Command,
        pattern: &str,
        logger: &SharedLogger,
    ) -> Result<SessionSummary> {
        let mut summary = SessionSummary::new(command);

        // PUSH resolves first so the request carries the real count
        let local_files = if command == Command::Push {
            let files = resolve(pattern);
            if files.is_empty() {
                warn!("No local files match {}, nothing to push", pattern);
                return Ok(summary);
            }
            files
        } else {
            Vec::new()
        };

        info!("Connecting to {}:{}", host, config.port);
        let mut stream = connect(host, config.port).await?;
        logger.session(stream.peer_addr().ok(), command, pattern);

        let result = exchange(&mut stream, config, command, pattern, &local_files, &mut summary, logger).await;
        let _ = stream.shutdown().await;
        result?;

        logger.done(summary.file_count, summary.total_files);
        Ok(summary)
    }

    fn record(summary: &mut SessionSummary, outcome: &FileOutcome, logger: &SharedLogger) {
        match outcome {
            FileOutcome::Done { path, bytes } => {
                summary.file_count += 1;
                logger.file_done(path, *bytes);
            }
            FileOutcome::Failed { path, reason } => {
                warn!("transfer of {} failed: {}", path.display(), reason);
                logger.file_failed(path, reason);
            }
        }
    }

    async fn exchange(
        stream: &mut TcpStream,
        config: &ClientConfig,
        command: Command,
        pattern: &str,
        local_files: &[String],
        summary: &mut SessionSummary,
        logger: &SharedLogger,
    ) -> Result<()> {
        let total_files = u32::try_from(local_files.len()).context("too many local files")?;
        let req = InitiationRequest { command, pattern: pattern.to_string(), total_files };
        write_packet(stream, &req).await.context("send initiation request")?;
        let reply: InitiationReply = read_packet(stream).await.context("receive initiation reply")?;
        debug!("reply proceed={} total_files={}", reply.proceed, reply.total_files);

        match command {
            Command::Pull | Command::List if reply.total_files == 0 => {
                info!("No files found with pattern: {}", pattern);
                return Ok(());
            }
            Command::Push if !reply.proceed => {
                warn!("Server declined push");
                return Ok(());
            }
            _ => {}
        }

        match command {
            Command::Pull => {
                summary.total_files = reply.total_files;
                ensure_dir_exists(&config.download_dir)?;
                for _ in 0..reply.total_files {
                    let outcome = receive_file(stream, &config.download_dir).await?;
                    record(summary, &outcome, logger);
                    if let FileOutcome::Done { path, .. } = &outcome {
                        info!("File received: {}/{} {}", summary.file_count, summary.total_files, path.display());
                    }
                }
                info!("Total received files: {}", summary.file_count);
            }
            Command::Push => {
                summary.total_files = total_files;
                for file in local_files {
                    let outcome = send_file(stream, Path::new(file)).await?;
                    record(summary, &outcome, logger);
                    if outcome.is_done() {
                        info!("File sent: {}/{} {}", summary.file_count, summary.total_files, file);
                    }
                }
                info!("Total sent files: {}", summary.file_count);
            }
            Command::List => {
                summary.total_files = reply.total_files;
                summary.listing = receive_listing(stream).await?;
                summary.file_count = u32::try_from(summary.listing.len()).unwrap_or(u32::MAX);
            }
        }
        Ok(())
    }
}
