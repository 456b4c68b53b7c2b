//! Rendezvous, the pool membership service every runtime joins.
//!
//! A TCP listener speaking one JSON line each way: a runtime sends
//! `JoinRequest`, the service answers `JoinReply`. Members of the served
//! pool are recorded until the service ends.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("failed to bind rendezvous on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rendezvous i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed rendezvous message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("join refused: {0}")]
    Refused(String),
    #[error("rendezvous closed the connection without replying")]
    NoReply,
    #[error("rendezvous is not running")]
    NotRunning,
    #[error("rendezvous did not stop within {0:?}")]
    EndTimeout(Duration),
    #[error("no join request within {0:?}")]
    RequestTimeout(Duration),
    #[error("join request longer than {0} bytes")]
    Oversized(u64),
}

/// Bounds on what a connecting peer may send before it is dropped.
#[derive(Debug, Clone, Copy)]
struct JoinLimits {
    max_line: u64,
    read_timeout: Duration,
}

impl Default for JoinLimits {
    fn default() -> Self {
        Self {
            max_line: 4096,
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub pool: String,
    pub member: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReply {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub addr: SocketAddr,
    pub joined_at: Instant,
}

type Members = Arc<DashMap<String, MemberInfo>>;

pub struct Rendezvous {
    address: SocketAddr,
    pool: String,
    members: Members,
    shutdown: broadcast::Sender<()>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Rendezvous {
    /// Bind `bind` and start serving `pool`. Returns once the listener is up.
    pub async fn start(bind: &str, pool: &str) -> Result<Self, RendezvousError> {
        Self::start_with(bind, pool, JoinLimits::default()).await
    }

    async fn start_with(
        bind: &str,
        pool: &str,
        limits: JoinLimits,
    ) -> Result<Self, RendezvousError> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| RendezvousError::Bind {
                address: bind.to_string(),
                source,
            })?;
        let address = listener.local_addr()?;
        let members: Members = Arc::new(DashMap::new());
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            pool.to_string(),
            members.clone(),
            limits,
            shutdown_rx,
        ));

        tracing::info!(%address, pool, "rendezvous started");

        Ok(Self {
            address,
            pool: pool.to_string(),
            members,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Address workers use to reach this pool.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Names of members that have joined, sorted.
    pub fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stop accepting joins, waiting at most `timeout` for the listener to
    /// wind down.
    pub async fn end(&self, timeout: Duration) -> Result<(), RendezvousError> {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(RendezvousError::NotRunning)?;

        let _ = self.shutdown.send(());
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => {
                tracing::info!(address = %self.address, members = self.members.len(), "rendezvous ended");
                Ok(())
            }
            Err(_) => Err(RendezvousError::EndTimeout(timeout)),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    pool: String,
    members: Members,
    limits: JoinLimits,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("rendezvous accept loop shutting down");
                return;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "rendezvous accept failed");
                        continue;
                    }
                };
                let pool = pool.clone();
                let members = members.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_join(stream, peer, &pool, &members, limits).await {
                        tracing::warn!(%peer, error = %e, "rendezvous join failed");
                    }
                });
            }
        }
    }
}

async fn handle_join(
    stream: TcpStream,
    peer: SocketAddr,
    pool: &str,
    members: &Members,
    limits: JoinLimits,
) -> Result<(), RendezvousError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read.take(limits.max_line));
    let mut line = String::new();
    let n = tokio::time::timeout(limits.read_timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| RendezvousError::RequestTimeout(limits.read_timeout))??;
    if n as u64 >= limits.max_line && !line.ends_with('\n') {
        return Err(RendezvousError::Oversized(limits.max_line));
    }
    let request: JoinRequest = serde_json::from_str(line.trim())?;

    let reply = if request.pool == pool {
        members.insert(
            request.member.clone(),
            MemberInfo {
                addr: peer,
                joined_at: Instant::now(),
            },
        );
        tracing::info!(member = %request.member, %peer, "member joined pool");
        JoinReply {
            accepted: true,
            reason: None,
        }
    } else {
        tracing::warn!(requested = %request.pool, served = pool, "join for foreign pool refused");
        JoinReply {
            accepted: false,
            reason: Some(format!("this rendezvous serves pool {pool:?}")),
        }
    };

    let mut out = serde_json::to_vec(&reply)?;
    out.push(b'\n');
    write.write_all(&out).await?;
    write.shutdown().await?;
    Ok(())
}

/// Join `pool` at the rendezvous listening on `address`.
pub async fn join(address: &str, pool: &str, member: &str) -> Result<(), RendezvousError> {
    let stream = TcpStream::connect(address).await?;
    let (read, mut write) = stream.into_split();

    let mut out = serde_json::to_vec(&JoinRequest {
        pool: pool.to_string(),
        member: member.to_string(),
    })?;
    out.push(b'\n');
    write.write_all(&out).await?;

    let mut line = String::new();
    if BufReader::new(read).read_line(&mut line).await? == 0 {
        return Err(RendezvousError::NoReply);
    }
    let reply: JoinReply = serde_json::from_str(line.trim())?;
    if reply.accepted {
        Ok(())
    } else {
        Err(RendezvousError::Refused(
            reply.reason.unwrap_or_else(|| "no reason given".to_string()),
        ))
    }
}
