//! Local IPC server (§4.6): binds the worker's control socket, captures peer
//! credentials at `accept()`, and runs the growable-buffer framer contract
//! over `dsme_protocol::wire`.

use dsme_common::consts::{RECV_BUF_INITIAL, RECV_BUF_MAX, SOCKFILE_MODE};
use dsme_protocol::wire::{self, FrameError, HEADER_LEN};
use dsme_protocol::{ConnectionId, Message, PeerCredentials};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to bind control socket at {path}: {source}")]
    Bind { path: String, #[source] source: std::io::Error },
}

/// Why a connection's framer gave up on it (§4.6, step 3-5 of the contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    OutOfSync,
    Eof,
    Error,
    ClientRequested,
}

/// Outcome of one [`Connection::poll_frame`] call.
pub enum FrameOutcome {
    /// A complete message arrived.
    Message(Message),
    /// More bytes are needed; the caller should wait for the next
    /// read-readiness event.
    NeedMore,
    /// The framer contract says to close the connection.
    Close(CloseReason),
}

/// One accepted client connection and its growable receive buffer (§4.6).
pub struct Connection {
    pub id: ConnectionId,
    pub credentials: PeerCredentials,
    stream: UnixStream,
    buf: Vec<u8>,
    filled: usize,
}

impl Connection {
    fn new(id: ConnectionId, credentials: PeerCredentials, stream: UnixStream) -> Self {
        Connection { id, credentials, stream, buf: vec![0u8; RECV_BUF_INITIAL], filled: 0 }
    }

    /// Step 1-5 of the framer contract: read until a full header is
    /// buffered, read the rest of the declared frame, and decode it.
    pub async fn poll_frame(&mut self) -> FrameOutcome {
        if let Err(reason) = self.ensure_filled(HEADER_LEN).await {
            return FrameOutcome::Close(reason);
        }
        if self.filled < HEADER_LEN {
            return FrameOutcome::NeedMore;
        }

        let header = match wire::Header::parse(&self.buf[..self.filled]) {
            Ok(h) => h,
            Err(FrameError::TooLarge(_)) | Err(FrameError::SizeBelowHeader { .. }) | Err(FrameError::LineSizeBelowSize { .. }) => {
                return FrameOutcome::Close(CloseReason::OutOfSync);
            }
            Err(FrameError::ShortHeader(_)) => return FrameOutcome::NeedMore,
            Err(FrameError::Incomplete { .. }) => return FrameOutcome::NeedMore,
        };

        let need = header.line_size as usize;
        if need > RECV_BUF_MAX {
            return FrameOutcome::Close(CloseReason::OutOfSync);
        }
        if let Err(reason) = self.ensure_filled(need).await {
            return FrameOutcome::Close(reason);
        }
        if self.filled < need {
            return FrameOutcome::NeedMore;
        }

        match wire::decode(&self.buf[..self.filled]) {
            Ok((message, consumed)) => {
                self.buf.drain(..consumed);
                self.filled -= consumed;
                FrameOutcome::Message(message)
            }
            Err(_) => FrameOutcome::Close(CloseReason::OutOfSync),
        }
    }

    /// Grow the buffer if needed and read until at least `need` bytes are
    /// buffered or the socket has no more to give right now.
    async fn ensure_filled(&mut self, need: usize) -> Result<(), CloseReason> {
        if self.buf.len() < need {
            self.buf.resize(need, 0);
        }
        while self.filled < need {
            match self.stream.read(&mut self.buf[self.filled..need]).await {
                Ok(0) => return Err(CloseReason::Eof),
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(_) => return Err(CloseReason::Error),
            }
        }
        Ok(())
    }

    pub async fn write_frame(&mut self, message: &Message) -> std::io::Result<()> {
        let bytes = wire::encode(message);
        self.stream.write_all(&bytes).await
    }
}

/// Binds the control socket, unlinking any stale path first (§4.6).
pub struct IpcServer {
    listener: UnixListener,
    next_connection_id: u64,
}

impl IpcServer {
    pub fn bind(path: &str) -> Result<Self, IpcError> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(|e| IpcError::Bind { path: path.to_string(), source: e })?;
        if let Err(e) = std::fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(SOCKFILE_MODE)) {
            warn!(%path, error = %e, "failed to set control socket mode");
        }
        Ok(IpcServer { listener, next_connection_id: 0 })
    }

    pub async fn accept(&mut self) -> std::io::Result<Connection> {
        let (stream, _addr) = self.listener.accept().await?;
        self.next_connection_id += 1;
        let id = ConnectionId(self.next_connection_id);
        let credentials = peer_credentials(&stream);
        trace!(connection = id.0, ?credentials, "accepted control socket connection");
        Ok(Connection::new(id, credentials, stream))
    }
}

fn peer_credentials(stream: &UnixStream) -> PeerCredentials {
    match nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => PeerCredentials { pid: cred.pid(), uid: cred.uid(), gid: cred.gid() },
        Err(e) => {
            debug!(error = %e, "SO_PEERCRED unavailable, using synthetic credentials");
            PeerCredentials::SYNTHETIC
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream as ClientStream;

    #[tokio::test]
    async fn a_full_frame_round_trips_through_the_connection_framer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let mut server = IpcServer::bind(path.to_str().unwrap()).unwrap();

        let client = ClientStream::connect(&path).await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let msg = Message::StateQuery;
        let bytes = wire::encode(&msg);
        let mut client = client;
        client.write_all(&bytes).await.unwrap();

        match conn.poll_frame().await {
            FrameOutcome::Message(decoded) => assert_eq!(decoded, msg),
            _ => panic!("expected a decoded message"),
        }
    }

    #[tokio::test]
    async fn declared_size_over_the_limit_is_out_of_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let mut server = IpcServer::bind(path.to_str().unwrap()).unwrap();

        let mut client = ClientStream::connect(&path).await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&70_000u32.to_le_bytes());
        bytes[4..8].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        bytes[8..12].copy_from_slice(&dsme_protocol::types::type_id::STATE_QUERY.to_le_bytes());
        client.write_all(&bytes).await.unwrap();

        assert!(matches!(conn.poll_frame().await, FrameOutcome::Close(CloseReason::OutOfSync)));
    }

    #[tokio::test]
    async fn clean_eof_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let mut server = IpcServer::bind(path.to_str().unwrap()).unwrap();

        let client = ClientStream::connect(&path).await.unwrap();
        let mut conn = server.accept().await.unwrap();
        drop(client);

        assert!(matches!(conn.poll_frame().await, FrameOutcome::Close(CloseReason::Eof)));
    }

}
