//! Sender identity for queued messages (§3).

/// Credentials captured once at `accept()` via the kernel socket option.
/// Synthetic values (`pid=0`, `uid`/`gid = u32::MAX`) stand in when the
/// platform cannot supply real ones (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl PeerCredentials {
    /// Placeholder credentials used when `SO_PEERCRED` (or equivalent)
    /// is unavailable, so handlers can still run.
    pub const SYNTHETIC: PeerCredentials = PeerCredentials { pid: 0, uid: u32::MAX, gid: u32::MAX };

    pub fn is_synthetic(&self) -> bool {
        *self == Self::SYNTHETIC
    }
}

/// Opaque identifier for a loaded policy module (§3, §9 — module id rather
/// than a borrowed pointer, to avoid the module/handler-record cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Opaque identifier for an accepted client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Identifies the sender of a queued message (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Came from inside the process: an owning module.
    Module(ModuleId),
    /// Came from outside: an accepted socket connection plus its peer credentials.
    Socket { connection: ConnectionId, credentials: PeerCredentials },
    /// Neither: synthesised by the core itself (e.g. the `IDLE` tick).
    System,
}

impl Endpoint {
    /// Whether this endpoint originated outside the worker process.
    pub fn is_external(&self) -> bool {
        matches!(self, Endpoint::Socket { .. })
    }
}

/// Identifies the intended recipient(s) of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Deliver to every handler registered for the message type.
    Broadcast,
    /// Deliver only to handlers owned by this module.
    Module(ModuleId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_credentials_are_detected() {
        assert!(PeerCredentials::SYNTHETIC.is_synthetic());
        let real = PeerCredentials { pid: 123, uid: 1000, gid: 1000 };
        assert!(!real.is_synthetic());
    }

    #[test]
    fn socket_endpoint_is_external_module_is_not() {
        let socket = Endpoint::Socket {
            connection: ConnectionId(1),
            credentials: PeerCredentials::SYNTHETIC,
        };
        assert!(socket.is_external());
        assert!(!Endpoint::Module(ModuleId(0)).is_external());
        assert!(!Endpoint::System.is_external());
    }
}
