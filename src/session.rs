//! Session management
//!
//! One `Session` per TCP connection. Handlers never touch the socket: they
//! enqueue finished payloads with [`Session::send`] and a dedicated writer
//! task encrypts and flushes them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch, RwLock};

use crate::network::crypt::Encoder;
use crate::network::write_frame;

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: id={0}")]
    SessionNotFound(u64),

    #[error("Maximum sessions exceeded (limit: {0})")]
    MaxSessionsExceeded(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Handshake = 0,
    VersionOk = 1,
    Authenticated = 2,
    InWorld = 3,
    ReturningToSelect = 4,
    Disconnecting = 5,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Handshake,
            1 => SessionState::VersionOk,
            2 => SessionState::Authenticated,
            3 => SessionState::InWorld,
            4 => SessionState::ReturningToSelect,
            _ => SessionState::Disconnecting,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of states an opcode is accepted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSet(u8);

impl StateSet {
    pub const NONE: StateSet = StateSet(0);
    pub const HANDSHAKE: StateSet = StateSet(1 << 0);
    pub const VERSION_OK: StateSet = StateSet(1 << 1);
    pub const AUTHENTICATED: StateSet = StateSet(1 << 2);
    pub const IN_WORLD: StateSet = StateSet(1 << 3);
    pub const RETURNING: StateSet = StateSet(1 << 4);

    /// Pre-world states that may still log in.
    pub const LOGIN: StateSet = StateSet(Self::VERSION_OK.0 | Self::AUTHENTICATED.0);
    /// Every state but Disconnecting.
    pub const ANY_LIVE: StateSet = StateSet(
        Self::HANDSHAKE.0 | Self::VERSION_OK.0 | Self::AUTHENTICATED.0 | Self::IN_WORLD.0 | Self::RETURNING.0,
    );

    pub const fn union(self, other: StateSet) -> StateSet {
        StateSet(self.0 | other.0)
    }

    pub fn contains(self, state: SessionState) -> bool {
        self.0 & state.bit() != 0
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    RemoteClosed,
    Codec,
    Backpressure,
    ReadTimeout,
    WriteFailed,
    RateLimited,
    Quit,
    Kicked,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::RemoteClosed => "remote_closed",
            CloseReason::Codec => "codec_error",
            CloseReason::Backpressure => "backpressure_exceeded",
            CloseReason::ReadTimeout => "read_timeout",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::RateLimited => "rate_limited",
            CloseReason::Quit => "quit",
            CloseReason::Kicked => "kicked",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Session state for a single client connection
pub struct Session {
    pub id: u64,
    pub addr: SocketAddr,
    state: AtomicU8,
    tx: mpsc::UnboundedSender<Bytes>,
    queued: AtomicUsize,
    high_water: usize,
    closed: watch::Sender<Option<CloseReason>>,
    account: Mutex<Option<String>>,
    char_name: Mutex<Option<String>>,
    char_id: AtomicI32,
}

impl Session {
    /// Creates a session and the receiving end of its outbound queue.
    pub fn new(id: u64, addr: SocketAddr, high_water: usize) -> (Arc<Session>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(None);
        let session = Arc::new(Session {
            id,
            addr,
            state: AtomicU8::new(SessionState::Handshake as u8),
            tx,
            queued: AtomicUsize::new(0),
            high_water,
            closed,
            account: Mutex::new(None),
            char_name: Mutex::new(None),
            char_id: AtomicI32::new(0),
        });
        (session, rx)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `state`. A session that is closing stays `Disconnecting`.
    pub fn set_state(&self, state: SessionState) {
        let moved = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            (cur != SessionState::Disconnecting as u8).then_some(state as u8)
        });
        match moved {
            Ok(prev) => tracing::debug!("[session] [state] id={} {:?} -> {:?}", self.id, SessionState::from_u8(prev), state),
            Err(_) => tracing::debug!("[session] [state_ignored] id={} closing, wanted {:?}", self.id, state),
        }
    }

    /// Enqueue one finished payload. Never blocks.
    pub fn send(&self, payload: Bytes) {
        if self.is_closed() || payload.is_empty() {
            return;
        }
        let queued = self.queued.fetch_add(payload.len(), Ordering::AcqRel) + payload.len();
        if queued > self.high_water {
            tracing::warn!(
                "[session] [backpressure] id={} queued={} high_water={}",
                self.id,
                queued,
                self.high_water
            );
            self.close(CloseReason::Backpressure);
            return;
        }
        if self.tx.send(payload).is_err() {
            self.close(CloseReason::WriteFailed);
        }
    }

    /// Called by the writer after a payload reached the socket.
    pub fn mark_flushed(&self, len: usize) {
        self.queued.fetch_sub(len.min(self.queued_bytes()), Ordering::AcqRel);
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Close the session. The first reason wins.
    pub fn close(&self, reason: CloseReason) {
        let mut first = false;
        self.closed.send_if_modified(|cur| {
            if cur.is_none() {
                *cur = Some(reason);
                first = true;
                true
            } else {
                false
            }
        });
        if first {
            self.state.store(SessionState::Disconnecting as u8, Ordering::Release);
            tracing::info!("[session] [close] id={} addr={} reason={}", self.id, self.addr, reason.as_str());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed.borrow()
    }

    /// Resolves when the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        while rx.borrow_and_update().is_none() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn account(&self) -> Option<String> {
        lock(&self.account).clone()
    }

    pub fn set_account(&self, name: Option<String>) {
        *lock(&self.account) = name;
    }

    pub fn char_name(&self) -> Option<String> {
        lock(&self.char_name).clone()
    }

    /// Binds the session to a character (0 clears the binding).
    pub fn bind_char(&self, char_id: i32, name: Option<String>) {
        self.char_id.store(char_id, Ordering::Release);
        *lock(&self.char_name) = name;
    }

    pub fn char_id(&self) -> Option<i32> {
        match self.char_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }
}

/// Drains the outbound queue of `session` into `sink`, encrypting each payload.
pub async fn run_writer<W: AsyncWrite + Unpin>(
    session: Arc<Session>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut sink: W,
    mut encoder: Encoder,
    write_timeout: Duration,
) {
    loop {
        let payload = tokio::select! {
            p = rx.recv() => p,
            _ = session.closed() => None,
        };
        let Some(payload) = payload else {
            break;
        };
        let len = payload.len();
        let mut buf = payload.to_vec();
        encoder.encrypt(&mut buf);
        match tokio::time::timeout(write_timeout, write_frame(&mut sink, &buf)).await {
            Ok(Ok(())) => session.mark_flushed(len),
            Ok(Err(e)) => {
                tracing::debug!("[session] [write_error] id={} err={}", session.id, e);
                session.close(CloseReason::WriteFailed);
                break;
            }
            Err(_) => {
                tracing::warn!("[session] [write_timeout] id={}", session.id);
                session.close(CloseReason::WriteFailed);
                break;
            }
        }
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut sink).await;
}

/// Registry of live sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Allocate a new session id (never reused)
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert_session(&self, session: Arc<Session>) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::MaxSessionsExceeded(self.max_sessions));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    pub async fn get_session(&self, id: u64) -> Result<Arc<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).cloned().ok_or(SessionError::SessionNotFound(id))
    }

    pub async fn remove_session(&self, id: u64) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Bind `account` to `session` unless another live session holds it.
    /// The check and the bind happen under one write lock, so two logins
    /// racing for the same account cannot both win. Returns the holder on
    /// conflict.
    pub async fn claim_account(&self, session: &Session, account: &str) -> Result<(), Arc<Session>> {
        let sessions = self.sessions.write().await;
        let holder = sessions
            .values()
            .find(|s| s.id != session.id && !s.is_closed() && s.account().as_deref() == Some(account));
        if let Some(holder) = holder {
            return Err(Arc::clone(holder));
        }
        session.set_account(Some(account.to_string()));
        Ok(())
    }

    /// Give up a claim taken by [`SessionManager::claim_account`].
    pub async fn release_account(&self, session: &Session) {
        let _sessions = self.sessions.write().await;
        session.set_account(None);
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::crypt::Decoder;
    use crate::network::read_frame;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_state_set_membership() {
        let set = StateSet::IN_WORLD.union(StateSet::RETURNING);
        assert!(set.contains(SessionState::InWorld));
        assert!(set.contains(SessionState::ReturningToSelect));
        assert!(!set.contains(SessionState::Authenticated));
        assert!(!StateSet::ANY_LIVE.contains(SessionState::Disconnecting));
        assert!(StateSet::LOGIN.contains(SessionState::VersionOk));
    }

    #[test]
    fn test_send_enqueues() {
        let (s, mut rx) = Session::new(1, addr(), 1024);
        s.send(Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(s.queued_bytes(), 4);
        s.mark_flushed(4);
        assert_eq!(s.queued_bytes(), 0);
    }

    #[test]
    fn test_backpressure_closes_session() {
        let (s, _rx) = Session::new(1, addr(), 8);
        s.send(Bytes::from(vec![0u8; 6]));
        assert!(!s.is_closed());
        s.send(Bytes::from(vec![0u8; 6]));
        assert_eq!(s.close_reason(), Some(CloseReason::Backpressure));
        assert_eq!(s.state(), SessionState::Disconnecting);
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (s, _rx) = Session::new(1, addr(), 8);
        s.close(CloseReason::Quit);
        s.close(CloseReason::Codec);
        assert_eq!(s.close_reason(), Some(CloseReason::Quit));
    }

    #[test]
    fn test_closing_session_keeps_disconnecting() {
        let (s, _rx) = Session::new(1, addr(), 8);
        s.set_state(SessionState::Authenticated);
        assert_eq!(s.state(), SessionState::Authenticated);
        s.close(CloseReason::Quit);
        s.set_state(SessionState::InWorld);
        assert_eq!(s.state(), SessionState::Disconnecting);
    }

    #[test]
    fn test_char_binding() {
        let (s, _rx) = Session::new(1, addr(), 8);
        assert_eq!(s.char_id(), None);
        s.bind_char(42, Some("Alice".into()));
        assert_eq!(s.char_id(), Some(42));
        assert_eq!(s.char_name().as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_writer_encrypts_frames() {
        let (s, rx) = Session::new(7, addr(), 1024);
        let (client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(run_writer(s.clone(), rx, server, Encoder::new(99), Duration::from_secs(1)));
        s.send(Bytes::from_static(&[71, 1, 0, 0, 0, 0]));
        let mut client = client;
        let mut frame = read_frame(&mut client).await.unwrap();
        Decoder::new(99).decrypt(&mut frame);
        assert_eq!(frame, vec![71, 1, 0, 0, 0, 0]);
        s.close(CloseReason::Quit);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_manager() {
        let mgr = SessionManager::new(2);
        let a = Session::new(mgr.allocate_id(), addr(), 8).0;
        let b = Session::new(mgr.allocate_id(), addr(), 8).0;
        let c = Session::new(mgr.allocate_id(), addr(), 8).0;
        mgr.insert_session(a.clone()).await.unwrap();
        mgr.insert_session(b.clone()).await.unwrap();
        assert!(mgr.insert_session(c).await.is_err());
        assert_eq!(mgr.session_count().await, 2);
        assert!(mgr.claim_account(&a, "acct").await.is_ok());
        assert!(mgr.claim_account(&a, "acct").await.is_ok());
        mgr.remove_session(a.id).await;
        assert!(mgr.get_session(a.id).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let mgr = SessionManager::new(8);
        let a = Session::new(mgr.allocate_id(), addr(), 8).0;
        let b = Session::new(mgr.allocate_id(), addr(), 8).0;
        mgr.insert_session(a.clone()).await.unwrap();
        mgr.insert_session(b.clone()).await.unwrap();

        let (ra, rb) = tokio::join!(mgr.claim_account(&a, "acct"), mgr.claim_account(&b, "acct"));
        assert!(ra.is_ok() != rb.is_ok());
        let (winner, loser) = if ra.is_ok() { (&a, &b) } else { (&b, &a) };
        assert_eq!(winner.account().as_deref(), Some("acct"));
        assert_eq!(loser.account(), None);

        mgr.release_account(winner).await;
        assert!(mgr.claim_account(loser, "acct").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_holder_does_not_block_claim() {
        let mgr = SessionManager::new(8);
        let a = Session::new(mgr.allocate_id(), addr(), 8).0;
        let b = Session::new(mgr.allocate_id(), addr(), 8).0;
        mgr.insert_session(a.clone()).await.unwrap();
        mgr.insert_session(b.clone()).await.unwrap();
        assert!(mgr.claim_account(&a, "acct").await.is_ok());
        assert_eq!(mgr.claim_account(&b, "acct").await.map_err(|h| h.id), Err(a.id));
        a.close(CloseReason::Quit);
        assert!(mgr.claim_account(&b, "acct").await.is_ok());
    }
}
