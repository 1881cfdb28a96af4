//! The game server: accept loop, per-connection read loop and the opcode
//! table.
//!
//! Each connection gets one reader task (this module) and one writer task
//! ([`run_writer`]). Frames from one session are handled strictly in
//! order; each handler runs in its own task so a panic only takes down the
//! session that caused it.

pub mod account;
pub mod action;
pub mod enter;
pub mod field;
pub mod social;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

use crate::core::Shutdown;
use crate::database::Content;
use crate::game::GameCtx;
use crate::network::crypt::{init_packet_body, random_seed, Cipher, Decoder};
use crate::network::opcodes::*;
use crate::network::packet::{PacketError, Reader};
use crate::network::throttle::{LoginThrottle, PacketRateLimiter};
use crate::network::{read_frame, write_frame, FrameError};
use crate::persist::{with_deadline, worker, Storage, DB_DEADLINE};
use crate::session::{run_writer, CloseReason, Session, SessionManager, StateSet};
use crate::world::clan::Clan;
use crate::world::WorldState;

/// Expired login-throttle windows are dropped this often.
const THROTTLE_SWEEP: Duration = Duration::from_secs(60);
/// How long shutdown waits for connections to finish their saves.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub type HandlerResult = Result<(), PacketError>;

/// Bring the world up from storage: replay unfinished transfers, clear
/// stale online flags, seed object ids, load clans and place spawns.
pub async fn boot_world(storage: &dyn Storage, content: Arc<Content>) -> Result<WorldState> {
    let replayed = worker::replay_wal(storage).await?;
    if replayed > 0 {
        tracing::warn!("[game] [wal_replayed] rows={}", replayed);
    }
    let cleared = with_deadline(DB_DEADLINE, storage.clear_all_online()).await?;
    let max_obj = with_deadline(DB_DEADLINE, storage.max_item_obj_id()).await?;
    let clans = with_deadline(DB_DEADLINE, storage.load_clans()).await?;

    let mut w = WorldState::new(content);
    w.ids.seed_objects(max_obj);
    let clan_count = clans.len();
    for (row, members) in clans {
        w.clans.insert(Clan::from_rows(row, members));
    }
    let spawned = w.spawn_npcs();
    tracing::info!(
        "[game] [world_loaded] clans={} npcs={} cleared_online={} max_obj={}",
        clan_count,
        spawned,
        cleared,
        max_obj
    );
    Ok(w)
}

pub struct GameServer {
    pub ctx: GameCtx,
    pub sessions: SessionManager,
    login_throttle: LoginThrottle,
    /// Unix seconds at startup, reported in the version reply
    started_at: i64,
}

impl GameServer {
    pub fn new(ctx: GameCtx) -> Self {
        let max_connections = ctx.config.max_connections;
        let login_limit = ctx.config.login_attempts_per_minute;
        Self {
            ctx,
            sessions: SessionManager::new(max_connections),
            login_throttle: LoginThrottle::new(login_limit),
            started_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Accept until shutdown, then close every session and wait for them
    /// to leave the world.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: Shutdown) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("[game] [ready] addr={}", addr);

        let sweeper = {
            let srv = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut every = tokio::time::interval(THROTTLE_SWEEP);
                loop {
                    tokio::select! {
                        _ = every.tick() => srv.login_throttle.sweep(),
                        _ = shutdown.wait() => break,
                    }
                }
            })
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let srv = Arc::clone(&self);
                        tokio::spawn(async move {
                            srv.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("[game] [accept_failed] err={}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.wait() => break,
            }
        }

        let live = self.sessions.all().await;
        tracing::info!("[game] [stopping] sessions={}", live.len());
        for s in &live {
            s.close(CloseReason::Shutdown);
        }
        self.drain(DRAIN_TIMEOUT).await;
        sweeper.abort();
        Ok(())
    }

    /// Wait until every connection task has cleaned up, or `limit` passes.
    async fn drain(&self, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        while self.sessions.session_count().await > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("[game] [drain_timeout] remaining={}", self.sessions.session_count().await);
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let id = self.sessions.allocate_id();
        let (session, rx) = Session::new(id, peer, self.ctx.config.send_high_water);
        if let Err(e) = self.sessions.insert_session(Arc::clone(&session)).await {
            tracing::warn!("[game] [rejected] addr={} err={}", peer, e);
            return;
        }
        tracing::info!("[game] [connect] session={} addr={}", id, peer);

        let (mut reader, mut writer) = stream.into_split();
        let seed = random_seed();
        if let Err(e) = write_frame(&mut writer, &init_packet_body(seed)).await {
            tracing::debug!("[game] [handshake_failed] session={} err={}", id, e);
            self.sessions.remove_session(id).await;
            return;
        }
        let (encoder, decoder) = Cipher::new(seed).split();
        let writer_task = tokio::spawn(run_writer(
            Arc::clone(&session),
            rx,
            writer,
            encoder,
            self.ctx.config.write_timeout(),
        ));

        // A panicking handler takes down its own task only.
        let reads = {
            let srv = Arc::clone(&self);
            let session = Arc::clone(&session);
            tokio::spawn(async move { srv.read_loop(&session, &mut reader, decoder).await })
        };
        let reason = match reads.await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!("[game] [handler_panicked] session={} err={}", id, e);
                CloseReason::Kicked
            }
        };
        session.close(reason);
        self.cleanup(&session).await;
        let _ = writer_task.await;
        tracing::info!(
            "[game] [disconnect] session={} addr={} reason={}",
            id,
            peer,
            session.close_reason().unwrap_or(reason).as_str()
        );
    }

    /// Leave the world, release the account and forget the session.
    async fn cleanup(&self, session: &Arc<Session>) {
        enter::leave_world(&self.ctx, session.id).await;
        if let Some(account) = session.account() {
            if let Err(e) = crate::persist::with_deadline(
                crate::persist::DB_DEADLINE,
                self.ctx.storage.set_online(&account, false),
            )
            .await
            {
                tracing::error!("[game] [offline_failed] account={} err={}", account, e);
            }
        }
        self.sessions.remove_session(session.id).await;
    }

    async fn read_loop(self: &Arc<Self>, session: &Arc<Session>, reader: &mut OwnedReadHalf, mut decoder: Decoder) -> CloseReason {
        let mut limiter = PacketRateLimiter::new(self.ctx.config.max_packets_per_second);
        let read_timeout = self.ctx.config.read_timeout();
        loop {
            let frame = tokio::select! {
                r = tokio::time::timeout(read_timeout, read_frame(reader)) => r,
                _ = session.closed() => return session.close_reason().unwrap_or(CloseReason::Kicked),
            };
            let mut payload = match frame {
                Err(_) => return CloseReason::ReadTimeout,
                Ok(Err(FrameError::Closed)) => return CloseReason::RemoteClosed,
                Ok(Err(FrameError::Io(e))) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return CloseReason::RemoteClosed;
                }
                Ok(Err(e)) => {
                    tracing::warn!("[game] [codec_error] session={} err={}", session.id, e);
                    return CloseReason::Codec;
                }
                Ok(Ok(p)) => p,
            };
            if !limiter.hit() {
                tracing::warn!("[game] [rate_limited] session={} addr={}", session.id, session.addr);
                return CloseReason::RateLimited;
            }
            decoder.decrypt(&mut payload);
            if let Err(reason) = self.process(session, payload).await {
                return reason;
            }
            if let Some(reason) = session.close_reason() {
                return reason;
            }
        }
    }

    /// Gate one decrypted frame on the session state and run its handler.
    async fn process(self: &Arc<Self>, session: &Arc<Session>, payload: Vec<u8>) -> Result<(), CloseReason> {
        let Some(&opcode) = payload.first() else {
            return Ok(());
        };
        let state = session.state();
        tracing::trace!("[game] [packet_in] session={} op={} len={}", session.id, opcode, payload.len());
        let Some(allowed) = route(opcode) else {
            tracing::debug!("[game] [unknown_opcode] session={} opcode={} state={:?}", session.id, opcode, state);
            return Ok(());
        };
        if !allowed.contains(state) {
            tracing::debug!("[game] [forbidden_opcode] session={} opcode={} state={:?}", session.id, opcode, state);
            return Ok(());
        }
        if (opcode == C_LOGIN || opcode == C_BEANFUN_LOGIN) && !self.login_throttle.allow(session.addr.ip()) {
            tracing::warn!("[game] [login_throttled] session={} ip={}", session.id, session.addr.ip());
            return Ok(());
        }

        let srv = Arc::clone(self);
        let s = Arc::clone(session);
        let task = tokio::spawn(async move { srv.dispatch(&s, &payload).await });
        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!("[game] [malformed] session={} opcode={} err={}", session.id, opcode, e);
                Err(CloseReason::Codec)
            }
            Err(e) if e.is_panic() => {
                tracing::error!("[game] [handler_panic] session={} opcode={}", session.id, opcode);
                Err(CloseReason::Kicked)
            }
            Err(_) => Err(CloseReason::Kicked),
        }
    }

    async fn dispatch(self: &Arc<Self>, s: &Arc<Session>, payload: &[u8]) -> HandlerResult {
        let mut r = Reader::new(payload);
        match r.opcode() {
            // account and character select
            C_CLIENT_VERSION => account::version(self, s),
            C_LOGIN => account::login(self, s, &mut r).await,
            C_BEANFUN_LOGIN => account::beanfun_login(self, s, &mut r).await,
            C_CREATE_CHAR => account::create_char(self, s, &mut r).await,
            C_DELETE_CHAR => account::delete_char(self, s, &mut r).await,
            C_COMMON_CLICK => account::send_char_list(self, s).await,
            C_ENTER_WORLD => enter::enter_world(self, s, &mut r).await,
            C_CHANGE_CHAR => enter::change_char(self, s).await,
            C_QUIT => enter::quit(self, s).await,
            C_RESTART => enter::restart(self, s).await,
            C_ALIVE => enter::keep_alive(self, s).await,
            C_SAVEIO => enter::save_char_config(self, s, &mut r),

            // movement, chat, items, combat
            C_MOVE => field::move_step(self, s, &mut r).await,
            C_CHANGE_DIRECTION => field::change_direction(self, s, &mut r).await,
            C_ENTER_PORTAL => field::enter_portal(self, s, &mut r).await,
            C_TELEPORT => field::confirm_teleport(self, s).await,
            C_OPEN => field::open_door(self, s, &mut r).await,
            C_BOOKMARK => field::add_bookmark(self, s, &mut r).await,
            C_DELETE_BOOKMARK => field::delete_bookmark(self, s, &mut r).await,
            C_CHAT | C_SAY => field::chat(self, s, &mut r).await,
            C_TELL => field::whisper(self, s, &mut r).await,
            C_WINDOWS => field::windows(self, s, &mut r).await,
            C_DROP => field::drop_item(self, s, &mut r).await,
            C_GET => field::pick_up(self, s, &mut r).await,
            C_DESTROY => field::destroy_item(self, s, &mut r).await,
            C_ATTACK => field::attack(self, s, &mut r, false),
            C_FAR_ATTACK => field::attack(self, s, &mut r, true),
            C_USE_SPELL => field::use_spell(self, s, &mut r),

            // trade, party, clan
            C_ATTR => social::yes_no(self, s, &mut r).await,
            C_ASK_XCHG => social::trade_request(self, s).await,
            C_ADD_XCHG => social::trade_add(self, s, &mut r).await,
            C_ACCEPT_XCHG => social::trade_accept(self, s).await,
            C_CANCEL_XCHG => social::trade_cancel(self, s).await,
            C_CREATE_PARTY => social::party_control(self, s, &mut r).await,
            C_PARTY => social::party_who(self, s).await,
            C_LEAVE_PARTY => social::party_leave(self, s).await,
            C_BANISH_PARTY => social::party_banish(self, s, &mut r).await,
            C_CREATE_PLEDGE => social::clan_create(self, s, &mut r).await,
            C_JOIN_PLEDGE => social::clan_join(self, s).await,
            C_LEAVE_PLEDGE => social::clan_leave(self, s).await,
            C_BAN_MEMBER => social::clan_ban(self, s, &mut r).await,
            C_WHO_PLEDGE => social::clan_who(self, s).await,
            C_PLEDGE_WATCH => social::clan_watch(self, s, &mut r).await,
            C_RANK_CONTROL => social::clan_rank(self, s, &mut r).await,
            C_TITLE => social::set_title(self, s, &mut r).await,
            C_UPLOAD_EMBLEM => social::upload_emblem(self, s, &mut r).await,
            C_EMBLEM_DOWNLOAD => social::download_emblem(self, s, &mut r).await,

            // NPCs, pets and the pluggable managers
            C_DIALOG => action::npc_talk(self, s, &mut r).await,
            C_NPC_ACTION => action::npc_action(self, s, &mut r).await,
            C_BUY_SELL => action::buy_sell(self, s, &mut r).await,
            C_USE_ITEM => action::use_item(self, s, &mut r).await,
            C_PETMENU => action::pet_menu(self, s, &mut r).await,
            C_USE_PET_ITEM => action::pet_item(self, s, &mut r).await,
            C_HYPERTEXT_INPUT_RESULT => action::hypertext_input(self, s, &mut r).await,
            C_MAIL => action::mail(self, s, &mut r).await,

            op => Err(PacketError::Unhandled(op)),
        }
    }
}

/// States in which `opcode` is accepted; `None` for opcodes the server
/// does not handle at all. Every opcode routed here must have an arm in
/// `GameServer::dispatch`.
pub fn route(opcode: u8) -> Option<StateSet> {
    const SELECT: StateSet = StateSet::AUTHENTICATED.union(StateSet::RETURNING);
    const CONNECTED: StateSet = StateSet::VERSION_OK.union(SELECT).union(StateSet::IN_WORLD);

    let allowed = match opcode {
        C_CLIENT_VERSION => StateSet::HANDSHAKE,
        C_LOGIN => StateSet::VERSION_OK,
        C_BEANFUN_LOGIN => StateSet::LOGIN.union(StateSet::RETURNING),
        C_CREATE_CHAR | C_DELETE_CHAR | C_COMMON_CLICK => SELECT,
        C_ENTER_WORLD => StateSet::AUTHENTICATED,
        C_ALIVE | C_QUIT => CONNECTED,

        C_CHANGE_CHAR | C_RESTART | C_SAVEIO | C_MOVE | C_CHANGE_DIRECTION | C_ENTER_PORTAL | C_TELEPORT | C_OPEN
        | C_BOOKMARK | C_DELETE_BOOKMARK | C_CHAT | C_SAY | C_TELL | C_WINDOWS | C_DROP | C_GET | C_DESTROY
        | C_ATTACK | C_FAR_ATTACK | C_USE_SPELL | C_ATTR | C_ASK_XCHG | C_ADD_XCHG | C_ACCEPT_XCHG
        | C_CANCEL_XCHG | C_CREATE_PARTY | C_PARTY | C_LEAVE_PARTY | C_BANISH_PARTY | C_CREATE_PLEDGE
        | C_JOIN_PLEDGE | C_LEAVE_PLEDGE | C_BAN_MEMBER | C_WHO_PLEDGE | C_PLEDGE_WATCH | C_RANK_CONTROL
        | C_TITLE | C_UPLOAD_EMBLEM | C_EMBLEM_DOWNLOAD | C_DIALOG | C_NPC_ACTION | C_BUY_SELL | C_USE_ITEM
        | C_PETMENU | C_USE_PET_ITEM | C_HYPERTEXT_INPUT_RESULT | C_MAIL => StateSet::IN_WORLD,

        _ => return None,
    };
    Some(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_version_only_during_handshake() {
        let set = route(C_CLIENT_VERSION).unwrap();
        assert!(set.contains(SessionState::Handshake));
        assert!(!set.contains(SessionState::VersionOk));
        assert!(!route(C_LOGIN).unwrap().contains(SessionState::Handshake));
    }

    #[test]
    fn test_world_opcodes_need_world() {
        for op in [C_MOVE, C_ATTACK, C_CHAT, C_NPC_ACTION, C_ASK_XCHG, C_CREATE_PLEDGE] {
            let set = route(op).unwrap();
            assert!(set.contains(SessionState::InWorld), "opcode {}", op);
            assert!(!set.contains(SessionState::Authenticated), "opcode {}", op);
            assert!(!set.contains(SessionState::ReturningToSelect), "opcode {}", op);
        }
    }

    #[test]
    fn test_select_screen_opcodes() {
        let create = route(C_CREATE_CHAR).unwrap();
        assert!(create.contains(SessionState::Authenticated));
        assert!(create.contains(SessionState::ReturningToSelect));
        assert!(!create.contains(SessionState::InWorld));
        assert!(!route(C_ENTER_WORLD).unwrap().contains(SessionState::InWorld));
    }

    #[test]
    fn test_keep_alive_anywhere_but_handshake() {
        let set = route(C_ALIVE).unwrap();
        assert!(!set.contains(SessionState::Handshake));
        assert!(set.contains(SessionState::VersionOk));
        assert!(set.contains(SessionState::InWorld));
        assert!(!set.contains(SessionState::Disconnecting));
    }

    #[tokio::test]
    async fn test_boot_world_restores_clans_and_flags() {
        use crate::persist::memory::MemoryStorage;

        let mem = MemoryStorage::new();
        mem.create_account("alice", "hash").await.unwrap();
        mem.set_online("alice", true).await.unwrap();
        let clan_id = mem.create_clan(7, "Arthur", "Knights", 20260101).await.unwrap();

        let w = boot_world(&mem, Arc::new(Content::default())).await.unwrap();
        assert!(!mem.account_online("alice"));
        assert_eq!(w.clans.clan_of(7).map(|c| c.id), Some(clan_id));
        assert!(w.clans.name_exists("knights"));
    }

    #[tokio::test]
    async fn test_every_routed_opcode_has_a_handler() {
        let (ctx, _mem, _rx) = crate::game::test_support::ctx(Content::default());
        let srv = Arc::new(GameServer::new(ctx));
        let mut routed = 0;
        for op in 0..=u8::MAX {
            if route(op).is_none() {
                continue;
            }
            routed += 1;
            let (s, _out) = Session::new(u64::from(op) + 1, "127.0.0.1:1".parse().unwrap(), 1 << 16);
            let r = srv.dispatch(&s, &[op]).await;
            assert!(!matches!(r, Err(PacketError::Unhandled(_))), "opcode {} routed without a handler", op);
        }
        assert!(routed > 50);
    }

    #[test]
    fn test_unknown_opcode_has_no_route() {
        assert!(route(10).is_none());
        assert!(route(199).is_none());
    }
}
