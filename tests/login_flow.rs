mod common;

use std::time::Duration;

use aden::network::opcodes::*;
use aden::network::packet::Writer;
use common::{Client, TestServer};

const KNIGHT: u8 = 1;
const KNIGHT_STATS: [u8; 6] = [16, 12, 14, 9, 12, 12];

async fn create_char(c: &mut Client, name: &str, stats: [u8; 6]) -> u8 {
    let mut w = Writer::new(C_CREATE_CHAR);
    w.s(name).c(KNIGHT).c(0);
    for v in stats {
        w.c(v);
    }
    c.send(&mut w).await;
    let p = c.recv_op(S_CREATE_CHARACTER_CHECK).await;
    p[1]
}

async fn wait_offline(srv: &TestServer, account: &str) -> bool {
    for _ in 0..100 {
        if !srv.mem.account_online(account) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_new_account_creates_character_and_enters() {
    let srv = TestServer::start().await;
    let mut c = Client::connect(srv.addr).await;

    let (count, slots) = c.login_ok("alice", "secret").await;
    assert_eq!(count, 0);
    assert_eq!(slots, 6);
    assert!(srv.mem.account_online("alice"));

    assert_eq!(create_char(&mut c, "Arthur", KNIGHT_STATS).await, 2);
    c.recv_op(S_NEW_CHAR_INFO).await;
    let row = srv.mem.character_by_name("Arthur").unwrap();
    assert_eq!(row.account, "alice");
    assert_eq!(row.map, 2005);

    c.enter("Arthur").await;
    assert!(c.own_object_id().await > 0);
}

#[tokio::test]
async fn test_duplicate_name_and_bad_stats_rejected() {
    let srv = TestServer::start().await;
    srv.seed_char("bob", "Arthur", 33000, 33000, 0);
    let mut c = Client::connect(srv.addr).await;
    c.login_ok("alice", "secret").await;

    assert_eq!(create_char(&mut c, "Arthur", KNIGHT_STATS).await, 6);
    assert_eq!(create_char(&mut c, "Lancelot", [16, 12, 14, 9, 12, 20]).await, 9);
    assert!(srv.mem.character_by_name("Lancelot").is_none());
}

#[tokio::test]
async fn test_wrong_password_after_quit() {
    let srv = TestServer::start().await;
    let mut first = Client::connect(srv.addr).await;
    first.login_ok("alice", "secret").await;
    first.send(&mut Writer::new(C_QUIT)).await;
    assert!(first.closed_within(Duration::from_secs(3)).await);
    assert!(wait_offline(&srv, "alice").await);

    let mut second = Client::connect(srv.addr).await;
    second.version().await;
    assert_eq!(second.login("alice", "not-it").await, 8);
}

#[tokio::test]
async fn test_second_login_while_online_refused() {
    let srv = TestServer::start().await;
    let mut first = Client::connect(srv.addr).await;
    first.login_ok("alice", "secret").await;

    let mut second = Client::connect(srv.addr).await;
    second.version().await;
    assert_eq!(second.login("alice", "secret").await, 7);
}

#[tokio::test]
async fn test_simultaneous_logins_admit_one() {
    let srv = TestServer::start().await;
    let mut setup = Client::connect(srv.addr).await;
    setup.login_ok("alice", "secret").await;
    setup.send(&mut Writer::new(C_QUIT)).await;
    assert!(setup.closed_within(Duration::from_secs(3)).await);
    assert!(wait_offline(&srv, "alice").await);

    let mut a = Client::connect(srv.addr).await;
    let mut b = Client::connect(srv.addr).await;
    a.version().await;
    b.version().await;
    let (ca, cb) = tokio::join!(a.login("alice", "secret"), b.login("alice", "secret"));
    let mut codes = [ca, cb];
    codes.sort_unstable();
    assert_eq!(codes[0], 0);
    assert!(codes[1] == 7 || codes[1] == 0x16, "loser got {}", codes[1]);
}

#[tokio::test]
async fn test_failed_online_write_frees_the_account() {
    let srv = TestServer::start().await;
    let mut setup = Client::connect(srv.addr).await;
    setup.login_ok("alice", "secret").await;
    setup.send(&mut Writer::new(C_QUIT)).await;
    assert!(setup.closed_within(Duration::from_secs(3)).await);
    assert!(wait_offline(&srv, "alice").await);

    srv.mem.set_fail_online(true);
    let mut first = Client::connect(srv.addr).await;
    first.version().await;
    assert_eq!(first.login("alice", "secret").await, 8);

    srv.mem.set_fail_online(false);
    let mut second = Client::connect(srv.addr).await;
    second.version().await;
    assert_eq!(second.login("alice", "secret").await, 0);
}

#[tokio::test]
async fn test_banned_account_refused() {
    let srv = TestServer::start().await;
    let mut first = Client::connect(srv.addr).await;
    first.login_ok("alice", "secret").await;
    first.send(&mut Writer::new(C_QUIT)).await;
    assert!(first.closed_within(Duration::from_secs(3)).await);
    assert!(wait_offline(&srv, "alice").await);
    srv.mem.set_banned("alice", true);

    let mut second = Client::connect(srv.addr).await;
    second.version().await;
    assert_eq!(second.login("alice", "secret").await, 8);
}

#[tokio::test]
async fn test_world_opcode_before_login_is_ignored() {
    let srv = TestServer::start().await;
    let mut c = Client::connect(srv.addr).await;
    c.send(Writer::new(C_ENTER_WORLD).s("Arthur")).await;
    c.send(Writer::new(C_CHAT).c(0).s("hello")).await;

    // The session is still in the handshake and answers the version check.
    c.version().await;
    assert_eq!(c.login("alice", "secret").await, 0);
}

#[tokio::test]
async fn test_enter_rejects_foreign_character() {
    let srv = TestServer::start().await;
    srv.seed_char("bob", "Mordred", 33000, 33000, 0);
    let mut c = Client::connect(srv.addr).await;
    c.login_ok("alice", "secret").await;

    c.send(Writer::new(C_ENTER_WORLD).s("Mordred")).await;
    assert!(c.closed_within(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_change_char_returns_to_select() {
    let srv = TestServer::start().await;
    srv.seed_char("alice", "Arthur", 33000, 33000, 0);
    let mut c = Client::connect(srv.addr).await;
    let (count, _) = c.login_ok("alice", "secret").await;
    assert_eq!(count, 1);
    c.enter("Arthur").await;
    c.own_object_id().await;

    c.send(&mut Writer::new(C_CHANGE_CHAR)).await;
    let p = c.recv_op(S_NUM_CHARACTER).await;
    assert_eq!(p[1], 1);
    let info = c.recv_op(S_CHARACTER_INFO).await;
    assert!(info.len() > 1);

    // Back on the select screen the same character can enter again.
    c.enter("Arthur").await;
    assert!(c.own_object_id().await > 0);
}

#[tokio::test]
async fn test_shutdown_closes_and_releases_accounts() {
    let srv = TestServer::start().await;
    srv.seed_char("alice", "Arthur", 33000, 33000, 0);
    let mut c = Client::connect(srv.addr).await;
    c.login_ok("alice", "secret").await;
    c.enter("Arthur").await;
    c.own_object_id().await;

    srv.shutdown.request_shutdown();
    assert!(c.closed_within(Duration::from_secs(5)).await);
    assert!(wait_offline(&srv, "alice").await);
    assert_eq!(srv.server.sessions.session_count().await, 0);
}
