mod common;

use std::time::Duration;

use aden::game::movement::MOVE_HEADING_KEY;
use aden::network::opcodes::*;
use aden::network::packet::{Reader, Writer};
use aden::persist::Storage;
use common::{Client, TestServer};

async fn two_players(srv: &TestServer) -> (Client, Client, i32, i32) {
    srv.seed_char("alice", "Alice", 33000, 33000, 2);
    let bob_id = srv.seed_char("bob", "Bob", 33003, 33000, 6);

    let mut alice = Client::connect(srv.addr).await;
    alice.login_ok("alice", "pw").await;
    alice.enter("Alice").await;
    let alice_obj = alice.own_object_id().await;

    let mut bob = Client::connect(srv.addr).await;
    bob.login_ok("bob", "pw").await;
    bob.enter("Bob").await;
    bob.own_object_id().await;
    (alice, bob, alice_obj, bob_id)
}

#[tokio::test]
async fn test_arrival_is_shown_to_neighbour() {
    let srv = TestServer::start().await;
    let (mut alice, _bob, _, _) = two_players(&srv).await;

    // Bob walked into Alice's view after she entered.
    let put = alice.recv_op(S_PUT_OBJECT).await;
    let mut r = Reader::new(&put);
    assert_eq!(r.h().unwrap(), 33003);
    assert_eq!(r.h().unwrap(), 33000);
}

#[tokio::test]
async fn test_say_reaches_nearby_player() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_obj, _) = two_players(&srv).await;

    alice.send(Writer::new(C_CHAT).c(0).s("hello")).await;
    let say = bob.recv_op(S_SAY).await;
    let mut r = Reader::new(&say);
    assert_eq!(r.c().unwrap(), 0);
    assert_eq!(r.d().unwrap(), alice_obj);
    assert_eq!(r.s().unwrap(), "Alice: hello");

    // The speaker sees the line too.
    alice.recv_op(S_SAY).await;
}

#[tokio::test]
async fn test_whisper_reaches_named_player() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, _, _) = two_players(&srv).await;

    alice.send(Writer::new(C_TELL).s("bob").s("psst")).await;
    let tell = bob.recv_op(S_TELL).await;
    let mut r = Reader::new(&tell);
    assert_eq!(r.s().unwrap(), "Alice");
    assert_eq!(r.s().unwrap(), "psst");
}

#[tokio::test]
async fn test_step_is_seen_by_neighbour() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_obj, _) = two_players(&srv).await;

    // Heading 2 is east.
    alice.send(Writer::new(C_MOVE).h(33000).h(33000).c(2 ^ MOVE_HEADING_KEY)).await;
    loop {
        let mv = bob.recv_op(S_MOVE_OBJECT).await;
        let mut r = Reader::new(&mv);
        if r.d().unwrap() == alice_obj {
            assert_eq!(r.h().unwrap(), 33000);
            break;
        }
    }
    let w = srv.server.ctx.world.read().await;
    let p = w.players().find(|p| p.name == "Alice").unwrap();
    assert_eq!((p.x, p.y), (33001, 33000));
}

#[tokio::test]
async fn test_keep_alive_answers_with_time() {
    let srv = TestServer::start().await;
    let (mut alice, _bob, _, _) = two_players(&srv).await;
    alice.send(&mut Writer::new(C_ALIVE)).await;
    let t = alice.recv_op(S_TIME).await;
    assert_eq!(t.len() % 4, 0);
}

#[tokio::test]
async fn test_char_config_is_stored() {
    let srv = TestServer::start().await;
    let (_alice, mut bob, _, bob_id) = two_players(&srv).await;

    bob.send(Writer::new(C_SAVEIO).d(11).bytes(&[1, 2, 3, 4, 5, 6, 7, 8])).await;
    let mut stored = None;
    for _ in 0..100 {
        stored = srv.mem.load_char_config(bob_id).await.unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let blob = stored.expect("config saved");
    assert_eq!(&blob[..4], &8i32.to_le_bytes());
    assert_eq!(&blob[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn test_disconnect_saves_position() {
    let srv = TestServer::start().await;
    let (mut alice, _bob, _, _) = two_players(&srv).await;

    alice.send(Writer::new(C_MOVE).h(33000).h(33000).c(4 ^ MOVE_HEADING_KEY)).await;
    alice.send(&mut Writer::new(C_QUIT)).await;
    assert!(alice.closed_within(Duration::from_secs(3)).await);

    let mut saved = None;
    for _ in 0..100 {
        let row = srv.mem.character_by_name("Alice").unwrap();
        if row.y == 33001 {
            saved = Some(row);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let row = saved.expect("position saved");
    assert_eq!((row.x, row.y, row.heading), (33000, 33001, 4));
}
