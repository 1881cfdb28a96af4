mod common;

use aden::network::opcodes::*;
use aden::network::packet::{Reader, Writer};
use aden::persist::snapshot::{save_snapshot, PlayerSnapshot};
use aden::persist::ItemRow;
use common::{Client, TestServer};

const SWORD: i32 = 4;
const SWORD_OBJ: u32 = 101;

fn item(obj_id: u32, char_id: i32, item_id: i32, count: i32) -> ItemRow {
    ItemRow { obj_id, char_id, item_id, count, enchant: 0, bless: 1, identified: true, equipped: false }
}

/// Alice faces east toward Bob, who faces west. Both are in the world.
async fn face_to_face(srv: &TestServer) -> (Client, Client, i32, i32) {
    let alice_id = srv.seed_char("alice", "Alice", 33000, 33000, 2);
    let bob_id = srv.seed_char("bob", "Bob", 33001, 33000, 6);
    srv.mem.seed_items(alice_id, vec![item(100, alice_id, 40308, 5000), item(SWORD_OBJ, alice_id, SWORD, 1)]);
    srv.mem.seed_items(bob_id, vec![item(102, bob_id, 40308, 10)]);

    let mut alice = Client::connect(srv.addr).await;
    alice.login_ok("alice", "pw").await;
    alice.enter("Alice").await;
    alice.own_object_id().await;

    let mut bob = Client::connect(srv.addr).await;
    bob.login_ok("bob", "pw").await;
    bob.enter("Bob").await;
    bob.own_object_id().await;
    (alice, bob, alice_id, bob_id)
}

/// Bob answers the trade prompt Alice raised.
async fn open_trade(alice: &mut Client, bob: &mut Client, accept: bool) {
    alice.send(&mut Writer::new(C_ASK_XCHG)).await;
    let prompt = bob.recv_op(S_YES_NO).await;
    let mut r = Reader::new(&prompt);
    r.h().unwrap();
    let counter = r.d().unwrap();
    assert_eq!(r.h().unwrap(), YN_TRADE);
    bob.send(Writer::new(C_ATTR).h(0).d(counter).h(YN_TRADE).h(accept as u16)).await;
}

#[tokio::test]
async fn test_trade_moves_item_through_wal() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_id, bob_id) = face_to_face(&srv).await;

    open_trade(&mut alice, &mut bob, true).await;
    alice.recv_op(S_TRADE).await;
    bob.recv_op(S_TRADE).await;

    alice.send(Writer::new(C_ADD_XCHG).d(SWORD_OBJ as i32).d(1)).await;
    let added = bob.recv_op(S_TRADE_ADD_ITEM).await;
    assert_eq!(added[1], 1, "partner panel");

    alice.send(&mut Writer::new(C_ACCEPT_XCHG)).await;
    bob.send(&mut Writer::new(C_ACCEPT_XCHG)).await;
    assert_eq!(alice.recv_op(S_TRADE_STATUS).await[1], 0);
    assert_eq!(bob.recv_op(S_TRADE_STATUS).await[1], 0);

    let wal = srv.mem.wal_rows();
    let row = wal.iter().find(|r| r.obj_id == SWORD_OBJ).expect("sword row in wal");
    assert_eq!((row.from_char, row.to_char, row.item_id), (alice_id, bob_id, SWORD));

    let w = srv.server.ctx.world.read().await;
    let alice_sid = w.session_of_char(alice_id).unwrap();
    let bob_sid = w.session_of_char(bob_id).unwrap();
    assert!(w.player(alice_sid).unwrap().inventory.get(SWORD_OBJ).is_none());
    let bob_has_sword = w.player(bob_sid).unwrap().inventory.items().iter().any(|i| i.item_id == SWORD);
    assert!(bob_has_sword);

    // Both inventories are stored together with the processed mark.
    assert!(wal.iter().all(|r| r.processed));
    assert!(srv.mem.inventory_of(bob_id).iter().any(|r| r.obj_id == SWORD_OBJ));
    assert!(!srv.mem.inventory_of(alice_id).iter().any(|r| r.obj_id == SWORD_OBJ));
}

#[tokio::test]
async fn test_save_during_open_trade_keeps_staged_goods_home() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_id, _) = face_to_face(&srv).await;

    open_trade(&mut alice, &mut bob, true).await;
    alice.recv_op(S_TRADE).await;
    alice.send(Writer::new(C_ADD_XCHG).d(SWORD_OBJ as i32).d(1)).await;
    bob.recv_op(S_TRADE_ADD_ITEM).await;
    alice.send(Writer::new(C_ADD_XCHG).d(0).d(1000)).await;
    bob.recv_op(S_TRADE_ADD_ITEM).await;

    let snap = {
        let w = srv.server.ctx.world.read().await;
        let p = w.player(w.session_of_char(alice_id).unwrap()).unwrap();
        assert_eq!(p.inventory.gold(), 4000);
        PlayerSnapshot::capture(p)
    };
    assert_eq!(save_snapshot(srv.mem.as_ref(), &snap).await, 0);

    let stored = srv.mem.inventory_of(alice_id);
    assert!(stored.iter().any(|r| r.obj_id == SWORD_OBJ));
    let gold: i32 = stored.iter().filter(|r| r.item_id == 40308).map(|r| r.count).sum();
    assert_eq!(gold, 5000);
}

#[tokio::test]
async fn test_answer_after_asker_left_is_ignored() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_id, bob_id) = face_to_face(&srv).await;

    alice.send(&mut Writer::new(C_ASK_XCHG)).await;
    let prompt = bob.recv_op(S_YES_NO).await;
    let mut r = Reader::new(&prompt);
    r.h().unwrap();
    let counter = r.d().unwrap();

    alice.send(&mut Writer::new(C_QUIT)).await;
    assert!(alice.closed_within(std::time::Duration::from_secs(3)).await);
    for _ in 0..100 {
        if srv.server.ctx.world.read().await.session_of_char(alice_id).is_none() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    bob.send(Writer::new(C_ATTR).h(0).d(counter).h(YN_TRADE).h(1)).await;
    bob.send(&mut Writer::new(C_ALIVE)).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let w = srv.server.ctx.world.read().await;
    let sid = w.session_of_char(bob_id).expect("bob still in the world");
    let p = w.player(sid).unwrap();
    assert!(p.trade.is_none());
    assert!(p.pending.is_none());
    assert!(!p.session.is_closed());
}

#[tokio::test]
async fn test_cancel_returns_staged_item() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_id, _) = face_to_face(&srv).await;

    open_trade(&mut alice, &mut bob, true).await;
    alice.recv_op(S_TRADE).await;
    alice.send(Writer::new(C_ADD_XCHG).d(SWORD_OBJ as i32).d(1)).await;
    bob.recv_op(S_TRADE_ADD_ITEM).await;

    bob.send(&mut Writer::new(C_CANCEL_XCHG)).await;
    assert_eq!(alice.recv_op(S_TRADE_STATUS).await[1], 1);
    assert_eq!(bob.recv_op(S_TRADE_STATUS).await[1], 1);

    assert!(srv.mem.wal_rows().is_empty());
    let w = srv.server.ctx.world.read().await;
    let sid = w.session_of_char(alice_id).unwrap();
    let p = w.player(sid).unwrap();
    assert!(p.trade.is_none());
    assert!(p.inventory.items().iter().any(|i| i.item_id == SWORD));
}

#[tokio::test]
async fn test_declined_prompt_opens_nothing() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, alice_id, bob_id) = face_to_face(&srv).await;

    open_trade(&mut alice, &mut bob, false).await;
    let line = alice.recv_op(S_MESSAGE).await;
    assert_eq!(line[1], 9);

    let w = srv.server.ctx.world.read().await;
    for id in [alice_id, bob_id] {
        let sid = w.session_of_char(id).unwrap();
        assert!(w.player(sid).unwrap().trade.is_none());
    }
}

#[tokio::test]
async fn test_disconnect_mid_trade_restores_partner() {
    let srv = TestServer::start().await;
    let (mut alice, mut bob, _, bob_id) = face_to_face(&srv).await;

    open_trade(&mut alice, &mut bob, true).await;
    bob.recv_op(S_TRADE).await;
    bob.send(Writer::new(C_ADD_XCHG).d(0).d(5)).await;
    alice.recv_op(S_TRADE_ADD_ITEM).await;

    drop(alice);
    assert_eq!(bob.recv_op(S_TRADE_STATUS).await[1], 1);

    let w = srv.server.ctx.world.read().await;
    let sid = w.session_of_char(bob_id).unwrap();
    assert_eq!(w.player(sid).unwrap().inventory.gold(), 10);
}
