//! A game server over memory storage and a client that speaks the
//! obfuscated wire format.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aden::config::ServerConfig;
use aden::core::Shutdown;
use aden::database::Content;
use aden::game::{Deps, GameCtx};
use aden::network::crypt::{Decoder, Encoder};
use aden::network::opcodes::*;
use aden::network::packet::{Reader, Writer};
use aden::network::{read_frame, write_frame};
use aden::persist::memory::MemoryStorage;
use aden::persist::worker::spawn_worker;
use aden::persist::{CharacterRow, Storage};
use aden::servers::game::{boot_world, GameServer};
use aden::tick::queue::action_queues;
use tokio::net::TcpStream;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub const ITEMS: &str = r#"
items:
  - { id: 40308, name: adena, stackable: true, weight: 0 }
  - { id: 4, name: long sword, weight: 50, slot: weapon, weapon_visual: 4, on_use: equip }
  - { id: 40010, name: potion, stackable: true, on_use: heal, power: 15 }
"#;

pub const MAPS: &str = r#"
maps:
  - { id: 4, start_x: 32448, end_x: 34303, start_y: 32064, end_y: 33535 }
  - { id: 2005, start_x: 32640, end_x: 32767, start_y: 32768, end_y: 32895 }
"#;

pub struct TestServer {
    pub addr: SocketAddr,
    pub mem: Arc<MemoryStorage>,
    pub server: Arc<GameServer>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::test_only()).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let content = Arc::new(Content::from_yaml(ITEMS, "", "", MAPS).unwrap());
        let mem = Arc::new(MemoryStorage::new());
        let storage: Arc<dyn Storage> = mem.clone();
        let world = boot_world(storage.as_ref(), content).await.unwrap().shared();
        let (persist, _task) = spawn_worker(Arc::clone(&storage), 64);
        let (queues, _receivers) = action_queues(16, 16);
        let ctx = GameCtx { config: Arc::new(config), world, storage, persist, deps: Deps::default(), queues };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ctx));
        let shutdown = Shutdown::new();
        tokio::spawn(Arc::clone(&server).run(listener, shutdown.clone()));
        Self { addr, mem, server, shutdown }
    }

    /// A character placed directly in storage, owned by `account`.
    pub fn seed_char(&self, account: &str, name: &str, x: i32, y: i32, heading: i32) -> i32 {
        self.mem.seed_character(CharacterRow {
            account: account.to_string(),
            name: name.to_string(),
            class_type: 1,
            class_gfx: 61,
            level: 10,
            hp: 100,
            mp: 20,
            x,
            y,
            map: 4,
            heading,
            food: 40,
            base: aden::game::types::StatDelta { str_: 16, dex: 12, con: 14, wis: 9, cha: 12, intel: 12, ..Default::default() },
            ..Default::default()
        })
    }
}

pub struct Client {
    stream: TcpStream,
    enc: Encoder,
    dec: Decoder,
}

impl Client {
    /// Connect and consume the plaintext init packet.
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let init = read_frame(&mut stream).await.unwrap();
        assert_eq!(init[0], S_INIT_PACKET);
        let seed = u32::from_le_bytes([init[1], init[2], init[3], init[4]]);
        Self { stream, enc: Encoder::new(seed), dec: Decoder::new(seed) }
    }

    pub async fn send(&mut self, w: &mut Writer) {
        let mut payload = w.finish().to_vec();
        self.enc.encrypt(&mut payload);
        write_frame(&mut self.stream, &payload).await.unwrap();
    }

    pub async fn recv(&mut self) -> Vec<u8> {
        let mut payload = tokio::time::timeout(RECV_TIMEOUT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for a frame")
            .unwrap();
        self.dec.decrypt(&mut payload);
        payload
    }

    /// Skip frames until one with `opcode` arrives.
    pub async fn recv_op(&mut self, opcode: u8) -> Vec<u8> {
        loop {
            let p = self.recv().await;
            if p[0] == opcode {
                return p;
            }
        }
    }

    /// True when the server closes the socket before `limit` passes.
    pub async fn closed_within(&mut self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            match tokio::time::timeout_at(deadline, read_frame(&mut self.stream)).await {
                Err(_) => return false,
                Ok(Err(_)) => return true,
                Ok(Ok(mut p)) => self.dec.decrypt(&mut p),
            }
        }
    }

    pub async fn version(&mut self) {
        self.send(&mut Writer::new(C_CLIENT_VERSION)).await;
        self.recv_op(S_SERVER_VERSION).await;
    }

    /// Log in and return the login result code.
    pub async fn login(&mut self, name: &str, password: &str) -> u16 {
        self.send(Writer::new(C_LOGIN).s(name).s(password)).await;
        let p = self.recv_op(S_LOGIN_CHECK).await;
        u16::from_le_bytes([p[1], p[2]])
    }

    /// Version check plus a successful login. Returns `(count, slots)`
    /// from the character count packet.
    pub async fn login_ok(&mut self, name: &str, password: &str) -> (u8, u8) {
        self.version().await;
        assert_eq!(self.login(name, password).await, 0);
        let p = self.recv_op(S_NUM_CHARACTER).await;
        (p[1], p[2])
    }

    pub async fn enter(&mut self, name: &str) {
        self.send(Writer::new(C_ENTER_WORLD).s(name)).await;
        self.recv_op(S_ENTER_WORLD_CHECK).await;
    }

    /// Read frames until the own-character pack and return its object id.
    pub async fn own_object_id(&mut self) -> i32 {
        let p = self.recv_op(S_PUT_OBJECT).await;
        let mut r = Reader::new(&p);
        r.h().unwrap();
        r.h().unwrap();
        r.d().unwrap()
    }
}
