use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aden::config::ServerConfig;
use aden::core::{wait_for_signal, Shutdown};
use aden::database::Content;
use aden::game::{Deps, GameCtx};
use aden::persist::mysql::MySqlStorage;
use aden::persist::worker::spawn_worker;
use aden::persist::Storage;
use aden::servers::game::{boot_world, GameServer};
use aden::tick::queue::action_queues;
use aden::tick::TickEngine;
use tokio::net::TcpListener;

/// Queue depth of the background writer.
const PERSIST_QUEUE: usize = 1024;
const PERSIST_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: game_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file).with_context(|| format!("Cannot load config: {}", conf_file))?;
    let config = Arc::new(config);

    let content = Content::load(&config.data_dir).with_context(|| format!("Cannot load content: {}", config.data_dir))?;
    let content = Arc::new(content);

    let storage = MySqlStorage::connect(&config.database_url(), 10)
        .await
        .with_context(|| format!("Cannot connect to DB: {}", config.sql_ip))?;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let world = boot_world(storage.as_ref(), content).await?.shared();
    let (persist, persist_task) = spawn_worker(Arc::clone(&storage), PERSIST_QUEUE);
    let (queues, receivers) = action_queues(config.attack_queue, config.skill_queue);

    let deps = Deps::default();
    deps.report_missing();

    let ctx = GameCtx { config: Arc::clone(&config), world, storage, persist, deps, queues };

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Cannot bind: {}", config.bind_addr()))?;

    tracing::info!("[game] [started] addr={} server_id={}", config.bind_addr(), config.server_id);

    let shutdown = Shutdown::new();
    let server = Arc::new(GameServer::new(ctx.clone()));
    let net_task = tokio::spawn(server.run(listener, shutdown.clone()));
    let tick_task = tokio::spawn(TickEngine::new(ctx, receivers).run(shutdown.clone()));

    let signal = wait_for_signal().await;
    tracing::info!("[game] [signal] kind={:?}", signal);
    shutdown.request_shutdown();

    match net_task.await {
        Ok(Err(e)) => tracing::error!("[game] [net_failed] err={:#}", e),
        Err(e) => tracing::error!("[game] [net_panicked] err={}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = tick_task.await {
        tracing::error!("[game] [tick_panicked] err={}", e);
    }
    // The writer exits once the last handle drops. A session stuck past
    // the drain keeps its handle alive, so do not wait forever.
    if tokio::time::timeout(PERSIST_DRAIN, persist_task).await.is_err() {
        tracing::warn!("[game] [persist_drain_timeout]");
    }

    tracing::info!("[game] [stopped]");
    Ok(())
}
