//! Version check, login and the character select screen.

use chrono::Datelike;

use super::{GameServer, HandlerResult};
use crate::game::packets::{
    build_character_info, build_create_char_check, build_delete_char_check, build_login_check, build_new_char_info,
    build_num_character, build_server_version,
};
use crate::game::types::{ClassType, StatDelta, CREATE_STAT_TOTAL};
use crate::network::packet::{encode_big5, Reader};
use crate::persist::{with_deadline, CharacterRow, DB_DEADLINE};
use crate::session::{Session, SessionState};

pub const LOGIN_OK: u16 = 0x00;
pub const LOGIN_ALREADY_ONLINE: u16 = 0x07;
pub const LOGIN_WRONG_PASSWORD: u16 = 0x08;
pub const LOGIN_IN_USE: u16 = 0x16;
/// External account system: no such account
pub const LOGIN_EXT_NO_ACCOUNT: u16 = 155;
/// External account system: bad password
pub const LOGIN_EXT_BAD_PASSWORD: u16 = 149;

pub const CREATE_OK: u8 = 0x02;
pub const CREATE_NAME_EXISTS: u8 = 0x06;
pub const CREATE_INVALID: u8 = 0x09;
pub const CREATE_NO_SLOT: u8 = 0x15;

pub const DELETE_NOW: u8 = 0x05;
pub const DELETE_DELAYED: u8 = 0x51;

/// Grace period of a delayed delete.
pub const DELETE_GRACE_SECS: i64 = 7 * 86_400;

pub const START_X: i32 = 32689;
pub const START_Y: i32 = 32842;
pub const START_MAP: i32 = 2005;
pub const START_FOOD: i32 = 40;
pub const START_AC: i32 = 10;

/// Longest character name, in client-encoded bytes.
pub const MAX_NAME_BYTES: usize = 16;

const EXT_LOGIN: u8 = 0x06;
const EXT_RELIST: u8 = 0x0b;
const EXT_LOGOUT: u8 = 0x1c;

pub fn version(srv: &GameServer, s: &Session) -> HandlerResult {
    let cfg = &srv.ctx.config;
    let started = srv.started_at();
    let uptime = chrono::Utc::now().timestamp() - started;
    s.send(build_server_version(cfg.server_id, cfg.language, started as i32, uptime as i32));
    s.set_state(SessionState::VersionOk);
    tracing::debug!("[account] [version] session={} addr={}", s.id, s.addr);
    Ok(())
}

pub async fn login(srv: &GameServer, s: &Session, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?.to_lowercase();
    let password = r.s()?;
    authenticate(srv, s, &name, &password, false).await;
    Ok(())
}

/// Login through the external account system. The leading action byte
/// also carries the re-list and logout requests of that client.
pub async fn beanfun_login(srv: &GameServer, s: &Session, r: &mut Reader<'_>) -> HandlerResult {
    match r.c()? {
        EXT_LOGIN => {
            let name = r.s()?.to_lowercase();
            let password = r.s()?;
            authenticate(srv, s, &name, &password, true).await;
        }
        EXT_RELIST => {
            if s.account().is_some() {
                send_char_list(srv, s).await?;
            }
        }
        EXT_LOGOUT => s.close(crate::session::CloseReason::Quit),
        other => tracing::debug!("[account] [ext_action_unknown] session={} action={}", s.id, other),
    }
    Ok(())
}

async fn authenticate(srv: &GameServer, s: &Session, name: &str, password: &str, external: bool) {
    let (no_account, bad_password) = if external {
        (LOGIN_EXT_NO_ACCOUNT, LOGIN_EXT_BAD_PASSWORD)
    } else {
        (LOGIN_WRONG_PASSWORD, LOGIN_WRONG_PASSWORD)
    };
    if s.account().is_some() {
        tracing::debug!("[account] [relogin_ignored] session={}", s.id);
        return;
    }
    if name.is_empty() || password.is_empty() {
        s.send(build_login_check(no_account));
        return;
    }

    let storage = &srv.ctx.storage;
    let existing = match with_deadline(DB_DEADLINE, storage.load_account(name)).await {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("[account] [load_failed] account={} err={}", name, e);
            s.send(build_login_check(bad_password));
            return;
        }
    };
    let account = match existing {
        Some(a) => {
            if !verify_password(password, &a.password_hash).await {
                tracing::info!("[account] [wrong_password] account={} addr={}", name, s.addr);
                s.send(build_login_check(bad_password));
                return;
            }
            a
        }
        None if srv.ctx.config.auto_create_accounts => {
            let Some(hash) = hash_password(password, srv.ctx.config.bcrypt_cost).await else {
                s.send(build_login_check(bad_password));
                return;
            };
            match with_deadline(DB_DEADLINE, storage.create_account(name, &hash)).await {
                Ok(a) => {
                    tracing::info!("[account] [created] account={} addr={}", name, s.addr);
                    a
                }
                Err(e) => {
                    tracing::error!("[account] [create_failed] account={} err={}", name, e);
                    s.send(build_login_check(bad_password));
                    return;
                }
            }
        }
        None => {
            s.send(build_login_check(no_account));
            return;
        }
    };

    if account.banned {
        tracing::info!("[account] [banned] account={} addr={}", name, s.addr);
        s.send(build_login_check(LOGIN_WRONG_PASSWORD));
        return;
    }
    if let Err(holder) = srv.sessions.claim_account(s, name).await {
        let code = if account.online { LOGIN_ALREADY_ONLINE } else { LOGIN_IN_USE };
        tracing::info!(
            "[account] [duplicate_login] account={} addr={} holder={} code={}",
            name,
            s.addr,
            holder.id,
            code
        );
        s.send(build_login_check(code));
        return;
    }
    if account.online {
        tracing::warn!("[account] [stale_online] account={}", name);
    }
    if let Err(e) = with_deadline(DB_DEADLINE, storage.set_online(name, true)).await {
        tracing::error!("[account] [online_failed] account={} err={}", name, e);
        srv.sessions.release_account(s).await;
        s.send(build_login_check(bad_password));
        return;
    }

    s.send(build_login_check(LOGIN_OK));
    s.set_state(SessionState::Authenticated);
    tracing::info!("[account] [login] session={} account={} addr={} external={}", s.id, name, s.addr, external);
    let _ = send_char_list(srv, s).await;
}

async fn verify_password(password: &str, hash: &str) -> bool {
    let (password, hash) = (password.to_string(), hash.to_string());
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => {
            tracing::warn!("[account] [bad_hash] err={}", e);
            false
        }
        Err(e) => {
            tracing::error!("[account] [verify_join_failed] err={}", e);
            false
        }
    }
}

async fn hash_password(password: &str, cost: u32) -> Option<String> {
    let password = password.to_string();
    match tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await {
        Ok(Ok(h)) => Some(h),
        Ok(Err(e)) => {
            tracing::error!("[account] [hash_failed] err={}", e);
            None
        }
        Err(e) => {
            tracing::error!("[account] [hash_join_failed] err={}", e);
            None
        }
    }
}

/// Count packet followed by one summary per character. Delayed deletes
/// whose grace period ran out are finalised first.
pub async fn send_char_list(srv: &GameServer, s: &Session) -> HandlerResult {
    let Some(account) = s.account() else {
        return Ok(());
    };
    let storage = &srv.ctx.storage;
    let chars = match with_deadline(DB_DEADLINE, storage.load_characters(&account)).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[account] [list_failed] account={} err={}", account, e);
            return Ok(());
        }
    };
    let now = chrono::Utc::now().timestamp();
    let mut live = Vec::with_capacity(chars.len());
    for c in chars {
        if c.delete_at.is_some_and(|at| at <= now) {
            match with_deadline(DB_DEADLINE, storage.delete_character(c.id)).await {
                Ok(()) => tracing::info!("[account] [delete_finalised] account={} name={}", account, c.name),
                Err(e) => tracing::error!("[account] [delete_failed] name={} err={}", c.name, e),
            }
            continue;
        }
        live.push(c);
    }
    s.send(build_num_character(live.len().min(255) as u8, srv.ctx.config.char_slots));
    for c in &live {
        s.send(build_character_info(c));
    }
    Ok(())
}

/// Check a creation request. Returns the class or the refusal code.
pub fn validate_new_char(name: &str, class: i32, sex: i32, stats: &[i32; 6]) -> Result<ClassType, u8> {
    let encoded = encode_big5(name);
    if encoded.is_empty() || encoded.len() > MAX_NAME_BYTES {
        return Err(CREATE_INVALID);
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CREATE_INVALID);
    }
    let Some(class) = ClassType::from_i32(class) else {
        return Err(CREATE_INVALID);
    };
    if sex != 0 && sex != 1 {
        return Err(CREATE_INVALID);
    }
    let bonus = class.bonus_points();
    for (v, base) in stats.iter().zip(class.base_stats()) {
        if *v < base || *v > base + bonus {
            return Err(CREATE_INVALID);
        }
    }
    if stats.iter().sum::<i32>() != CREATE_STAT_TOTAL {
        return Err(CREATE_INVALID);
    }
    Ok(class)
}

/// A fresh level-1 character at the starting village.
pub fn new_character(account: &str, name: &str, class: ClassType, sex: i32, stats: &[i32; 6], birthday: i32) -> CharacterRow {
    let (hp, mp) = class.starting_pools();
    let [str_, dex, con, wis, cha, intel] = *stats;
    CharacterRow {
        account: account.to_string(),
        name: name.to_string(),
        class_type: class as i32,
        class_gfx: class.gfx(sex),
        sex,
        level: 1,
        hp,
        mp,
        base: StatDelta { str_, dex, con, wis, cha, intel, max_hp: hp, max_mp: mp, ac: START_AC, ..StatDelta::default() },
        x: START_X,
        y: START_Y,
        map: START_MAP,
        food: START_FOOD,
        birthday,
        ..CharacterRow::default()
    }
}

fn today_yyyymmdd() -> i32 {
    let now = chrono::Local::now();
    now.year() * 10_000 + now.month() as i32 * 100 + now.day() as i32
}

pub async fn create_char(srv: &GameServer, s: &Session, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    let class = r.c()? as i32;
    let sex = r.c()? as i32;
    let mut stats = [0i32; 6];
    for v in stats.iter_mut() {
        *v = r.c()? as i32;
    }
    let Some(account) = s.account() else {
        return Ok(());
    };

    let class = match validate_new_char(&name, class, sex, &stats) {
        Ok(c) => c,
        Err(code) => {
            tracing::debug!("[account] [create_invalid] account={} name={} class={}", account, name, class);
            s.send(build_create_char_check(code));
            return Ok(());
        }
    };

    let storage = &srv.ctx.storage;
    match with_deadline(DB_DEADLINE, storage.char_name_exists(&name)).await {
        Ok(false) => {}
        Ok(true) => {
            s.send(build_create_char_check(CREATE_NAME_EXISTS));
            return Ok(());
        }
        Err(e) => {
            tracing::error!("[account] [name_check_failed] name={} err={}", name, e);
            s.send(build_create_char_check(CREATE_INVALID));
            return Ok(());
        }
    }
    match with_deadline(DB_DEADLINE, storage.load_characters(&account)).await {
        Ok(chars) if chars.len() >= srv.ctx.config.char_slots as usize => {
            s.send(build_create_char_check(CREATE_NO_SLOT));
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!("[account] [list_failed] account={} err={}", account, e);
            s.send(build_create_char_check(CREATE_NO_SLOT));
            return Ok(());
        }
    }

    let mut row = new_character(&account, &name, class, sex, &stats, today_yyyymmdd());
    match with_deadline(DB_DEADLINE, storage.create_character(&row)).await {
        Ok(id) => row.id = id,
        Err(e) => {
            tracing::error!("[account] [create_failed] name={} err={}", name, e);
            s.send(build_create_char_check(CREATE_NAME_EXISTS));
            return Ok(());
        }
    }
    tracing::info!("[account] [char_created] account={} name={} class={:?} char_id={}", account, name, class, row.id);
    s.send(build_create_char_check(CREATE_OK));
    s.send(build_new_char_info(&row));
    Ok(())
}

pub async fn delete_char(srv: &GameServer, s: &Session, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    let Some(account) = s.account() else {
        return Ok(());
    };
    let storage = &srv.ctx.storage;
    let row = match with_deadline(DB_DEADLINE, storage.load_character(&name)).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            tracing::warn!("[account] [delete_unknown] account={} name={}", account, name);
            return Ok(());
        }
        Err(e) => {
            tracing::error!("[account] [delete_load_failed] name={} err={}", name, e);
            return Ok(());
        }
    };
    if row.account != account {
        tracing::warn!("[account] [delete_not_owner] account={} name={}", account, name);
        return Ok(());
    }

    let cfg = &srv.ctx.config;
    if cfg.delete_7_days && row.level >= cfg.delete_min_level {
        let at = chrono::Utc::now().timestamp() + DELETE_GRACE_SECS;
        if let Err(e) = with_deadline(DB_DEADLINE, storage.mark_delete(row.id, at)).await {
            tracing::error!("[account] [mark_delete_failed] name={} err={}", name, e);
            return Ok(());
        }
        s.send(build_delete_char_check(DELETE_DELAYED));
        tracing::info!("[account] [char_delete_delayed] account={} name={} level={}", account, name, row.level);
    } else {
        if let Err(e) = with_deadline(DB_DEADLINE, storage.delete_character(row.id)).await {
            tracing::error!("[account] [delete_failed] name={} err={}", name, e);
            return Ok(());
        }
        s.send(build_delete_char_check(DELETE_NOW));
        tracing::info!("[account] [char_deleted] account={} name={}", account, name);
    }
    Ok(())
}
