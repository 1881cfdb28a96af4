//! Opcode numbers for the 3.80C Taiwan client.
//!
//! Client opcodes are prefixed `C_`, server opcodes `S_`.

// ============================================
// Client -> Server
// ============================================

pub const C_ATTR: u8 = 121;
pub const C_ASK_XCHG: u8 = 2;
pub const C_ADD_XCHG: u8 = 37;
pub const C_ACCEPT_XCHG: u8 = 71;
pub const C_CANCEL_XCHG: u8 = 86;
pub const C_ACTION: u8 = 120;
pub const C_ALIVE: u8 = 95;
/// Emblem download request.
pub const C_EMBLEM_DOWNLOAD: u8 = 72;
pub const C_ATTACK: u8 = 229;
pub const C_BAN_MEMBER: u8 = 69;
pub const C_BANISH_PARTY: u8 = 255;
pub const C_BEANFUN_LOGIN: u8 = 210;
pub const C_BOARD: u8 = 10;
pub const C_BOOKMARK: u8 = 165;
pub const C_BUY_SELL: u8 = 161;
pub const C_CHANGE_CHAR: u8 = 7;
pub const C_CHANGE_DIRECTION: u8 = 225;
pub const C_CHAR_RESET: u8 = 98;
pub const C_CHAT: u8 = 40;
pub const C_CHAT_PARTY_CONTROL: u8 = 199;
pub const C_CHECK_PK: u8 = 51;
pub const C_CLIENT_VERSION: u8 = 14;
pub const C_COMMON_CLICK: u8 = 16;
pub const C_CREATE_CHAR: u8 = 84;
pub const C_CREATE_PLEDGE: u8 = 222;
pub const C_DELETE_BOOKMARK: u8 = 3;
pub const C_DELETE_CHAR: u8 = 162;
pub const C_DESTROY: u8 = 138;
pub const C_DIALOG: u8 = 34;
pub const C_DROP: u8 = 25;
pub const C_ENTER_PORTAL: u8 = 219;
pub const C_ENTER_WORLD: u8 = 137;
pub const C_FAR_ATTACK: u8 = 123;
pub const C_GET: u8 = 112;
pub const C_GIVE: u8 = 45;
pub const C_HYPERTEXT_INPUT_RESULT: u8 = 11;
pub const C_PARTY: u8 = 43;
pub const C_JOIN_PLEDGE: u8 = 194;
pub const C_LEAVE_PARTY: u8 = 33;
pub const C_LEAVE_PLEDGE: u8 = 61;
pub const C_LOGIN: u8 = 119;
pub const C_MAIL: u8 = 87;
pub const C_MOVE: u8 = 29;
pub const C_NPC_ACTION: u8 = 125;
pub const C_OPEN: u8 = 41;
pub const C_PASSWORD: u8 = 13;
pub const C_PETMENU: u8 = 103;
pub const C_PLEDGE_WATCH: u8 = 78;
pub const C_QUIT: u8 = 122;
pub const C_RANK_CONTROL: u8 = 63;
pub const C_RESTART: u8 = 177;
pub const C_SAVEIO: u8 = 244;
pub const C_SAY: u8 = 136;
pub const C_TELEPORT: u8 = 52;
pub const C_TELL: u8 = 184;
pub const C_TITLE: u8 = 96;
pub const C_UPLOAD_EMBLEM: u8 = 18;
pub const C_USE_ITEM: u8 = 164;
pub const C_USE_PET_ITEM: u8 = 104;
pub const C_USE_SPELL: u8 = 6;
pub const C_CREATE_PARTY: u8 = 230;
pub const C_WHO_PLEDGE: u8 = 68;
pub const C_WINDOWS: u8 = 254;

// ============================================
// Server -> Client
// ============================================

pub const S_INIT_PACKET: u8 = 150;
pub const S_SERVER_VERSION: u8 = 139;
pub const S_LOGIN_CHECK: u8 = 51;
pub const S_NUM_CHARACTER: u8 = 178;
pub const S_CHARACTER_INFO: u8 = 93;
pub const S_NEW_CHAR_INFO: u8 = 127;
pub const S_CREATE_CHARACTER_CHECK: u8 = 106;
pub const S_DELETE_CHARACTER_CHECK: u8 = 6;
pub const S_ENTER_WORLD_CHECK: u8 = 223;

pub const S_MESSAGE_CODE: u8 = 71;
pub const S_SAY: u8 = 81;
pub const S_MESSAGE: u8 = 243;
pub const S_TELL: u8 = 67;
pub const S_YES_NO: u8 = 219;
pub const S_HYPERTEXT: u8 = 39;

pub const S_TRADE: u8 = 52;
pub const S_TRADE_ADD_ITEM: u8 = 35;
pub const S_TRADE_STATUS: u8 = 112;

pub const S_HP_METER: u8 = 237;
pub const S_HIT_POINT: u8 = 42;
pub const S_MANA_POINT: u8 = 73;
pub const S_LAWFUL: u8 = 34;
pub const S_PINK_NAME: u8 = 60;
pub const S_EVENT: u8 = 250;
pub const S_EFFECT: u8 = 55;
pub const S_ATTACK: u8 = 30;
pub const S_ACTION: u8 = 158;
pub const S_STATUS: u8 = 8;
pub const S_EXP: u8 = 113;
pub const S_MAGIC_STATUS: u8 = 37;
pub const S_ABILITY_SCORES: u8 = 174;
pub const S_SKILL_LIST: u8 = 164;
pub const S_SPEED: u8 = 255;
pub const S_PARALYSIS: u8 = 202;
pub const S_POISON: u8 = 165;
pub const S_INVIS: u8 = 171;

pub const S_PUT_OBJECT: u8 = 87;
pub const S_MOVE_OBJECT: u8 = 10;
pub const S_REMOVE_OBJECT: u8 = 120;
pub const S_CHANGE_HEADING: u8 = 122;
pub const S_WEATHER: u8 = 115;
pub const S_TIME: u8 = 123;
pub const S_WORLD: u8 = 206;

pub const S_ADD_INVENTORY_BATCH: u8 = 5;
pub const S_ADD_ITEM: u8 = 15;
pub const S_REMOVE_INVENTORY: u8 = 57;
pub const S_CHANGE_ITEM_USE: u8 = 24;
pub const S_RETRIEVE_LIST: u8 = 176;
pub const S_INPUT_AMOUNT: u8 = 136;

pub const S_CLAN_NAME: u8 = 72;
pub const S_CHAR_TITLE: u8 = 183;
pub const S_EMBLEM: u8 = 118;
pub const S_CLAN_ATTENTION: u8 = 200;
pub const S_CHANGE_NAME: u8 = 46;
pub const S_RED_MESSAGE: u8 = 105;

pub const S_BOOKMARKS: u8 = 64;
pub const S_ADD_BOOKMARK: u8 = 92;

// ============================================
// PacketBox (S_EVENT) sub-kinds
// ============================================

pub const EV_CHARACTER_CONFIG: u8 = 41;
pub const EV_LOGOUT: u8 = 42;
pub const EV_DODGE: u8 = 0x58;
pub const EV_PARTY_LIST: u8 = 0x68;
pub const EV_PARTY_NEW_MEMBER: u8 = 0x69;
pub const EV_PARTY_SET_MASTER: u8 = 0x6A;
pub const EV_PARTY_REFRESH: u8 = 0x6E;
pub const EV_UPDATE_ER: u8 = 132;
pub const EV_MAP_TIMER: u8 = 153;
pub const EV_DISPLAY_MAP_TIME: u8 = 159;
pub const EV_PLEDGE_ANNOUNCE: u8 = 167;
pub const EV_PLEDGE_MEMBERS: u8 = 170;
pub const EV_PLEDGE_ONLINE: u8 = 171;

// ============================================
// Paralysis (S_PARALYSIS) sub-kinds
// ============================================

pub const PARALYSIS_APPLY: u8 = 2;
pub const PARALYSIS_REMOVE: u8 = 3;
pub const TELEPORT_UNLOCK: u8 = 7;

// ============================================
// Yes-no prompt kinds
// ============================================

pub const YN_TRADE: u16 = 252;
pub const YN_PARTY: u16 = 953;
pub const YN_CHAT_PARTY: u16 = 954;
pub const YN_CLAN_JOIN: u16 = 97;

/// The first `H` of an attr reply the client sends for prompts it generated itself.
pub const ATTR_IGNORED: u16 = 479;

// ============================================
// S_ACTION codes
// ============================================

pub const ACT_ATTACK: u8 = 1;
pub const ACT_DAMAGE: u8 = 2;
pub const ACT_DIE: u8 = 8;
pub const ACT_PICKUP: u8 = 15;
pub const ACT_SKILL_ATTACK: u8 = 18;
pub const ACT_SKILL_BUFF: u8 = 19;
