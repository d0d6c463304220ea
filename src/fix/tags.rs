//! FIX tag numbers and message type codes used by the bridge
//!
//! Only the subset the exchange feed actually carries is listed here.

pub const BEGIN_STRING: u32 = 8;
pub const BODY_LENGTH: u32 = 9;
pub const CHECK_SUM: u32 = 10;
pub const CURRENCY: u32 = 15;
pub const MSG_SEQ_NUM: u32 = 34;
pub const MSG_TYPE: u32 = 35;
pub const SECURITY_ID: u32 = 48;
pub const SENDER_COMP_ID: u32 = 49;
pub const SENDER_SUB_ID: u32 = 50;
pub const SENDING_TIME: u32 = 52;
pub const SYMBOL: u32 = 55;
pub const TARGET_COMP_ID: u32 = 56;
pub const TEXT: u32 = 58;
pub const SECURE_DATA_LEN: u32 = 90;
pub const SECURE_DATA: u32 = 91;
pub const SIGNATURE_LENGTH: u32 = 93;
pub const SIGNATURE: u32 = 89;
pub const RAW_DATA_LENGTH: u32 = 95;
pub const RAW_DATA: u32 = 96;
pub const ENCRYPT_METHOD: u32 = 98;
pub const SECURITY_DESC: u32 = 107;
pub const HEART_BT_INT: u32 = 108;
pub const TEST_REQ_ID: u32 = 112;
pub const SECURITY_TYPE: u32 = 167;
pub const MATURITY_MONTH_YEAR: u32 = 200;
pub const PUT_OR_CALL: u32 = 201;
pub const STRIKE_PRICE: u32 = 202;
pub const MATURITY_DAY: u32 = 205;
pub const SECURITY_EXCHANGE: u32 = 207;
pub const MD_REQ_ID: u32 = 262;
pub const SUBSCRIPTION_REQUEST_TYPE: u32 = 263;
pub const MARKET_DEPTH: u32 = 264;
pub const MD_UPDATE_TYPE: u32 = 265;
pub const NO_MD_ENTRY_TYPES: u32 = 267;
pub const NO_MD_ENTRIES: u32 = 268;
pub const MD_ENTRY_TYPE: u32 = 269;
pub const MD_ENTRY_PX: u32 = 270;
pub const MD_ENTRY_SIZE: u32 = 271;
/// The exchange carries the aggressor side of a trade in this tag
pub const TICK_DIRECTION: u32 = 274;
pub const MD_UPDATE_ACTION: u32 = 279;
pub const MD_REQ_REJ_REASON: u32 = 281;
pub const SECURITY_REQ_ID: u32 = 320;
pub const SECURITY_REQUEST_TYPE: u32 = 321;
pub const SECURITY_RESPONSE_TYPE: u32 = 323;
pub const SECURITY_TRADING_STATUS: u32 = 326;
pub const REF_MSG_TYPE: u32 = 372;
pub const NO_MSG_TYPES: u32 = 384;
pub const TOTAL_VOLUME_TRADED: u32 = 387;
pub const NO_SECURITY_ALT_ID: u32 = 454;
pub const SECURITY_ALT_ID: u32 = 455;
pub const SECURITY_ALT_ID_SOURCE: u32 = 456;
pub const USERNAME: u32 = 553;
pub const PASSWORD: u32 = 554;
pub const NO_LEGS: u32 = 555;
pub const LEG_CURRENCY: u32 = 556;
pub const MIN_TRADE_VOL: u32 = 562;
pub const LEG_SYMBOL: u32 = 600;
pub const LEG_SECURITY_ID: u32 = 602;
pub const LEG_SECURITY_TYPE: u32 = 609;
pub const LEG_MATURITY_MONTH_YEAR: u32 = 610;
pub const LEG_STRIKE_PRICE: u32 = 612;
pub const LEG_SECURITY_EXCHANGE: u32 = 616;
pub const LEG_SECURITY_DESC: u32 = 620;
pub const LEG_RATIO_QTY: u32 = 623;
pub const LEG_SIDE: u32 = 624;
pub const SECURITY_SUB_TYPE: u32 = 762;
pub const TOT_NUM_REPORTS: u32 = 911;
pub const SECURITY_STATUS: u32 = 965;
pub const MD_ENTRY_LEVEL: u32 = 1023;
pub const MIN_PRICE_INCREMENT_AMOUNT: u32 = 1146;
pub const LEG_PUT_OR_CALL: u32 = 1358;
pub const PRICE_RATIO: u32 = 5770;

/// Length-prefixed data fields: (length tag, data tag)
///
/// The data field may legally contain SOH, so the parser must read it by length.
pub const RAW_DATA_PAIRS: [(u32, u32); 3] = [
    (SECURE_DATA_LEN, SECURE_DATA),
    (RAW_DATA_LENGTH, RAW_DATA),
    (SIGNATURE_LENGTH, SIGNATURE),
];

/// MsgType(35) values
pub mod msg_type {
    pub const HEARTBEAT: &str = "0";
    pub const TEST_REQUEST: &str = "1";
    pub const REJECT: &str = "3";
    pub const LOGOUT: &str = "5";
    pub const LOGON: &str = "A";
    pub const SECURITY_DEFINITION_REQUEST: &str = "c";
    pub const SECURITY_DEFINITION: &str = "d";
    pub const MARKET_DATA_REQUEST: &str = "V";
    pub const MARKET_DATA_SNAPSHOT: &str = "W";
    pub const MARKET_DATA_INCREMENTAL: &str = "X";
    pub const MARKET_DATA_REQUEST_REJECT: &str = "Y";
}

/// SubscriptionRequestType(263) values as sent to the exchange
pub mod subscription_request_type {
    pub const SNAPSHOT: &str = "0";
    pub const SNAPSHOT_AND_UPDATES: &str = "1";
    pub const UNSUBSCRIBE: &str = "2";
    /// Exchange-specific: persistent snapshot followed by updates
    pub const EXCHANGE_SNAPSHOT_AND_UPDATES: &str = "7";
}

/// MDUpdateAction(279) values
pub mod update_action {
    pub const NEW: &str = "0";
    pub const CHANGE: &str = "1";
    pub const DELETE: &str = "2";
}

/// SecurityResponseType(323) meaning the proposal was rejected
pub const RESPONSE_REJECT_PROPOSAL: &str = "5";
