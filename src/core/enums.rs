//! Exchange code tables
//!
//! Bidirectional mappings between the exchange's FIX codes and the
//! normalized codes published downstream:
//! - MDEntryType (tick types), including the bid/offer implied ladders
//! - SecurityTradingStatus
//! - Aggressor side (carried by the exchange in TickDirection)
//! - SecuritySubType (strategy names)
//! - PutOrCall

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange code for the high price limit entry
pub const HIGH_LIMIT_CODE: &str = "K";
/// Exchange code for the low price limit entry
pub const LOW_LIMIT_CODE: &str = "L";

/// Normalized market-data entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryType {
    Bid,
    Offer,
    Trade,
    OpeningPrice,
    SettlementPrice,
    SessionHighPrice,
    SessionLowPrice,
    BidImplied,
    OfferImplied,
    TradeVolume,
}

impl EntryType {
    /// Every normalized entry type
    pub const ALL: [EntryType; 10] = [
        EntryType::Bid,
        EntryType::Offer,
        EntryType::Trade,
        EntryType::OpeningPrice,
        EntryType::SettlementPrice,
        EntryType::SessionHighPrice,
        EntryType::SessionLowPrice,
        EntryType::BidImplied,
        EntryType::OfferImplied,
        EntryType::TradeVolume,
    ];

    /// Entry types that maintain a positional price ladder
    pub const LADDERS: [EntryType; 4] = [
        EntryType::Bid,
        EntryType::BidImplied,
        EntryType::Offer,
        EntryType::OfferImplied,
    ];

    /// Normalized FIX MDEntryType code
    pub const fn code(self) -> &'static str {
        match self {
            EntryType::Bid => "0",
            EntryType::Offer => "1",
            EntryType::Trade => "2",
            EntryType::OpeningPrice => "4",
            EntryType::SettlementPrice => "6",
            EntryType::SessionHighPrice => "7",
            EntryType::SessionLowPrice => "8",
            EntryType::BidImplied => "E",
            EntryType::OfferImplied => "F",
            EntryType::TradeVolume => "B",
        }
    }

    /// Parse a normalized MDEntryType code
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Map the exchange's MDEntryType code to the normalized type
    ///
    /// Price limits (`K`/`L`) are not entry types; see [`HIGH_LIMIT_CODE`].
    pub fn from_exchange_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(EntryType::Bid),
            "1" => Some(EntryType::Offer),
            "2" => Some(EntryType::BidImplied),
            "3" => Some(EntryType::OfferImplied),
            "4" => Some(EntryType::Trade),
            "6" => Some(EntryType::SettlementPrice),
            "7" => Some(EntryType::SessionHighPrice),
            "8" => Some(EntryType::SessionLowPrice),
            "9" => Some(EntryType::OpeningPrice),
            _ => None,
        }
    }

    /// Exchange code for this type, if the exchange carries it as an entry
    pub const fn exchange_code(self) -> Option<&'static str> {
        match self {
            EntryType::Bid => Some("0"),
            EntryType::Offer => Some("1"),
            EntryType::BidImplied => Some("2"),
            EntryType::OfferImplied => Some("3"),
            EntryType::Trade => Some("4"),
            EntryType::SettlementPrice => Some("6"),
            EntryType::SessionHighPrice => Some("7"),
            EntryType::SessionLowPrice => Some("8"),
            EntryType::OpeningPrice => Some("9"),
            EntryType::TradeVolume => None,
        }
    }

    #[inline]
    pub fn is_ladder(self) -> bool {
        Self::LADDERS.contains(&self)
    }

    /// Ladders on the bid side are kept in descending price order
    #[inline]
    pub fn is_descending(self) -> bool {
        matches!(self, EntryType::Bid | EntryType::BidImplied)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Normalized security trading status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingStatus {
    UnknownOrInvalid,
    PreOpen,
    ReadyToTrade,
    RestrictedOpen,
    PreClose,
    PostClose,
    TradingHalt,
}

impl TradingStatus {
    /// Map the exchange's status code
    pub fn from_exchange_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TradingStatus::UnknownOrInvalid),
            1 => Some(TradingStatus::PreOpen),
            2 => Some(TradingStatus::ReadyToTrade),
            3 => Some(TradingStatus::RestrictedOpen),
            4 => Some(TradingStatus::PreClose),
            5 => Some(TradingStatus::PostClose),
            7 => Some(TradingStatus::TradingHalt),
            _ => None,
        }
    }
}

/// Normalized aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggressorSide {
    Undisclosed,
    Buy,
    Sell,
}

impl AggressorSide {
    /// Map the exchange's TickDirection value
    pub fn from_exchange_code(code: &str) -> Option<Self> {
        match code {
            "-1" => Some(AggressorSide::Undisclosed),
            "0" => Some(AggressorSide::Buy),
            "2" => Some(AggressorSide::Sell),
            _ => None,
        }
    }
}

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PutOrCall {
    Put,
    Call,
}

impl PutOrCall {
    /// FIX PutOrCall(201) value
    pub const fn code(self) -> i64 {
        match self {
            PutOrCall::Put => 0,
            PutOrCall::Call => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PutOrCall::Put),
            1 => Some(PutOrCall::Call),
            _ => None,
        }
    }

    /// Name used in instrument identifiers and directory listings
    pub const fn name(self) -> &'static str {
        match self {
            PutOrCall::Put => "Put",
            PutOrCall::Call => "Call",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Put" => Some(PutOrCall::Put),
            "Call" => Some(PutOrCall::Call),
            _ => None,
        }
    }
}

impl fmt::Display for PutOrCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SecuritySubType(762) codes and their strategy names
///
/// Code 18 is unassigned by the exchange.
const SECURITY_SUB_TYPES: [(i64, &str); 70] = [
    (0, "Outright"),
    (1, "CalendarSpread"),
    (2, "RTCalendarSpread"),
    (3, "InterContractSpread"),
    (4, "Butterfly"),
    (5, "Condor"),
    (6, "DoubleButterfly"),
    (7, "Horizontal"),
    (8, "Bundle"),
    (9, "MonthVsPack"),
    (10, "Pack"),
    (11, "PackSpread"),
    (12, "PackButterfly"),
    (13, "BundleSpread"),
    (14, "Strip"),
    (15, "Crack"),
    (16, "TreasurySpread"),
    (17, "Crush"),
    (19, "Threeway"),
    (20, "ThreewayStraddleVsCall"),
    (21, "ThreewayStraddleVsPut"),
    (22, "Box"),
    (23, "ChristmasTree"),
    (24, "ConditionalCurve"),
    (25, "Double"),
    (26, "HorizontalStraddle"),
    (27, "IronCondor"),
    (28, "Ratio1x2"),
    (29, "Ratio1x3"),
    (30, "Ratio2x3"),
    (31, "RiskReversal"),
    (32, "StraddleStrip"),
    (33, "Straddle"),
    (34, "Strangle"),
    (35, "Vertical"),
    (36, "JellyRoll"),
    (37, "IronButterfly"),
    (38, "Guts"),
    (39, "Generic"),
    (40, "Diagonal"),
    (41, "CoveredThreeway"),
    (42, "CoveredThreewayStraddleVsCall"),
    (43, "CoveredThreewayStraddleVsPut"),
    (44, "CoveredBox"),
    (45, "CoveredChristmasTree"),
    (46, "CoveredConditionalCurve"),
    (47, "CoveredDouble"),
    (48, "CoveredHorizontalStraddle"),
    (49, "CoveredIronCondor"),
    (50, "CoveredRatio1x2"),
    (51, "CoveredRatio1x3"),
    (52, "CoveredRatio2x3"),
    (53, "CoveredRiskReversal"),
    (54, "CoveredStraddleStrip"),
    (55, "CoveredStraddle"),
    (56, "CoveredStrangle"),
    (57, "CoveredVertical"),
    (58, "CoveredJellyRoll"),
    (59, "CoveredIronButterfly"),
    (60, "CoveredGuts"),
    (61, "CoveredGeneric"),
    (62, "CoveredDiagonal"),
    (63, "CoveredButterfly"),
    (64, "CoveredCondor"),
    (65, "CoveredHorizontal"),
    (66, "CoveredStrip"),
    (67, "CoveredOption"),
    (68, "BalancedStrip"),
    (69, "UnbalancedStrip"),
    (70, "InterContractStrip"),
];

/// Strategy name for a SecuritySubType code
pub fn security_sub_type_name(code: i64) -> Option<&'static str> {
    SECURITY_SUB_TYPES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// SecuritySubType code for a strategy name
pub fn security_sub_type_code(name: &str) -> Option<i64> {
    SECURITY_SUB_TYPES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_exchange_mapping_is_bijective() {
        for t in EntryType::ALL {
            if let Some(code) = t.exchange_code() {
                assert_eq!(EntryType::from_exchange_code(code), Some(t));
            }
        }
        assert_eq!(EntryType::from_exchange_code("2"), Some(EntryType::BidImplied));
        assert_eq!(EntryType::from_exchange_code("4"), Some(EntryType::Trade));
        assert_eq!(EntryType::from_exchange_code(HIGH_LIMIT_CODE), None);
        assert_eq!(EntryType::from_exchange_code("5"), None);
    }

    #[test]
    fn test_normalized_codes_round_trip() {
        for t in EntryType::ALL {
            assert_eq!(EntryType::from_code(t.code()), Some(t));
        }
    }

    #[test]
    fn test_ladder_ordering() {
        assert!(EntryType::Bid.is_descending());
        assert!(EntryType::BidImplied.is_descending());
        assert!(!EntryType::Offer.is_descending());
        assert!(EntryType::OfferImplied.is_ladder());
        assert!(!EntryType::Trade.is_ladder());
    }

    #[test]
    fn test_trading_status() {
        assert_eq!(TradingStatus::from_exchange_code(2), Some(TradingStatus::ReadyToTrade));
        assert_eq!(TradingStatus::from_exchange_code(7), Some(TradingStatus::TradingHalt));
        assert_eq!(TradingStatus::from_exchange_code(6), None);
    }

    #[test]
    fn test_aggressor_side() {
        assert_eq!(AggressorSide::from_exchange_code("0"), Some(AggressorSide::Buy));
        assert_eq!(AggressorSide::from_exchange_code("2"), Some(AggressorSide::Sell));
        assert_eq!(AggressorSide::from_exchange_code("-1"), Some(AggressorSide::Undisclosed));
        assert_eq!(AggressorSide::from_exchange_code("1"), None);
    }

    #[test]
    fn test_security_sub_types() {
        assert_eq!(security_sub_type_name(4), Some("Butterfly"));
        assert_eq!(security_sub_type_code("InterContractStrip"), Some(70));
        assert_eq!(security_sub_type_name(18), None);
    }

    #[test]
    fn test_put_or_call() {
        assert_eq!(PutOrCall::from_code(1), Some(PutOrCall::Call));
        assert_eq!(PutOrCall::from_name("Put"), Some(PutOrCall::Put));
        assert_eq!(PutOrCall::Call.code(), 1);
    }
}
