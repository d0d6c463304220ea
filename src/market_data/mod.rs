//! Market data
//!
//! - `depth`: snapshot assembly and positional ladders for one instrument
//! - `gateway`: subscribe requests and W/X dispatch

pub mod depth;
pub mod gateway;

pub use depth::{DepthSubscription, SubscriptionState};
pub use gateway::{
    BusinessReject, GatewayError, MarketDataGateway, MarketDataRequest, SubscribeOutcome,
};
