//! # Domain Models
//!
//! Value types shared by every tier of the retrieval engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Ticker`] | Normalized (uppercase) symbol |
//! | [`Money`] | Fixed-point amount plus ISO currency |
//! | [`PricePoint`] | Immutable price observation tagged with its tier |
//! | [`Interval`] | Observation granularity |
//! | [`PriceSource`] | Tier a point was resolved from |
//! | [`UtcDateTime`] | UTC instant |
//!
//! Construction validates invariants; a value that exists is a valid value.

mod interval;
mod money;
mod price_point;
mod ticker;
mod timestamp;

pub use interval::Interval;
pub use money::{Currency, Money};
pub use price_point::{Ohlcv, PricePoint, PriceSource};
pub use ticker::Ticker;
pub use timestamp::UtcDateTime;
