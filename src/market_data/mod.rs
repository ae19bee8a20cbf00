pub mod adapters;
pub mod candle_buffer;
pub mod currency;
pub mod fanin;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleKey};
pub use currency::CurrencyCache;
pub use fanin::{MarketDataAdapter, MarketDataFanIn};
