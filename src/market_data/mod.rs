pub mod aggregator;
pub mod history_cache;
pub mod publisher;
pub mod tick_buffer;

pub use aggregator::CandleAggregator;
pub use history_cache::HistoryCache;
pub use publisher::TickPublisher;
pub use tick_buffer::TickRingBuffer;
