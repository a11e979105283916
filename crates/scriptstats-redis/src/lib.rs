pub mod connection;
pub mod counter;
pub mod stream;

pub use connection::RedisConfig;
pub use counter::RedisCounterStore;
pub use stream::RedisStreamChannel;
