pub mod app_config;
pub mod database;
pub mod events;
pub mod memory_store;
pub mod pg_store;
pub mod redis_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use memory_store::{InMemoryCheckoutStore, InMemoryPendingSaleStore};
pub use pg_store::PgCheckoutStore;
pub use redis_repo::RedisClient;
