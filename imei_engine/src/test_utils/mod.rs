//! Helpers for tests: scripted stand-ins for the lookup provider and the job queue, and throwaway SQLite databases.
mod fake_provider;
mod fake_queue;
#[cfg(feature = "sqlite")]
pub mod prepare_env;

pub use fake_provider::FakeProvider;
pub use fake_queue::UnavailableQueue;
