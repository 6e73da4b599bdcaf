//! # IMEI verification worker
//! The worker is the long-running half of the verification service. It:
//! * runs a pool of job workers that take queued verification jobs and hand them to the order processor,
//! * periodically returns jobs abandoned by crashed workers to the queue,
//! * publishes completion and failure events to the registered hooks.
//!
//! Orders are submitted and payments are confirmed by the front-end services through `imei_engine`. The worker and
//! those services share nothing but the database.
//!
//! ## Configuration
//! The worker is configured via environment variables. See [config](config/index.html) for more information.
pub mod cli;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod sweeper;
pub mod worker;
