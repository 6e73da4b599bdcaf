//! Value types shared between the IMEI verification engine, the lookup provider client and the worker binary.
mod credits;
mod helpers;
mod secret;

pub mod op;

pub use credits::{Credits, CreditsConversionError, CREDITS_SYMBOL};
pub use helpers::parse_list;
pub use secret::Secret;
