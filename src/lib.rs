pub mod config;
pub mod mail;
pub mod pipeline;

pub use pipeline::{ThreadRequest, fetch_email_threads};
