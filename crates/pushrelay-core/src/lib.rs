#![forbid(unsafe_code)]

pub mod app;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod notify;
pub mod providers;
pub mod storage;

pub use api::Error;

pub(crate) mod api;
