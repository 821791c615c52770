pub mod client;
pub mod domain;
pub mod models;
pub mod retry;
