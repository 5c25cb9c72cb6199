pub mod auth;
pub mod engine;
pub mod hotel;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod tls;
pub mod wal;
pub mod wire;
