pub mod clock;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sweeper;
pub mod timefmt;
pub mod wal;
