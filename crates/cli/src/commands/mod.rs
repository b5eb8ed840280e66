pub mod backfill;
pub mod chat;
pub mod doctor;
pub mod models;
pub mod onboard;
pub mod runtime;
pub mod serve;
pub mod stats;
pub mod status;
