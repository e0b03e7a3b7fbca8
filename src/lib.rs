//! Mizuhiki turns a short conversational intake after a bereavement into a
//! durable, personalized checklist of Japanese administrative procedures.
//!
//! The service sits behind a messaging-channel webhook. A state-machine
//! dialogue collects consent and four profile facts, then a three-stage
//! queue-driven pipeline generates the checklist: `basic` from the intake,
//! `personalized` from follow-up answers, `enhanced` as best-effort
//! enrichment. Once the checklist exists, free text becomes
//! retrieval-augmented AI chat and short commands manage the tasks.

pub mod capabilities;
pub mod channels;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod followup;
pub mod guard;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod quota;
pub mod server;
pub mod util;

pub use config::Config;
pub use db::Store;
pub use error::{Error, Result};
