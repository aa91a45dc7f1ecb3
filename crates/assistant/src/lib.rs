//! Conversational assistant core.
//!
//! One worker per bot: a reconnecting gateway connection feeding a bounded
//! ingress queue, four message workers serialized per user, the layered
//! memory (facts, summaries, mood, metadata), the prompting and tool-call
//! loop, periodic distillation jobs, and the proactive scheduler.

pub mod chat;
pub mod cognitive;
pub mod config;
pub mod constants;
pub mod controls;
pub mod memory;
pub mod proactive_runner;
pub mod prompt;
pub mod reply;
pub mod runner;
pub mod session;
pub mod store;
pub mod tools;

pub use config::{config_template, AssistantConfig};
pub use runner::{AssistantRunner, AssistantRunnerFactory};
