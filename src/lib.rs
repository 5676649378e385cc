//! Slack-triggered agent dispatcher.
//!
//! An `app_mention` in a thread becomes one work request. The scheduler
//! admits requests under a global concurrency limit with a bounded FIFO
//! overflow queue and at most one in-flight job per thread; the dispatcher
//! runs the agent lifecycle around each admitted slot.

pub mod agent;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod prompt;
pub mod scheduler;
pub mod slack;
