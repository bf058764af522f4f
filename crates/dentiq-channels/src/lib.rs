//! # Dentiq Channels
//!
//! Outbound transport adapters. Each adapter performs one network send per
//! job and classifies the result as delivered, transient (retryable), or
//! permanent (not retryable); retry policy itself lives in the queue engine.

pub mod email;
pub mod mock;
pub mod rate;
pub mod whatsapp;

pub use email::EmailAdapter;
pub use mock::MockAdapter;
pub use rate::SendGate;
pub use whatsapp::WhatsAppAdapter;
