//! Customer notifications: template rendering, the log-always dispatcher
//! and the WhatsApp provider.

pub mod dispatch;
pub mod template;
pub mod twilio;

pub use dispatch::{DispatchOutcome, NotificationDispatcher, NotificationProvider};
