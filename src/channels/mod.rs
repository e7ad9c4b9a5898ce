//! Channel adapters. §4.E.

pub mod external_msg;
pub mod realtime;
pub mod web_push;

pub use external_msg::ExternalMessageSender;
pub use realtime::RealtimeBus;
pub use web_push::WebPushSender;
