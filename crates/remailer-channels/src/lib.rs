//! # Remailer Channels
//! Delivery channel implementations behind the `ChannelSender` seam.

pub mod email;
pub mod telegram;

use std::sync::Arc;

use remailer_core::config::RemailerConfig;
use remailer_core::traits::ChannelSender;

pub use email::EmailSender;
pub use telegram::TelegramSender;

/// Build the sender set from config, in dispatch order (email before
/// telegram). Both senders are always present: an unconfigured channel
/// reports `skipped` at send time rather than being absent.
pub fn senders_from_config(config: &RemailerConfig) -> Vec<Arc<dyn ChannelSender>> {
    vec![
        Arc::new(EmailSender::new(config.email.clone())) as Arc<dyn ChannelSender>,
        Arc::new(TelegramSender::new(config.telegram.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use remailer_core::types::ChannelTag;

    #[test]
    fn test_senders_from_default_config() {
        let senders = senders_from_config(&RemailerConfig::default());
        let tags: Vec<_> = senders.iter().map(|s| s.channel()).collect();
        assert_eq!(tags, vec![ChannelTag::Email, ChannelTag::Telegram]);
    }
}
