use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use sidequest_progress::LevelUpEvent;

/// Broadcast channel capacity. Old notifications are dropped when
/// subscribers lag.
const BROADCAST_CAP: usize = 64;

/// User-facing level-up message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpNotification {
    /// Stable per level (`levelUp-7`), so a re-delivered notification
    /// replaces rather than duplicates the previous one.
    pub id: String,
    pub level: u32,
    pub title: String,
    pub body: String,
}

impl LevelUpNotification {
    pub fn for_event(event: &LevelUpEvent, player: Option<&str>) -> Self {
        let level = event.new_level;
        let body = match player {
            Some(name) => format!("{name}, you've leveled up to level {level}!"),
            None => format!("You've leveled up to level {level}!"),
        };
        Self {
            id: format!("levelUp-{level}"),
            level,
            title: "Congratulations!".to_string(),
            body,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: LevelUpNotification) -> Result<()>;
}

/// Writes notifications to the log.  Useful headless.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, notification: LevelUpNotification) -> Result<()> {
        info!(
            id = %notification.id,
            level = notification.level,
            body = %notification.body,
            "level-up notification"
        );
        Ok(())
    }
}

/// Fans notifications out to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LevelUpNotification>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self { tx }
    }
}

impl BroadcastSink {
    pub fn subscribe(&self) -> broadcast::Receiver<LevelUpNotification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn deliver(&self, notification: LevelUpNotification) -> Result<()> {
        // No subscribers is not a failure; the notification just has no audience.
        let _ = self.tx.send(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_text() {
        let n = LevelUpNotification::for_event(&LevelUpEvent { new_level: 7 }, None);
        assert_eq!(n.id, "levelUp-7");
        assert_eq!(n.title, "Congratulations!");
        assert_eq!(n.body, "You've leveled up to level 7!");

        let named = LevelUpNotification::for_event(&LevelUpEvent { new_level: 3 }, Some("Ada"));
        assert_eq!(named.body, "Ada, you've leveled up to level 3!");
    }

    #[tokio::test]
    async fn broadcast_sink_reaches_subscribers() {
        let sink = BroadcastSink::default();
        let mut rx = sink.subscribe();
        sink.deliver(LevelUpNotification::for_event(&LevelUpEvent { new_level: 2 }, None))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().level, 2);
    }

    #[tokio::test]
    async fn broadcast_sink_without_subscribers_is_ok() {
        let sink = BroadcastSink::default();
        assert!(
            sink.deliver(LevelUpNotification::for_event(&LevelUpEvent { new_level: 2 }, None))
                .await
                .is_ok()
        );
    }
}
