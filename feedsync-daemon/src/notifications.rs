//! Desktop Notifications Integration
//!
//! Shows new-message and error notifications through the freedesktop.org
//! `org.freedesktop.Notifications` DBus interface, and reports taps on them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use feedsync_core::{FeedError, Notification, NotificationSink, TapAction};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use zbus::Connection;

const NOTIFICATIONS_SERVICE: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";

/// Delivered notifications remembered for tap lookups
const MAX_TRACKED: usize = 256;

/// Desktop notification client
///
/// Sends notifications to the session's notification server and remembers
/// which server id belongs to which feed notification id.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    connection: Connection,
    app_name: String,
    timeout_ms: i32,
    delivered: Arc<Mutex<DeliveredIds>>,
}

/// Server-assigned id -> feed notification id, oldest evicted past a cap
#[derive(Debug, Default)]
pub struct DeliveredIds {
    ids: HashMap<u32, i32>,
    order: VecDeque<u32>,
}

impl DeliveredIds {
    pub fn record(&mut self, server_id: u32, feed_id: i32) {
        if self.ids.insert(server_id, feed_id).is_none() {
            self.order.push_back(server_id);
        }
        while self.order.len() > MAX_TRACKED {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub fn get(&self, server_id: u32) -> Option<i32> {
        self.ids.get(&server_id).copied()
    }

    /// Drop a notification the server closed
    pub fn forget(&mut self, server_id: u32) {
        if self.ids.remove(&server_id).is_some() {
            self.order.retain(|id| *id != server_id);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Notification urgency level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Low priority notification
    Low = 0,
    /// Normal priority notification (default)
    Normal = 1,
    /// Critical notification that requires attention
    Critical = 2,
}

/// Notification builder
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    app_name: String,
    summary: String,
    body: String,
    icon: String,
    urgency: Urgency,
    timeout: i32,
    category: &'static str,
    actions: Vec<(String, String)>,
    hints: HashMap<String, zbus::zvariant::Value<'static>>,
}

impl NotificationBuilder {
    /// Create a new notification builder
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            app_name: "Feedsync".to_string(),
            summary: summary.into(),
            body: String::new(),
            icon: "mail-message-new-symbolic".to_string(),
            urgency: Urgency::Normal,
            timeout: 5000,
            category: "im.received",
            actions: Vec::new(),
            hints: HashMap::new(),
        }
    }

    /// Set the application name reported to the server
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set notification body text
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set notification icon
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Set notification urgency
    pub fn urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    /// Set notification timeout in milliseconds
    pub fn timeout(mut self, timeout_ms: i32) -> Self {
        self.timeout = timeout_ms;
        self
    }

    /// Set the freedesktop category hint
    pub fn category(mut self, category: &'static str) -> Self {
        self.category = category;
        self
    }

    /// Add an action button to the notification
    pub fn action(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.actions.push((id.into(), label.into()));
        self
    }

    /// Build the DBus call parameters
    fn build(mut self) -> NotificationParams {
        self.hints.insert(
            "urgency".to_string(),
            zbus::zvariant::Value::U8(self.urgency as u8),
        );
        self.hints.insert(
            "category".to_string(),
            zbus::zvariant::Value::Str(self.category.into()),
        );

        // Flatten actions into a single Vec<String>
        let actions_flat: Vec<String> = self
            .actions
            .into_iter()
            .flat_map(|(id, label)| vec![id, label])
            .collect();

        NotificationParams {
            app_name: self.app_name,
            replaces_id: 0,
            icon: self.icon,
            summary: self.summary,
            body: self.body,
            actions: actions_flat,
            hints: self.hints,
            timeout: self.timeout,
        }
    }
}

/// Notification parameters for DBus call
#[derive(Debug)]
struct NotificationParams {
    app_name: String,
    replaces_id: u32,
    icon: String,
    summary: String,
    body: String,
    actions: Vec<String>,
    hints: HashMap<String, zbus::zvariant::Value<'static>>,
    timeout: i32,
}

/// Builder for a new-message notification
fn message_notification(notification: &Notification) -> NotificationBuilder {
    let label = match notification.tap_action {
        TapAction::OpenFeed => "Open chat",
    };
    NotificationBuilder::new(notification.title.clone())
        .body(notification.body.clone())
        .action("default", label)
        .action(notification.tap_action.key(), label)
}

impl DesktopNotifier {
    /// Connect to the session DBus
    pub async fn new(app_name: impl Into<String>, timeout_ms: i32) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to session DBus")?;

        debug!("Connected to desktop notifications service");

        Ok(Self {
            connection,
            app_name: app_name.into(),
            timeout_ms,
            delivered: Arc::new(Mutex::new(DeliveredIds::default())),
        })
    }

    async fn proxy(&self) -> Result<zbus::Proxy<'static>> {
        zbus::Proxy::new(
            &self.connection,
            NOTIFICATIONS_SERVICE,
            NOTIFICATIONS_PATH,
            NOTIFICATIONS_SERVICE,
        )
        .await
        .context("Failed to create notifications proxy")
    }

    /// Send a notification
    pub async fn send(&self, builder: NotificationBuilder) -> Result<u32> {
        let params = builder.app_name(self.app_name.clone()).build();
        let proxy = self.proxy().await?;

        let server_id: u32 = proxy
            .call_method(
                "Notify",
                &(
                    &params.app_name,
                    params.replaces_id,
                    &params.icon,
                    &params.summary,
                    &params.body,
                    &params.actions,
                    &params.hints,
                    params.timeout,
                ),
            )
            .await
            .context("Failed to send notification")?
            .body()
            .deserialize()
            .context("Failed to parse notification ID")?;

        debug!("Sent notification '{}' with ID {}", params.summary, server_id);

        Ok(server_id)
    }

    /// Send an error notification with an optional recovery action
    pub async fn notify_error_with_recovery(
        &self,
        title: &str,
        message: &str,
        recovery_action: Option<(&str, &str)>,
    ) -> Result<u32> {
        let mut builder = NotificationBuilder::new(title)
            .body(message)
            .icon("dialog-error-symbolic")
            .category("im.error")
            .urgency(Urgency::Normal)
            .timeout(7000);

        if let Some((action_id, action_label)) = recovery_action {
            builder = builder.action(action_id, action_label);
        }

        self.send(builder).await
    }

    /// Feed notification id for a server id, if this notifier sent it
    pub fn feed_id(&self, server_id: u32) -> Option<i32> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(server_id)
    }

    /// Subscribe to notification action signals
    ///
    /// Returns a stream of (server_id, action_key) tuples when users click
    /// notification actions. `NotificationClosed` signals seen on the way
    /// drop the closed ids from the delivered map.
    pub async fn subscribe_actions(
        &self,
    ) -> Result<impl futures::Stream<Item = (u32, String)> + Unpin> {
        use futures::stream::StreamExt;

        let mut stream = zbus::MessageStream::for_match_rule(
            zbus::MatchRule::builder()
                .msg_type(zbus::message::Type::Signal)
                .sender(NOTIFICATIONS_SERVICE)?
                .interface(NOTIFICATIONS_SERVICE)?
                .build(),
            &self.connection,
            Some(64),
        )
        .await
        .context("Failed to create message stream")?;

        let delivered = Arc::clone(&self.delivered);
        let action_stream = async_stream::stream! {
            while let Some(msg_result) = stream.next().await {
                let Ok(msg) = msg_result else { continue };
                let header = msg.header();
                let Some(member) = header.member() else { continue };
                match member.as_str() {
                    "ActionInvoked" => {
                        if let Ok((server_id, action_key)) = msg.body().deserialize::<(u32, String)>() {
                            debug!("Notification action invoked: id={}, action={}", server_id, action_key);
                            yield (server_id, action_key);
                        }
                    }
                    "NotificationClosed" => {
                        if let Ok((server_id, reason)) = msg.body().deserialize::<(u32, u32)>() {
                            debug!("Notification {} closed (reason {})", server_id, reason);
                            delivered
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner())
                                .forget(server_id);
                        }
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(action_stream))
    }
}

#[async_trait]
impl NotificationSink for DesktopNotifier {
    async fn show(&self, notification: Notification) -> feedsync_core::Result<()> {
        let builder = message_notification(&notification).timeout(self.timeout_ms);

        let server_id = self.send(builder).await.map_err(|e| {
            let message = format!("{:#}", e);
            if message.contains("AccessDenied") {
                FeedError::PermissionDenied(message)
            } else {
                FeedError::NotificationDispatch(message)
            }
        })?;

        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(server_id, notification.id);
        Ok(())
    }
}

/// Sink used when desktop notifications are off or unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySink;

#[async_trait]
impl NotificationSink for LogOnlySink {
    async fn show(&self, notification: Notification) -> feedsync_core::Result<()> {
        info!(
            "[notification {}] {}: {}",
            notification.id, notification.title, notification.body
        );
        Ok(())
    }
}

/// Whether an invoked action should open the feed
pub fn is_open_feed_action(action_key: &str) -> bool {
    action_key == TapAction::OpenFeed.key() || action_key == "default"
}
