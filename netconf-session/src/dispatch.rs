//! Correlation of `<rpc-reply>` messages with the callers waiting for them.
//!
//! Every request registers its message-id before it is written to the wire. The receive loop
//! hands each inbound message to the [Registry], which completes exactly one [PendingRequest]
//! per reply and forgets about it. Notifications take a separate path.
use crate::document::parse_root_tag_and_attributes;
use crate::error::{NetconfError, NetconfResult};
use core::future::{Future, IntoFuture};
use core::pin::Pin;
use core::time::Duration;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

type Completion = oneshot::Sender<NetconfResult<String>>;

/// Kind of an inbound message, decided from its root element alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Hello,
    RpcReply { message_id: Option<String> },
    Notification,
    Other(String),
}

impl Inbound {
    pub fn classify(raw: &str) -> NetconfResult<Inbound> {
        let root = parse_root_tag_and_attributes(raw)?;
        Ok(match root.name.as_str() {
            "hello" => Inbound::Hello,
            "rpc-reply" => Inbound::RpcReply {
                message_id: root.attribute("message-id").map(str::to_string),
            },
            "notification" => Inbound::Notification,
            _ => Inbound::Other(root.name),
        })
    }
}

/// An outstanding request. Resolves to the raw `<rpc-reply>` or to the error that ended the
/// session.
///
/// An `<rpc-error>` inside the reply is still a successful delivery.
#[derive(Debug)]
pub struct PendingRequest {
    message_id: String,
    reply: oneshot::Receiver<NetconfResult<String>>,
}

impl PendingRequest {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub async fn wait(self) -> NetconfResult<String> {
        match self.reply.await {
            Ok(result) => result,
            Err(_) => Err(NetconfError::closed("dispatch registry dropped")),
        }
    }

    /// Waits at most `timeout`. A reply arriving later is discarded by the registry.
    pub async fn wait_timeout(self, timeout: Duration) -> NetconfResult<String> {
        let message_id = self.message_id.clone();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Gave up waiting for reply to {}", message_id);
                Err(NetconfError::Timeout(timeout))
            }
        }
    }
}

impl IntoFuture for PendingRequest {
    type Output = NetconfResult<String>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[derive(Default)]
struct Table {
    pending: HashMap<String, Completion>,
    notifications: Option<mpsc::UnboundedSender<String>>,
    closed: bool,
}

/// Message-id to waiting caller table of one session.
///
/// The lock only guards table updates; completions are sent after it is released.
#[derive(Default)]
pub struct Registry {
    table: Mutex<Table>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, message_id: &str) -> NetconfResult<PendingRequest> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table();
        if table.closed {
            return Err(NetconfError::NotConnected);
        }
        if table.pending.contains_key(message_id) {
            return Err(NetconfError::DuplicateMessageId(message_id.to_string()));
        }
        table.pending.insert(message_id.to_string(), tx);
        trace!("Registered message-id {}", message_id);
        Ok(PendingRequest {
            message_id: message_id.to_string(),
            reply: rx,
        })
    }

    /// Forgets a registration whose request never made it onto the wire.
    pub fn cancel(&self, message_id: &str) -> bool {
        self.table().pending.remove(message_id).is_some()
    }

    /// Routes an `<rpc-reply>` to the request with the same message-id.
    ///
    /// `message_id` comes from [Inbound::classify]; the body is not parsed again. Errors are
    /// per message: the reply is dropped and every other entry is untouched.
    pub fn deliver_reply(&self, message_id: Option<&str>, raw: String) -> NetconfResult<()> {
        let Some(message_id) = message_id else {
            return Err(NetconfError::MissingMessageId("rpc-reply".to_string()));
        };
        let completion = self.table().pending.remove(message_id);
        match completion {
            Some(completion) => {
                if completion.send(Ok(raw)).is_err() {
                    debug!("Reply to {} arrived after caller stopped waiting", message_id);
                }
                Ok(())
            }
            None => Err(NetconfError::UnknownMessageId(message_id.to_string())),
        }
    }

    /// Fails every outstanding request with a transport-closed error and refuses new ones.
    ///
    /// Returns the number of requests that were failed.
    pub fn deliver_error(&self, err: &NetconfError) -> usize {
        let pending = {
            let mut table = self.table();
            table.closed = true;
            table.notifications = None;
            std::mem::take(&mut table.pending)
        };
        let reason = match err {
            NetconfError::TransportClosed { reason } => reason.clone(),
            err => err.to_string(),
        };
        let count = pending.len();
        for (message_id, completion) in pending {
            trace!("Failing request {}: {}", message_id, reason);
            let _ = completion.send(Err(NetconfError::closed(reason.clone())));
        }
        count
    }

    /// Hands a `<notification>` to the subscriber, if there is one.
    pub fn deliver_notification(&self, raw: String) -> bool {
        let mut table = self.table();
        let delivered = match &table.notifications {
            Some(subscriber) => subscriber.send(raw).is_ok(),
            None => false,
        };
        if !delivered {
            if table.notifications.take().is_some() {
                debug!("Notification subscriber went away");
            }
            warn!("Dropping notification, nobody is subscribed");
        }
        delivered
    }

    /// Replaces any earlier subscriber. The stream ends when the session closes.
    pub fn subscribe_notifications(&self) -> NetconfResult<mpsc::UnboundedReceiver<String>> {
        let mut table = self.table();
        if table.closed {
            return Err(NetconfError::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        table.notifications = Some(tx);
        Ok(rx)
    }

    pub fn len(&self) -> usize {
        self.table().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reply(message_id: &str) -> String {
        format!(
            r#"<rpc-reply message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#,
            message_id
        )
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            Inbound::classify("<hello><capabilities/></hello>").unwrap(),
            Inbound::Hello
        );
        assert_eq!(
            Inbound::classify(&reply("7")).unwrap(),
            Inbound::RpcReply {
                message_id: Some("7".to_string())
            }
        );
        assert_eq!(
            Inbound::classify(
                r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><eventTime>2024-01-01T00:00:00Z</eventTime></notification>"#
            )
            .unwrap(),
            Inbound::Notification
        );
        assert_eq!(
            Inbound::classify("<rpc message-id=\"1\"><get/></rpc>").unwrap(),
            Inbound::Other("rpc".to_string())
        );
    }

    #[tokio::test]
    async fn test_deliver_reply() {
        let registry = Registry::new();
        let pending = registry.register("1").unwrap();
        assert_eq!(pending.message_id(), "1");
        assert_eq!(registry.len(), 1);

        registry.deliver_reply(Some("1"), reply("1")).unwrap();
        assert!(registry.is_empty());
        assert_eq!(pending.wait().await.unwrap(), reply("1"));
    }

    #[tokio::test]
    async fn test_at_most_once_delivery() {
        let registry = Registry::new();
        let pending = registry.register("1").unwrap();

        registry.deliver_reply(Some("1"), reply("1")).unwrap();
        let second = registry.deliver_reply(Some("1"), reply("1"));
        assert!(matches!(second, Err(NetconfError::UnknownMessageId(id)) if id == "1"));
        assert_eq!(pending.await.unwrap(), reply("1"));
    }

    #[tokio::test]
    async fn test_unknown_message_id_leaves_others() {
        let registry = Registry::new();
        let first = registry.register("first").unwrap();
        let second = registry.register("second").unwrap();

        assert!(matches!(
            registry.deliver_reply(Some("third"), reply("third")),
            Err(NetconfError::UnknownMessageId(_))
        ));
        assert_eq!(registry.len(), 2);

        registry.deliver_reply(Some("second"), reply("second")).unwrap();
        registry.deliver_reply(Some("first"), reply("first")).unwrap();
        assert_eq!(second.await.unwrap(), reply("second"));
        assert_eq!(first.await.unwrap(), reply("first"));
    }

    #[test]
    fn test_missing_message_id() {
        let registry = Registry::new();
        let _pending = registry.register("1").unwrap();
        let raw = "<rpc-reply><ok/></rpc-reply>".to_string();
        let message_id = match Inbound::classify(&raw).unwrap() {
            Inbound::RpcReply { message_id } => message_id,
            other => panic!("unexpected kind {:?}", other),
        };
        assert!(matches!(
            registry.deliver_reply(message_id.as_deref(), raw),
            Err(NetconfError::MissingMessageId(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reply_body_is_not_parsed_again() {
        let registry = Registry::new();
        let pending = registry.register("1").unwrap();
        let raw = r#"<rpc-reply message-id="1"><data><unclosed>"#;
        registry.deliver_reply(Some("1"), raw.to_string()).unwrap();
        assert_eq!(pending.await.unwrap(), raw);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = Registry::new();
        let _pending = registry.register("1").unwrap();
        assert!(matches!(
            registry.register("1"),
            Err(NetconfError::DuplicateMessageId(_))
        ));
    }

    #[tokio::test]
    async fn test_teardown_broadcast() {
        let registry = Registry::new();
        let pending: Vec<PendingRequest> = (0..5)
            .map(|id| registry.register(&id.to_string()).unwrap())
            .collect();

        let failed = registry.deliver_error(&NetconfError::UnexpectedEof);
        assert_eq!(failed, 5);
        assert!(registry.is_empty());
        assert!(registry.is_closed());

        for pending in pending {
            match pending.wait().await {
                Err(NetconfError::TransportClosed { reason }) => {
                    assert_eq!(reason, "transport closed unexpectedly")
                }
                other => panic!("unexpected result {:?}", other),
            }
        }
        assert!(matches!(
            registry.register("late"),
            Err(NetconfError::NotConnected)
        ));
        assert_eq!(registry.deliver_error(&NetconfError::UnexpectedEof), 0);
    }

    #[tokio::test]
    async fn test_abandoned_request() {
        let registry = Registry::new();
        let pending = registry.register("slow").unwrap();
        let result = pending.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(NetconfError::Timeout(_))));

        registry.deliver_reply(Some("slow"), reply("slow")).unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_notifications() {
        let registry = Registry::new();
        assert!(!registry.deliver_notification("<notification/>".to_string()));

        let mut notifications = registry.subscribe_notifications().unwrap();
        assert!(registry.deliver_notification("<notification>1</notification>".to_string()));
        assert_eq!(
            notifications.recv().await.unwrap(),
            "<notification>1</notification>"
        );

        registry.deliver_error(&NetconfError::closed("bye"));
        assert_eq!(notifications.recv().await, None);
        assert!(registry.subscribe_notifications().is_err());
    }

    #[test]
    fn test_cancel() {
        let registry = Registry::new();
        let _pending = registry.register("1").unwrap();
        assert!(registry.cancel("1"));
        assert!(!registry.cancel("1"));
        assert!(registry.is_empty());
    }
}
