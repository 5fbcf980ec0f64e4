//! Membership bridge between cluster discovery and consensus.
//!
//! An external gossip layer observes nodes joining and leaving the cluster
//! and publishes [`MemberEvent`]s. [`Membership`] consumes those events on a
//! single task and drives a [`Handler`] (the replicated log), so handler
//! calls are sequential and match the gossip order.
//!
//! On non-leader nodes, join/leave reach consensus and come back with a
//! not-leader error. That is expected: only the leader performs
//! configuration changes, and the same event reaches every node, so the
//! leader eventually handles it. Those errors are not treated as faults.

use std::sync::Arc;

use async_trait::async_trait;
use common::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A cluster membership change observed by the discovery layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberEvent {
    /// A node joined; `rpc_addr` is the address it serves on.
    Join { name: String, rpc_addr: String },
    /// A node left the cluster voluntarily.
    Leave { name: String },
    /// A node stopped responding to the failure detector.
    Failed { name: String },
}

/// Receiver of membership changes, typically the replicated log.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn join(&self, name: &str, rpc_addr: &str) -> Result<()>;
    async fn leave(&self, name: &str) -> Result<()>;
}

/// Configuration for the membership bridge.
#[derive(Clone, Debug)]
pub struct MembershipConfig {
    /// This node's own name; events about it are ignored.
    pub node_name: String,
}

/// Sender half handed to the discovery layer.
pub type EventSender = mpsc::UnboundedSender<MemberEvent>;

/// Bridges membership events into handler calls.
pub struct Membership {
    events: EventSender,
    task: JoinHandle<()>,
}

impl Membership {
    pub fn new(handler: Arc<dyn Handler>, config: MembershipConfig) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(event_loop(handler, config, rx));
        Self { events, task }
    }

    /// Sender for the discovery layer to publish events on.
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    /// Publish a single event.
    pub fn notify(&self, event: MemberEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn event_loop(
    handler: Arc<dyn Handler>,
    config: MembershipConfig,
    mut events: mpsc::UnboundedReceiver<MemberEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            MemberEvent::Join { name, rpc_addr } => {
                if name == config.node_name {
                    continue;
                }
                if let Err(e) = handler.join(&name, &rpc_addr).await {
                    if e.is_not_leader() {
                        debug!(%name, %rpc_addr, "ignoring join on non-leader");
                    } else {
                        error!(%name, %rpc_addr, error = %e, "failed to join member");
                    }
                }
            }
            MemberEvent::Leave { name } | MemberEvent::Failed { name } => {
                if name == config.node_name {
                    continue;
                }
                if let Err(e) = handler.leave(&name).await {
                    if e.is_not_leader() {
                        debug!(%name, "ignoring leave on non-leader");
                    } else {
                        error!(%name, error = %e, "failed to remove member");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
        not_leader: bool,
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        async fn join(&self, name: &str, rpc_addr: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("join:{name}:{rpc_addr}"));
            if self.not_leader {
                return Err(Error::NotLeader { leader_addr: None });
            }
            Ok(())
        }

        async fn leave(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("leave:{name}"));
            if self.not_leader {
                return Err(Error::NotLeader { leader_addr: None });
            }
            Ok(())
        }
    }

    async fn drain(handler: &RecordingHandler, expected: usize) -> Vec<String> {
        for _ in 0..100 {
            if handler.calls.lock().unwrap().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handler.calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn events_reach_the_handler_in_order() {
        let handler = Arc::new(RecordingHandler::default());
        let membership = Membership::new(
            handler.clone(),
            MembershipConfig {
                node_name: "0".into(),
            },
        );

        membership.notify(MemberEvent::Join {
            name: "1".into(),
            rpc_addr: "127.0.0.1:9001".into(),
        });
        membership.notify(MemberEvent::Failed { name: "1".into() });

        let calls = drain(&handler, 2).await;
        assert_eq!(calls, vec!["join:1:127.0.0.1:9001", "leave:1"]);
    }

    #[tokio::test]
    async fn local_node_events_are_ignored() {
        let handler = Arc::new(RecordingHandler::default());
        let membership = Membership::new(
            handler.clone(),
            MembershipConfig {
                node_name: "1".into(),
            },
        );

        membership.notify(MemberEvent::Join {
            name: "1".into(),
            rpc_addr: "127.0.0.1:9001".into(),
        });
        membership.notify(MemberEvent::Join {
            name: "2".into(),
            rpc_addr: "127.0.0.1:9002".into(),
        });

        let calls = drain(&handler, 1).await;
        assert_eq!(calls, vec!["join:2:127.0.0.1:9002"]);
    }

    #[tokio::test]
    async fn not_leader_errors_are_tolerated() {
        let handler = Arc::new(RecordingHandler {
            not_leader: true,
            ..Default::default()
        });
        let membership = Membership::new(
            handler.clone(),
            MembershipConfig {
                node_name: "0".into(),
            },
        );

        membership.notify(MemberEvent::Join {
            name: "1".into(),
            rpc_addr: "127.0.0.1:9001".into(),
        });
        membership.notify(MemberEvent::Leave { name: "2".into() });

        // The loop keeps consuming after not-leader errors.
        let calls = drain(&handler, 2).await;
        assert_eq!(calls.len(), 2);
    }
}
