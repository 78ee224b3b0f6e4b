//! Bridge from the sensor engine's update queue to the session registry.

use std::sync::Arc;

use greenhouse_core::NodeManager;
use greenhouse_server::ClientRegistry;
use greenhouse_types::SensorUpdate;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Drain `updates` into [`ClientRegistry::broadcast_sensor_update`] until
/// every sender is dropped.
///
/// Updates still queued for a node that has since been deleted are
/// dropped, so no `sensor_update` follows its removal notice.
pub fn spawn_update_forwarder(
    nodes: Arc<NodeManager>,
    registry: Arc<ClientRegistry>,
    mut updates: mpsc::Receiver<SensorUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if !nodes.contains(&update.node_id).await {
                trace!(node_id = %update.node_id, "Dropping update for removed node");
                continue;
            }
            let delivered = registry.broadcast_sensor_update(&update).await;
            trace!(node_id = %update.node_id, delivered, "Sensor update forwarded");
        }
        debug!("Update queue closed, forwarder exiting");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use greenhouse_types::{EventKind, NodeId, NodeSpec, Snapshot, WindowLevel};

    use super::*;

    fn update(node: &str) -> SensorUpdate {
        SensorUpdate::now(
            NodeId::from(node),
            Snapshot {
                temperature: 20.0,
                humidity: 50.0,
                light: 10_000.0,
                ph: 6.5,
                fan: false,
                water_pump: false,
                co2: false,
                window: WindowLevel::Closed,
            },
        )
    }

    async fn node_manager(ids: &[&str]) -> Arc<NodeManager> {
        let nodes = Arc::new(NodeManager::default());
        for id in ids {
            let spec = NodeSpec {
                id: Some(NodeId::from(*id)),
                ..NodeSpec::default()
            };
            nodes.add_node(spec).await;
        }
        nodes
    }

    #[tokio::test]
    async fn forwards_only_to_interested_sessions() {
        let nodes = node_manager(&["a", "b"]).await;
        let registry = Arc::new(ClientRegistry::new());
        let (session_tx, mut session_rx) = mpsc::channel(8);
        let session = registry.add_session(session_tx).await;
        registry
            .subscribe(session, &[EventKind::SensorUpdate], &[String::from("a")])
            .await;

        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_update_forwarder(nodes, Arc::clone(&registry), rx);
        tx.send(update("b")).await.unwrap();
        tx.send(update("a")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let line = session_rx.try_recv().unwrap();
        assert!(line.contains("\"nodeId\":\"a\""));
        assert!(line.ends_with('\n'));
        assert!(session_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn queued_updates_for_deleted_nodes_are_dropped() {
        let nodes = node_manager(&["a"]).await;
        let registry = Arc::new(ClientRegistry::new());
        let (session_tx, mut session_rx) = mpsc::channel(8);
        let session = registry.add_session(session_tx).await;
        registry.subscribe(session, &[EventKind::SensorUpdate], &[]).await;

        let (tx, rx) = mpsc::channel(8);
        tx.send(update("a")).await.unwrap();
        nodes.delete_node(&NodeId::from("a")).await;
        let handle = spawn_update_forwarder(Arc::clone(&nodes), Arc::clone(&registry), rx);
        drop(tx);
        handle.await.unwrap();

        assert!(session_rx.try_recv().is_err());
    }
}
