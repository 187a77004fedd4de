//! Codec-aware protocol handler for the gossip subprotocol.

use crate::domain::{BloomFilter, GossipCodec, GossipMessage, NodeId};
use crate::error::{GossipError, Result};
use crate::metrics::GossipMetrics;
use crate::ports::{AppHandler, GossipSet};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Target size of a pull response.
pub const TARGET_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

/// Decodes pushed and pulled items into the set and answers pull requests.
pub struct GossipHandler {
    set: Arc<dyn GossipSet>,
    target_response_size: usize,
    metrics: Arc<GossipMetrics>,
}

impl GossipHandler {
    pub fn new(
        set: Arc<dyn GossipSet>,
        target_response_size: usize,
        metrics: Arc<GossipMetrics>,
    ) -> Self {
        Self {
            set,
            target_response_size,
            metrics,
        }
    }

    /// Decode and add each item independently.
    fn add_items(&self, peer: NodeId, items: Vec<Vec<u8>>) {
        for bytes in items {
            let item = match GossipCodec::decode(&bytes) {
                Ok(item) => item,
                Err(e) => {
                    debug!(%peer, error = %e, "[gossip] Dropping malformed item");
                    GossipMetrics::incr(&self.metrics.items_malformed);
                    continue;
                }
            };
            let id = item.id();
            if let Err(e) = self.set.add(item) {
                debug!(%peer, item = %id, error = %e, "[gossip] Failed to add gossiped item");
            }
        }
    }

    /// Pending items the requester's filter does not contain, up to the
    /// target response size.
    fn serve_pull(&self, filter: &[u8], salt: &[u8]) -> Result<Vec<Vec<u8>>> {
        let peer_filter = BloomFilter::parse(filter, salt).map_err(GossipError::InvalidFilter)?;
        let mut items = Vec::new();
        let mut size = 0usize;
        self.set.iterate(&mut |item| {
            if peer_filter.contains(item.id().as_bytes()) {
                return true;
            }
            let bytes = GossipCodec::encode(item);
            size += bytes.len();
            items.push(bytes);
            size < self.target_response_size
        });
        Ok(items)
    }
}

#[async_trait]
impl AppHandler for GossipHandler {
    async fn app_gossip(&self, peer: NodeId, msg: &[u8]) -> Result<()> {
        match GossipMessage::from_bytes(msg).map_err(GossipError::Protocol)? {
            GossipMessage::Push { items } => {
                self.add_items(peer, items);
                Ok(())
            }
            other => Err(GossipError::Protocol(format!(
                "unexpected gossip message: {}",
                variant_name(&other)
            ))),
        }
    }

    async fn app_request(&self, peer: NodeId, msg: &[u8]) -> Result<Vec<u8>> {
        match GossipMessage::from_bytes(msg).map_err(GossipError::Protocol)? {
            GossipMessage::PullRequest { filter, salt } => {
                let items = self.serve_pull(&filter, &salt)?;
                debug!(%peer, count = items.len(), "[gossip] Serving pull request");
                GossipMetrics::incr(&self.metrics.pull_requests_served);
                Ok(GossipMessage::PullResponse { items }.to_bytes())
            }
            other => Err(GossipError::Protocol(format!(
                "unexpected request: {}",
                variant_name(&other)
            ))),
        }
    }

    async fn app_response(&self, peer: NodeId, msg: &[u8]) -> Result<()> {
        match GossipMessage::from_bytes(msg).map_err(GossipError::Protocol)? {
            GossipMessage::PullResponse { items } => {
                self.add_items(peer, items);
                Ok(())
            }
            other => Err(GossipError::Protocol(format!(
                "unexpected response: {}",
                variant_name(&other)
            ))),
        }
    }
}

fn variant_name(msg: &GossipMessage) -> &'static str {
    match msg {
        GossipMessage::Push { .. } => "push",
        GossipMessage::PullRequest { .. } => "pull_request",
        GossipMessage::PullResponse { .. } => "pull_response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GossipFilter, GossipItem};
    use crate::service::DedupSet;
    use shared_types::test_utils::{sample_transaction, InMemoryLedger};
    use shared_types::{LedgerEngine, Transaction};
    use tokio::sync::mpsc;

    fn setup(target: usize) -> (Arc<InMemoryLedger>, Arc<DedupSet>, GossipHandler) {
        let ledger = Arc::new(InMemoryLedger::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(GossipMetrics::new());
        let set = Arc::new(DedupSet::new(
            ledger.clone(),
            GossipFilter::new(1_024, 0.01, 0.05),
            tx,
            metrics.clone(),
        ));
        let handler = GossipHandler::new(set.clone(), target, metrics);
        (ledger, set, handler)
    }

    fn encoded(tx: &Transaction) -> Vec<u8> {
        GossipCodec::encode(&GossipItem::tx(tx.clone()))
    }

    #[tokio::test]
    async fn test_push_skips_malformed_items() {
        let (ledger, _set, handler) = setup(TARGET_RESPONSE_SIZE);
        let good = sample_transaction(1);
        let msg = GossipMessage::Push {
            items: vec![vec![0x09, 0x00], encoded(&good), Vec::new()],
        };
        handler.app_gossip(NodeId::default(), &msg.to_bytes()).await.unwrap();
        assert_eq!(ledger.mempool_len(), 1);
        assert_eq!(handler.metrics.snapshot().items_malformed, 2);
    }

    #[tokio::test]
    async fn test_pull_excludes_items_in_peer_filter() {
        let (ledger, _set, handler) = setup(TARGET_RESPONSE_SIZE);
        let a = sample_transaction(1);
        let b = sample_transaction(2);
        ledger.process_transaction(&a).unwrap();
        ledger.process_transaction(&b).unwrap();

        // The peer already has `a`.
        let mut peer = GossipFilter::new(64, 0.01, 0.05);
        peer.add(&a.txid());
        let (filter, salt) = peer.marshal();

        let request = GossipMessage::PullRequest { filter, salt };
        let response = handler
            .app_request(NodeId::default(), &request.to_bytes())
            .await
            .unwrap();
        match GossipMessage::from_bytes(&response).unwrap() {
            GossipMessage::PullResponse { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(GossipCodec::decode(&items[0]).unwrap().id(), b.txid());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pull_response_bounded_by_target_size() {
        let (ledger, _set, handler) = setup(1);
        for seed in 1..=5 {
            ledger.process_transaction(&sample_transaction(seed)).unwrap();
        }
        let (filter, salt) = GossipFilter::new(64, 0.01, 0.05).marshal();
        let request = GossipMessage::PullRequest { filter, salt };
        let response = handler
            .app_request(NodeId::default(), &request.to_bytes())
            .await
            .unwrap();
        match GossipMessage::from_bytes(&response).unwrap() {
            GossipMessage::PullResponse { items } => assert_eq!(items.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_message_type_is_protocol_error() {
        let (_ledger, _set, handler) = setup(TARGET_RESPONSE_SIZE);
        let msg = GossipMessage::PullResponse { items: Vec::new() }.to_bytes();
        let err = handler.app_request(NodeId::default(), &msg).await.unwrap_err();
        assert!(matches!(err, GossipError::Protocol(_)));
        assert!(err.is_per_message());
    }

    #[tokio::test]
    async fn test_invalid_peer_filter_rejected() {
        let (_ledger, _set, handler) = setup(TARGET_RESPONSE_SIZE);
        let request = GossipMessage::PullRequest {
            filter: vec![1, 2, 3],
            salt: vec![0; 32],
        };
        let err = handler
            .app_request(NodeId::default(), &request.to_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, GossipError::InvalidFilter(_)));
    }
}
