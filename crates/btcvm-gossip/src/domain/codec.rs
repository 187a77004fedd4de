//! Gossip item codec: `[kind: u8][payload in Bitcoin witness encoding]`.

use super::item::{GossipItem, GossipKind};
use crate::error::DecodeError;
use shared_types::{Block, Transaction, WireDecode, WireEncode};

/// Encoder/decoder for [`GossipItem`] bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GossipCodec;

impl GossipCodec {
    pub fn encode(item: &GossipItem) -> Vec<u8> {
        let mut out = vec![item.kind().as_byte()];
        match item {
            GossipItem::Tx(tx) => tx.encode_to(&mut out),
            GossipItem::Block(block) => block.encode_to(&mut out),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<GossipItem, DecodeError> {
        let (&tag, payload) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let kind = GossipKind::from_byte(tag).ok_or(DecodeError::UnknownKind(tag))?;
        let malformed = |source| DecodeError::Malformed { kind, source };
        match kind {
            GossipKind::Tx => Transaction::from_wire_bytes(payload)
                .map(GossipItem::tx)
                .map_err(malformed),
            GossipKind::Block => Block::from_wire_bytes(payload)
                .map(GossipItem::block)
                .map_err(malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shared_types::test_utils::{child_transaction, sample_transaction, InMemoryLedger};
    use shared_types::{OutPoint, TxIn, TxOut};

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(GossipCodec::decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            GossipCodec::decode(&[0x07, 0x00]),
            Err(DecodeError::UnknownKind(0x07))
        );
    }

    #[test]
    fn test_malformed_payload_names_kind() {
        let mut bytes = GossipCodec::encode(&GossipItem::tx(sample_transaction(1)));
        bytes.truncate(bytes.len() - 3);
        match GossipCodec::decode(&bytes) {
            Err(DecodeError::Malformed { kind, .. }) => assert_eq!(kind, GossipKind::Tx),
            other => panic!("expected malformed tx, got {other:?}"),
        }
    }

    #[test]
    fn test_block_round_trip_keeps_identity() {
        let ledger = InMemoryLedger::new();
        let parent = sample_transaction(2);
        let block = ledger.make_block(
            ledger.genesis_hash(),
            9,
            vec![parent.clone(), child_transaction(&parent)],
        );
        let item = GossipItem::block(block);
        let decoded = GossipCodec::decode(&GossipCodec::encode(&item)).unwrap();
        assert_eq!(decoded.kind(), GossipKind::Block);
        assert_eq!(decoded.id(), item.id());
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_first_byte_is_discriminator() {
        let tx = GossipCodec::encode(&GossipItem::tx(sample_transaction(1)));
        assert_eq!(tx[0], 0x01);
    }

    fn arb_transaction() -> impl Strategy<Value = Transaction> {
        let input = (
            any::<[u8; 32]>(),
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), 0..40),
            any::<u32>(),
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..20), 0..3),
        )
            .prop_map(|(txid, vout, script_sig, sequence, witness)| TxIn {
                previous_output: OutPoint {
                    txid: txid.into(),
                    vout,
                },
                script_sig,
                sequence,
                witness,
            });
        let output = (any::<i64>(), proptest::collection::vec(any::<u8>(), 0..40))
            .prop_map(|(value, script_pubkey)| TxOut {
                value,
                script_pubkey,
            });
        (
            any::<i32>(),
            proptest::collection::vec(input, 1..4),
            proptest::collection::vec(output, 0..4),
            any::<u32>(),
        )
            .prop_map(|(version, inputs, outputs, lock_time)| Transaction {
                version,
                inputs,
                outputs,
                lock_time,
            })
    }

    proptest! {
        #[test]
        fn prop_tx_round_trip_preserves_identity(tx in arb_transaction()) {
            let item = GossipItem::tx(tx);
            let decoded = GossipCodec::decode(&GossipCodec::encode(&item)).unwrap();
            prop_assert_eq!(decoded.kind(), item.kind());
            prop_assert_eq!(decoded.id(), item.id());
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
            let _ = GossipCodec::decode(&bytes);
        }
    }
}
