//! Property-based tests for addressing and reconciliation
//!
//! Uses proptest to check that writer sets are canonical and that
//! reconciliation is deterministic, idempotent and collapses duplicates.

use proptest::prelude::*;
use talktime_core::chat::UNSUPPORTED_TEXT;
use talktime_core::log::Operation;
use talktime_core::{reconcile, LocalIdentity, LogAddress, LogEntry, LogKind, MessageKind, WriterSet};

// ============================================================================
// Strategy Generators
// ============================================================================

fn seed_strategy() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

/// Payloads a peer might write, valid or not
#[derive(Debug, Clone)]
enum Payload {
    Chat(String, Option<i64>),
    NoMessage,
    NumericMessage(i64),
    NotJson(String),
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop_oneof![
        4 => ("[a-zA-Z0-9 ]{0,40}", proptest::option::of(0i64..2_000_000_000_000))
            .prop_map(|(text, ts)| Payload::Chat(text, ts)),
        1 => Just(Payload::NoMessage),
        1 => any::<i64>().prop_map(Payload::NumericMessage),
        1 => "[{}a-z]{0,10}".prop_map(Payload::NotJson),
    ]
}

fn render(payload: &Payload) -> String {
    match payload {
        Payload::Chat(text, Some(ts)) => serde_json::json!({ "message": text, "timestamp": ts }).to_string(),
        Payload::Chat(text, None) => serde_json::json!({ "message": text }).to_string(),
        Payload::NoMessage => serde_json::json!({ "type": "reaction" }).to_string(),
        Payload::NumericMessage(n) => serde_json::json!({ "message": n }).to_string(),
        Payload::NotJson(raw) => raw.clone(),
    }
}

struct Conversation {
    alice: LocalIdentity,
    bob: LocalIdentity,
    entries: Vec<LogEntry>,
}

/// Alternate authors, one entry per payload, clocks 1..=n
fn conversation(payloads: &[Payload]) -> Conversation {
    let alice = LocalIdentity::from_seed(&[1; 32]);
    let bob = LocalIdentity::from_seed(&[2; 32]);
    let writers = WriterSet::new(alice.did().clone(), bob.did().clone()).unwrap();
    let address = LogAddress::derive("talktime", LogKind::Feed, &writers);

    let entries = payloads
        .iter()
        .enumerate()
        .map(|(i, payload)| {
            let author = if i % 2 == 0 { &alice } else { &bob };
            LogEntry::create(
                author,
                address,
                i as u64 + 1,
                vec![],
                Operation::Add { value: render(payload) },
            )
            .unwrap()
        })
        .collect();

    Conversation { alice, bob, entries }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Argument order never changes the writer set or the derived address
    #[test]
    fn writer_set_is_order_independent(a in seed_strategy(), b in seed_strategy()) {
        prop_assume!(a != b);
        let a = LocalIdentity::from_seed(&a);
        let b = LocalIdentity::from_seed(&b);

        let ab = WriterSet::new(a.did().clone(), b.did().clone()).unwrap();
        let ba = WriterSet::new(b.did().clone(), a.did().clone()).unwrap();

        prop_assert_eq!(&ab, &ba);
        prop_assert!(ab.as_slice()[0] < ab.as_slice()[1]);
        prop_assert_eq!(
            LogAddress::derive("talktime", LogKind::Feed, &ab),
            LogAddress::derive("talktime", LogKind::Feed, &ba)
        );
    }

    /// Reconciling the same entries twice yields the same messages
    #[test]
    fn reconcile_is_idempotent(payloads in prop::collection::vec(payload_strategy(), 0..30)) {
        let c = conversation(&payloads);
        let first = reconcile(&c.entries, c.alice.did(), true);
        let second = reconcile(&c.entries, c.alice.did(), true);
        prop_assert_eq!(first, second);
    }

    /// Every entry yields exactly one message, in log order; malformed ones
    /// become placeholders
    #[test]
    fn one_message_per_entry(payloads in prop::collection::vec(payload_strategy(), 0..30)) {
        let c = conversation(&payloads);
        let messages = reconcile(&c.entries, c.bob.did(), false);

        prop_assert_eq!(messages.len(), payloads.len());
        for (i, (message, payload)) in messages.iter().zip(&payloads).enumerate() {
            prop_assert_eq!(message.id, c.entries[i].hash);
            prop_assert_eq!(message.is_mine, i % 2 == 1);
            match payload {
                Payload::Chat(text, ts) => {
                    prop_assert_eq!(message.kind, MessageKind::Message);
                    prop_assert_eq!(&message.text, text);
                    prop_assert_eq!(message.timestamp, *ts);
                }
                _ => {
                    prop_assert_eq!(message.kind, MessageKind::Unsupported);
                    prop_assert_eq!(message.text.as_str(), UNSUPPORTED_TEXT);
                }
            }
        }
    }

    /// Replayed entries collapse into their first occurrence
    #[test]
    fn duplicates_collapse(
        payloads in prop::collection::vec(payload_strategy(), 1..15),
        replays in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
    ) {
        let c = conversation(&payloads);
        let mut with_replays = c.entries.clone();
        for index in &replays {
            with_replays.push(index.get(&c.entries).clone());
        }

        let clean = reconcile(&c.entries, c.alice.did(), false);
        let replayed = reconcile(&with_replays, c.alice.did(), false);
        prop_assert_eq!(clean, replayed);
    }
}
