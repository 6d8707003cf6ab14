//! Property tests for dispatch robustness
//!
//! Whatever the relay sends, dispatch must never panic and the entity store
//! must only ever hold players announced by CreatePlayer and not yet
//! destroyed.

use automatamp_client::{Dispatcher, EntityStore, LocalSession, RecordingHooks};
use automatamp_net::{decode_envelope, Envelope, Welcome, PROTOCOL_MAGIC};
use automatamp_testkit::fixtures;
use proptest::prelude::*;
use std::collections::BTreeSet;

const LOCAL: u64 = 1;

fn session() -> LocalSession {
    LocalSession::from_welcome(&Welcome {
        guid: LOCAL,
        is_master_client: false,
    })
}

#[derive(Debug, Clone)]
enum Op {
    Create(u64),
    Destroy(u64),
    Relay(u64),
    Garbage(u32, Vec<u8>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..6).prop_map(Op::Create),
        (0u64..6).prop_map(Op::Destroy),
        (0u64..6).prop_map(Op::Relay),
        (
            any::<u32>().prop_filter("lifecycle ids", |id| *id != 5 && *id != 6),
            prop::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(id, data)| Op::Garbage(id, data)),
    ]
}

proptest! {
    /// Property: Arbitrary payloads under a valid header never panic dispatch
    #[test]
    fn arbitrary_envelopes_dont_crash_dispatch(
        id in 1u32..1100,
        data in prop::option::of(prop::collection::vec(any::<u8>(), 0..256)),
    ) {
        let dispatcher = Dispatcher::new();
        let mut store = EntityStore::new();
        let mut hooks = RecordingHooks::default();
        let envelope = Envelope { magic: PROTOCOL_MAGIC, id, data };

        let _outcome = dispatcher.dispatch(&envelope, &session(), &mut store, &mut hooks);
        // No panic = success
    }

    /// Property: The store tracks exactly the created-and-not-destroyed set
    #[test]
    fn store_matches_lifecycle_model(ops in prop::collection::vec(op(), 0..64)) {
        let dispatcher = Dispatcher::new();
        let mut store = EntityStore::new();
        let mut hooks = RecordingHooks::default();
        let mut model = BTreeSet::new();

        for op in ops {
            let bytes = match &op {
                Op::Create(guid) => fixtures::create_player(*guid, "P", 0),
                Op::Destroy(guid) => fixtures::destroy_player(*guid),
                Op::Relay(guid) => fixtures::bounced_player_data(*guid, &Default::default()),
                Op::Garbage(id, data) => fixtures::raw(PROTOCOL_MAGIC, *id, Some(data.clone())),
            };
            let envelope = decode_envelope(&bytes).unwrap();
            dispatcher.dispatch(&envelope, &session(), &mut store, &mut hooks);

            match op {
                Op::Create(guid) => {
                    model.insert(guid);
                }
                Op::Destroy(guid) => {
                    model.remove(&guid);
                }
                _ => {}
            }
        }

        let guids: BTreeSet<u64> = store.guids().into_iter().collect();
        prop_assert_eq!(guids, model);
    }
}
