use async_trait::async_trait;
use quorum_peer::config::PeerConfig;
use quorum_peer::PeerContext;
use quorum_sdk::*;
use std::sync::Arc;

/// Two-party engine: swap party numbers, derive the share from both.
struct SwapEngine;

#[async_trait]
impl ComputeEngine for SwapEngine {
    async fn run_operation(&self, _kind: OperationKind, mut input: OperationInput) -> ComputationResult {
        let me = input.party_number as u8;
        let _ = input.outbox.send(PeerMessage {
            peer: None,
            body: vec![me],
        });
        let other = input
            .inbox
            .recv()
            .await
            .ok_or_else(|| ComputationError("peer went quiet".into()))?;
        Ok(ComputationOutput::KeyShare {
            address: "0xfeed".parse().unwrap(),
            share: ShareMaterial::new(vec![me, other.body[0]]),
        })
    }
}

async fn context(dir: &tempfile::TempDir, peer_id: &str) -> PeerContext {
    let db = dir.path().join(format!("{peer_id}.db"));
    let conf = PeerConfig::parse(&format!(
        r#"
[peer]
PeerId = "{peer_id}"
SqlitePath = {:?}

[session]
Parties = 2
Threshold = 1

[logging]
Level = "debug"
Dir = "logs"
"#,
        db.to_str().unwrap()
    ))
    .unwrap();
    PeerContext::open(conf).await.unwrap()
}

#[tokio::test]
async fn keygen_lands_in_sqlite_and_journal() {
    let dir = tempfile::tempdir().unwrap();
    let hub = LoopbackHub::new();
    let alice_ctx = context(&dir, "alice").await;
    let bob_ctx = context(&dir, "bob").await;
    let alice_id: Identity = "alice@example.com".parse().unwrap();
    let bob_id: Identity = "bob@example.com".parse().unwrap();

    let (channel, inbound) = hub.connect("alice").await;
    let mut alice = alice_ctx.coordinator(
        alice_id.clone(),
        Arc::new(channel),
        inbound,
        Arc::new(SwapEngine),
    );
    let (channel, inbound) = hub.connect("bob").await;
    let mut bob = bob_ctx.coordinator(bob_id.clone(), Arc::new(channel), inbound, Arc::new(SwapEngine));

    // Parties and threshold come from the config file.
    let session = alice
        .create_session(SessionKind::Keygen, SessionParams::keygen("joint"))
        .await
        .unwrap();
    assert_eq!(session.quorum(), 2);
    let key = session.key;
    bob.join_session(&key.group_id, &key.session_id).await.unwrap();
    let (a, b) = tokio::join!(alice.next_report(), bob.next_report());
    assert!(matches!(a, Some(SessionReport::Completed { persisted: Ok(()), .. })));
    assert!(matches!(b, Some(SessionReport::Completed { persisted: Ok(()), .. })));

    let stored = alice_ctx.store.load(&alice_id).await.unwrap().unwrap();
    let share = &stored.key_shares[&"0xfeed".parse::<Address>().unwrap()];
    assert_eq!(share.label, "joint");
    assert_eq!(share.share.as_bytes(), &[1, 2]);
    let stored = bob_ctx.store.load(&bob_id).await.unwrap().unwrap();
    assert_eq!(
        stored.key_shares[&"0xfeed".parse::<Address>().unwrap()].share.as_bytes(),
        &[2, 1]
    );

    let entries = alice_ctx.journal.entries(&key).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].identity, alice_id);
    assert!(entries[0].exception.is_none());

    let out = quorum_peer::commands::journal(&bob_ctx, None, Some("bob@example.com"), 5)
        .await
        .unwrap();
    assert!(out.contains("key share 0xfeed «joint»"));
}

#[tokio::test]
async fn reopening_keeps_existing_state() {
    let dir = tempfile::tempdir().unwrap();
    let erin: Identity = "erin@example.com".parse().unwrap();
    {
        let ctx = context(&dir, "erin").await;
        ctx.states
            .apply_session_result(
                &erin,
                &SessionFruit::KeyShare {
                    address: "0xabc".parse().unwrap(),
                    share: KeyShare {
                        label: "kept".into(),
                        share: ShareMaterial::new(vec![5]),
                    },
                },
            )
            .await
            .unwrap();
    }
    let ctx = context(&dir, "erin").await;
    let state = ctx.states.load(&erin).await.unwrap();
    assert!(state.has_key_share(&"0xabc".parse().unwrap()));
}
