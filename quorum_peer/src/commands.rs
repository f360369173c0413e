//! What the CLI subcommands do. Each returns the text to print.

use crate::PeerContext;
use anyhow::Context;
use quorum_sdk::{AppState, Identity, SessionKey, SessionRoute};
use std::fmt::Write;

pub async fn show(ctx: &PeerContext, identity: &str) -> anyhow::Result<String> {
    let identity: Identity = identity.parse()?;
    let state = ctx
        .states
        .load(&identity)
        .await
        .with_context(|| format!("Cannot load state of {identity}"))?;
    let updated_at = ctx.store.updated_at(&identity).await?;
    let mut out = format!(
        "{identity} (updated {})\n",
        updated_at.as_deref().unwrap_or("never")
    );
    out.push_str(&render_state(&state));
    Ok(out)
}

pub async fn clear(ctx: &PeerContext, identity: &str) -> anyhow::Result<String> {
    let identity: Identity = identity.parse()?;
    ctx.states
        .clear(&identity)
        .await
        .with_context(|| format!("Cannot clear state of {identity}"))?;
    Ok(format!("state of {identity} cleared\n"))
}

/// Journal entries of one session (`group/session`), or the most recent
/// entries of one identity.
pub async fn journal(
    ctx: &PeerContext,
    session: Option<&str>,
    identity: Option<&str>,
    limit: u32,
) -> anyhow::Result<String> {
    let entries = match (session, identity) {
        (Some(session), _) => {
            let (group_id, session_id) = session
                .split_once('/')
                .context("session must be given as «group/session»")?;
            let key = SessionKey::new(group_id, session_id)?;
            ctx.journal.entries(&key).await?
        }
        (None, Some(identity)) => {
            let identity: Identity = identity.parse()?;
            ctx.journal.recent(&identity, limit).await?
        }
        (None, None) => anyhow::bail!("give --session or --identity"),
    };
    if entries.is_empty() {
        return Ok("no journal entries\n".into());
    }
    let mut out = String::new();
    for entry in entries {
        let outcome = match (&entry.fruit, &entry.exception) {
            (Some(fruit), None) => fruit.summary(),
            (Some(fruit), Some(ex)) => format!("{} (not saved: {ex})", fruit.summary()),
            (None, Some(ex)) => format!("failed: {ex}"),
            (None, None) => "no outcome".into(),
        };
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            entry.finished_at, entry.key, entry.identity, outcome
        );
    }
    Ok(out)
}

pub fn route(path: &str) -> anyhow::Result<String> {
    let route = SessionRoute::parse(path)?;
    let mut out = format!("{}\n", route.to_path());
    let _ = writeln!(out, "  kind:    {}", route.kind());
    if let Some(address) = route.address() {
        let _ = writeln!(out, "  address: {address}");
    }
    let _ = writeln!(out, "  session: {}", route.key());
    Ok(out)
}

pub fn render_state(state: &AppState) -> String {
    if state.is_empty() {
        return "  (empty)\n".into();
    }
    let mut out = String::new();
    if !state.key_shares.is_empty() {
        out.push_str("  key shares:\n");
        for (address, share) in state.key_shares.iter() {
            let _ = writeln!(out, "    {address}  «{}»", share.label);
        }
    }
    if !state.message_proofs.is_empty() {
        out.push_str("  message proofs:\n");
        for (id, proof) in state.message_proofs.iter() {
            let _ = writeln!(
                out,
                "    {id}  {}  {}",
                proof.address,
                hex::encode(&proof.signature)
            );
        }
    }
    if !state.transaction_receipts.is_empty() {
        out.push_str("  transaction receipts:\n");
        for (id, receipt) in state.transaction_receipts.iter() {
            let _ = writeln!(
                out,
                "    {id}  {}  {}",
                receipt.address,
                hex::encode(&receipt.receipt)
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use quorum_sdk::{KeyShare, MessageProof, SessionFruit, ShareMaterial};

    async fn context(dir: &tempfile::TempDir) -> PeerContext {
        let db = dir.path().join("peer.db");
        let conf = PeerConfig::parse(&format!(
            "[peer]\nPeerId = \"peer-1\"\nSqlitePath = {:?}\n[logging]\nLevel = \"info\"\nDir = \"logs\"\n",
            db.to_str().unwrap()
        ))
        .unwrap();
        PeerContext::open(conf).await.unwrap()
    }

    #[tokio::test]
    async fn show_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;
        let out = show(&ctx, "frank@example.com").await.unwrap();
        assert!(out.contains("updated never"));
        assert!(out.contains("(empty)"));

        let frank: Identity = "frank@example.com".parse().unwrap();
        ctx.states
            .apply_session_result(
                &frank,
                &SessionFruit::KeyShare {
                    address: "0xabc".parse().unwrap(),
                    share: KeyShare {
                        label: "treasury".into(),
                        share: ShareMaterial::new(vec![1]),
                    },
                },
            )
            .await
            .unwrap();
        let out = show(&ctx, "Frank@Example.com").await.unwrap();
        assert!(out.contains("0xabc  «treasury»"));
        assert!(!out.contains("updated never"));

        clear(&ctx, "frank@example.com").await.unwrap();
        let out = show(&ctx, "frank@example.com").await.unwrap();
        assert!(out.contains("(empty)"));
    }

    #[test]
    fn render_lists_every_section() {
        let mut state = AppState::default();
        state.merge(&SessionFruit::MessageProof {
            message_id: "msg-1".into(),
            proof: MessageProof {
                address: "0xabc".parse().unwrap(),
                signature: vec![0xbe, 0xef],
            },
        });
        let out = render_state(&state);
        assert!(out.contains("message proofs:"));
        assert!(out.contains("msg-1  0xabc  beef"));
        assert!(!out.contains("key shares:"));
    }

    #[test]
    fn route_prints_canonical_form() {
        let out = route("#/keys/0xABC/sign/join/message/g1/s1").unwrap();
        assert!(out.starts_with("/keys/0xabc/sign/join/message/g1/s1\n"));
        assert!(out.contains("kind:    sign-message"));
        assert!(route("/keys/join/g1").is_err());
    }

    #[tokio::test]
    async fn journal_needs_a_selector() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;
        assert!(journal(&ctx, None, None, 10).await.is_err());
        assert!(journal(&ctx, Some("g1-s1"), None, 10).await.is_err());
        let out = journal(&ctx, Some("g1/s1"), None, 10).await.unwrap();
        assert_eq!(out, "no journal entries\n");
    }
}
