//! Replay equivalence: rebuilding from the raw log must reproduce the
//! live aggregate for an identical event sequence.

use rangemark::db::init_db;
use rangemark::domain::{Address, Cursor, LedgerEvent, MarketId, Position, SellMode, TimeMs};
use rangemark::engine::{rebuild_and_store, rebuild_positions, reconcile};
use rangemark::Repository;
use std::sync::Arc;
use tempfile::TempDir;

async fn setup() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

fn market() -> MarketId {
    MarketId::new("mkt-1".to_string())
}

fn buy(cp: i64, user: &str, lower: i64, shares: i64, cost: i64) -> LedgerEvent {
    LedgerEvent::purchase(
        Some(format!("0xbuy-{}-{}", user, cp)),
        Cursor::new(cp),
        TimeMs::new(cp * 1000),
        market(),
        Address::new(user.to_string()),
        lower,
        lower + 1_000,
        shares,
        cost,
        None,
    )
}

fn sell(cp: i64, user: &str, lower: i64, shares: i64, proceeds: i64) -> LedgerEvent {
    LedgerEvent::sale(
        Some(format!("0xsell-{}-{}", user, cp)),
        Cursor::new(cp),
        TimeMs::new(cp * 1000),
        market(),
        Address::new(user.to_string()),
        lower,
        lower + 1_000,
        shares,
        proceeds,
        None,
        SellMode::Fifo,
    )
}

fn claim(cp: i64, user: &str, lower: i64, shares: i64, payout: i64) -> LedgerEvent {
    LedgerEvent::claim(
        Some(format!("0xclaim-{}-{}", user, cp)),
        Cursor::new(cp),
        TimeMs::new(cp * 1000),
        market(),
        Address::new(user.to_string()),
        lower,
        lower + 1_000,
        shares,
        payout,
    )
}

/// A mixed multi-user, multi-range sequence in stream order.
fn mixed_sequence() -> Vec<LedgerEvent> {
    vec![
        buy(1, "0xaaa", 90_000, 100, 50),
        buy(2, "0xbbb", 90_000, 200, 110),
        buy(3, "0xaaa", 91_000, 30, 12),
        sell(4, "0xaaa", 90_000, 40, 25),
        sell(5, "0xbbb", 90_000, 200, 95),
        buy(6, "0xaaa", 90_000, 10, 7),
        claim(7, "0xaaa", 91_000, 30, 30),
        // Over-sell straggler: ledger stays authoritative.
        sell(8, "0xccc", 92_000, 5, 3),
    ]
}

fn accounting_fields(p: &Position) -> (String, i64, i64, i64, i64, i64, i64, bool, String) {
    (
        p.user.as_str().to_string(),
        p.range_lower,
        p.total_shares,
        p.total_cost_basis,
        p.realized_pnl,
        p.total_shares_sold,
        p.total_proceeds,
        p.is_active,
        p.close_reason.as_str().to_string(),
    )
}

#[tokio::test]
async fn test_replay_matches_live_aggregate() {
    let (repo, _temp) = setup().await;

    for event in mixed_sequence() {
        repo.ingest_trade_event(&event).await.unwrap();
    }

    let mut live = repo.query_positions(None, Some(&market())).await.unwrap();
    let mut rebuilt = rebuild_positions(&repo, Some(&market())).await.unwrap();

    live.sort_by_key(|p| (p.user.clone(), p.range_lower));
    rebuilt.sort_by_key(|p| (p.user.clone(), p.range_lower));

    assert_eq!(live.len(), rebuilt.len());
    for (live_pos, rebuilt_pos) in live.iter().zip(rebuilt.iter()) {
        assert_eq!(
            accounting_fields(live_pos),
            accounting_fields(rebuilt_pos),
            "live and rebuilt state diverged for {}",
            live_pos.user
        );
    }
}

#[tokio::test]
async fn test_replay_equivalence_survives_duplicates() {
    let (repo, _temp) = setup().await;

    // Deliver the whole sequence twice: the log dedupes, so replay sees
    // each event once and still matches the live fold.
    for event in mixed_sequence().iter().chain(mixed_sequence().iter()) {
        repo.ingest_trade_event(event).await.unwrap();
    }

    let live = repo.query_positions(None, Some(&market())).await.unwrap();
    let rebuilt = rebuild_positions(&repo, Some(&market())).await.unwrap();
    assert_eq!(live.len(), rebuilt.len());

    let total_live_pnl: i64 = live.iter().map(|p| p.realized_pnl).sum();
    let total_rebuilt_pnl: i64 = rebuilt.iter().map(|p| p.realized_pnl).sum();
    assert_eq!(total_live_pnl, total_rebuilt_pnl);
}

#[tokio::test]
async fn test_reconcile_reports_clean_market() {
    let (repo, _temp) = setup().await;

    for event in mixed_sequence() {
        repo.ingest_trade_event(&event).await.unwrap();
    }
    // Settle live state the same way reconcile classifies.
    let engine = rangemark::engine::SettlementEngine::new(repo.clone(), None);
    engine.settle(&market(), 90_500).await.unwrap();

    let report = reconcile(&repo, &market(), 90_500).await.unwrap();
    assert_eq!(report.live_count, report.rebuilt_count);
    assert!(
        report.mismatches.is_empty(),
        "expected clean reconcile, got {:?}",
        report.mismatches
    );
}

#[tokio::test]
async fn test_reconcile_detects_tampered_live_row() {
    let (repo, _temp) = setup().await;

    for event in mixed_sequence() {
        repo.ingest_trade_event(&event).await.unwrap();
    }
    let engine = rangemark::engine::SettlementEngine::new(repo.clone(), None);
    engine.settle(&market(), 90_500).await.unwrap();

    // Corrupt one live aggregate row out-of-band.
    let mut pos = repo
        .get_position(&Address::new("0xaaa".to_string()), &market(), 90_000, 91_000)
        .await
        .unwrap()
        .unwrap();
    pos.realized_pnl += 1_000;
    repo.upsert_position(&pos).await.unwrap();

    let report = reconcile(&repo, &market(), 90_500).await.unwrap();
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].user, "0xaaa");
    assert_eq!(report.mismatches[0].range_lower, 90_000);
}

#[tokio::test]
async fn test_rebuild_and_store_repairs_live_state() {
    let (repo, _temp) = setup().await;

    for event in mixed_sequence() {
        repo.ingest_trade_event(&event).await.unwrap();
    }

    // Corrupt a live row, then recover from the log.
    let mut pos = repo
        .get_position(&Address::new("0xaaa".to_string()), &market(), 90_000, 91_000)
        .await
        .unwrap()
        .unwrap();
    pos.total_shares = 0;
    pos.realized_pnl = -999;
    repo.upsert_position(&pos).await.unwrap();

    let count = rebuild_and_store(&repo, Some(&market())).await.unwrap();
    assert!(count >= 1);

    let repaired = repo
        .get_position(&Address::new("0xaaa".to_string()), &market(), 90_000, 91_000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repaired.total_shares, 70);
    assert_eq!(repaired.total_cost_basis, 37);
    assert_eq!(repaired.realized_pnl, 5);
}

#[tokio::test]
async fn test_rebuild_scoped_to_market() {
    let (repo, _temp) = setup().await;

    repo.ingest_trade_event(&buy(1, "0xaaa", 90_000, 100, 50))
        .await
        .unwrap();
    let mut other_market = buy(2, "0xaaa", 90_000, 10, 5);
    other_market.market_id = MarketId::new("mkt-2".to_string());
    repo.ingest_trade_event(&other_market).await.unwrap();

    let rebuilt = rebuild_positions(&repo, Some(&market())).await.unwrap();
    assert_eq!(rebuilt.len(), 1);
    assert_eq!(rebuilt[0].total_shares, 100);

    let all = rebuild_positions(&repo, None).await.unwrap();
    assert_eq!(all.len(), 2);
}
