use crate::domain::metrics::PortfolioMetrics;
use crate::domain::portfolio::{Holding, Portfolio, PortfolioSnapshot};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Append one snapshot for a user. The history is append-only; nothing here
/// updates or deletes existing rows.
pub async fn append_snapshot(
    pool: &sqlx::PgPool,
    user_id: &str,
    portfolio: &Portfolio,
    metrics: &PortfolioMetrics,
) -> anyhow::Result<(Uuid, DateTime<Utc>)> {
    let metrics_json = serde_json::to_value(metrics).context("failed to serialize metrics")?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let (snapshot_id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO portfolio_snapshots (user_id, cash_weight, metrics) \
         VALUES ($1, $2, $3) \
         RETURNING id, created_at",
    )
    .bind(user_id)
    .bind(portfolio.cash_weight)
    .bind(metrics_json)
    .fetch_one(&mut *tx)
    .await
    .context("insert portfolio_snapshots failed")?;

    for holding in &portfolio.holdings {
        sqlx::query(
            "INSERT INTO snapshot_holdings (snapshot_id, ticker, weight) VALUES ($1, $2, $3)",
        )
        .bind(snapshot_id)
        .bind(&holding.ticker)
        .bind(holding.weight)
        .execute(&mut *tx)
        .await
        .context("insert snapshot_holdings failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok((snapshot_id, created_at))
}

/// Snapshots for a user, newest first.
pub async fn list_snapshots(
    pool: &sqlx::PgPool,
    user_id: &str,
) -> anyhow::Result<Vec<PortfolioSnapshot>> {
    let rows: Vec<(Uuid, DateTime<Utc>, f64, serde_json::Value)> = sqlx::query_as(
        "SELECT id, created_at, cash_weight, metrics \
         FROM portfolio_snapshots \
         WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("select portfolio_snapshots failed")?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|(id, ..)| *id).collect();
    let holding_rows: Vec<(Uuid, String, f64)> = sqlx::query_as(
        "SELECT snapshot_id, ticker, weight \
         FROM snapshot_holdings \
         WHERE snapshot_id = ANY($1) \
         ORDER BY weight DESC, ticker ASC",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .context("select snapshot_holdings failed")?;

    let mut by_snapshot: HashMap<Uuid, Vec<Holding>> = HashMap::new();
    for (snapshot_id, ticker, weight) in holding_rows {
        by_snapshot
            .entry(snapshot_id)
            .or_default()
            .push(Holding { ticker, weight });
    }

    let mut snapshots = Vec::with_capacity(rows.len());
    for (id, created_at, cash_weight, metrics_json) in rows {
        let metrics = serde_json::from_value::<PortfolioMetrics>(metrics_json)
            .with_context(|| format!("stored metrics for snapshot {id} failed to decode"))?;
        snapshots.push(PortfolioSnapshot {
            snapshot_id: id,
            user_id: user_id.to_string(),
            created_at,
            holdings: by_snapshot.remove(&id).unwrap_or_default(),
            cash_weight,
            metrics,
        });
    }

    Ok(snapshots)
}
