use crate::errors::ApiError;
use crate::models::{Judgment, Violation};
use chrono::{DateTime, Utc};
use gallows_ledger::{Article12Event, ComplianceLedger, LedgerTree};
use gallows_zk::types::BatchStats;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::str::FromStr;
use uuid::Uuid;

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str) -> Result<Db, ApiError> {
    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    Ok(SqlitePoolOptions::new().max_connections(5).connect_with(options).await?)
}

/// Single-connection in-memory database. Dropping the connection drops the data,
/// so it is never recycled.
pub async fn connect_in_memory() -> Result<Db, ApiError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // Events are append-only: nothing in this module updates or deletes them.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS chains (
  id TEXT PRIMARY KEY,
  tag TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
  chain_id TEXT NOT NULL,
  seq INTEGER NOT NULL,
  event_id TEXT NOT NULL,
  event_hash TEXT NOT NULL,
  event_json TEXT NOT NULL,
  PRIMARY KEY(chain_id, seq)
);

CREATE TABLE IF NOT EXISTS violations (
  id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  record_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS judgments (
  id TEXT PRIMARY KEY,
  seq INTEGER NOT NULL UNIQUE,
  issued_at TEXT NOT NULL,
  record_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attestations (
  id TEXT PRIMARY KEY,
  chain_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  event_count INTEGER NOT NULL,
  ledger_root TEXT NOT NULL,
  batch_size INTEGER NOT NULL,
  status TEXT NOT NULL,
  commitment_hex TEXT,
  stats_json TEXT,
  expires_at TEXT,
  error TEXT
);

CREATE TABLE IF NOT EXISTS batches (
  attestation_id TEXT NOT NULL,
  batch_index INTEGER NOT NULL,
  batch_commitment_hex TEXT NOT NULL,
  stats_json TEXT NOT NULL,
  proof_b64 TEXT NOT NULL,
  verified INTEGER NOT NULL,
  PRIMARY KEY(attestation_id, batch_index)
);
"#,
    )
    .execute(db)
    .await?;

    Ok(())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ApiError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|_| ApiError::Internal)?
        .with_timezone(&Utc))
}

async fn count(db: &Db, sql: &str) -> Result<u64, ApiError> {
    let row = sqlx::query(sql).fetch_one(db).await?;
    let c: i64 = row.get("c");
    Ok(c as u64)
}

// --- chains and events ---

/// Create the chain if it does not exist yet.
pub async fn ensure_chain(db: &Db, chain_id: &str) -> Result<(), ApiError> {
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
    sqlx::query(r#"INSERT OR IGNORE INTO chains (id, tag, created_at) VALUES (?, ?, ?)"#)
        .bind(chain_id)
        .bind(tag)
        .bind(Utc::now().to_rfc3339())
        .execute(db)
        .await?;
    Ok(())
}

/// Append an event and return its sequence number within the chain.
pub async fn append_event(db: &Db, chain_id: &str, event: &Article12Event, event_hash: &str) -> Result<u64, ApiError> {
    let event_json = serde_json::to_string(event)?;

    // The sequence number is allocated by the INSERT itself, so concurrent
    // writers cannot reuse one.
    let row = sqlx::query(
        r#"INSERT INTO events (chain_id, seq, event_id, event_hash, event_json)
           SELECT ?, COALESCE(MAX(seq) + 1, 0), ?, ?, ? FROM events WHERE chain_id = ?
           RETURNING seq"#,
    )
    .bind(chain_id)
    .bind(&event.event_id)
    .bind(event_hash)
    .bind(event_json)
    .bind(chain_id)
    .fetch_one(db)
    .await?;

    let seq: i64 = row.get(0);
    Ok(seq as u64)
}

/// Rebuild a chain's ledger from storage, optionally only its first `upto` events.
///
/// Stored hashes are checked against the recomputed ones.
pub async fn load_ledger(db: &Db, chain_id: &str, upto: Option<u64>) -> Result<Option<ComplianceLedger>, ApiError> {
    let chain = sqlx::query(r#"SELECT tag, created_at FROM chains WHERE id = ?"#)
        .bind(chain_id)
        .fetch_optional(db)
        .await?;

    let Some(chain) = chain else { return Ok(None); };
    let tag: String = chain.get(0);
    let created_at: String = chain.get(1);
    let created_at = parse_time(&created_at)?;

    let limit = upto.map(|n| n as i64).unwrap_or(-1);
    let rows = sqlx::query(
        r#"SELECT seq, event_hash, event_json FROM events
           WHERE chain_id = ?
           ORDER BY seq
           LIMIT ?"#,
    )
    .bind(chain_id)
    .bind(limit)
    .fetch_all(db)
    .await?;

    let mut ledger = ComplianceLedger::with_tag(chain_id, tag, created_at);
    for row in rows {
        let seq: i64 = row.get(0);
        let stored_hash: String = row.get(1);
        let event_json: String = row.get(2);

        let event: Article12Event = serde_json::from_str(&event_json)?;
        let index = ledger.append(event)?;

        if index != seq as u64 || ledger.event_hash(index) != Some(stored_hash.as_str()) {
            tracing::error!(%chain_id, seq, "stored event does not match its recorded hash");
            return Err(ApiError::Internal);
        }
    }

    Ok(Some(ledger))
}

/// Load only a chain's stored event hashes and build its Merkle tree.
///
/// Event bodies are not parsed or rehashed; [`load_ledger`] does that.
pub async fn load_tree(db: &Db, chain_id: &str, upto: Option<u64>) -> Result<Option<LedgerTree>, ApiError> {
    let exists = sqlx::query(r#"SELECT 1 FROM chains WHERE id = ?"#)
        .bind(chain_id)
        .fetch_optional(db)
        .await?;
    if exists.is_none() {
        return Ok(None);
    }

    let limit = upto.map(|n| n as i64).unwrap_or(-1);
    let rows = sqlx::query(r#"SELECT event_hash FROM events WHERE chain_id = ? ORDER BY seq LIMIT ?"#)
        .bind(chain_id)
        .bind(limit)
        .fetch_all(db)
        .await?;

    let mut tree = LedgerTree::new();
    for row in rows {
        let event_hash: String = row.get(0);
        tree.push_hash(event_hash).map_err(|e| {
            tracing::error!(%chain_id, error = %e, "stored event hash is malformed");
            ApiError::Internal
        })?;
    }

    Ok(Some(tree))
}

pub async fn count_chains(db: &Db) -> Result<u64, ApiError> {
    count(db, r#"SELECT COUNT(*) AS c FROM chains"#).await
}

// --- red list ---

pub async fn insert_violation(db: &Db, violation: &Violation) -> Result<(), ApiError> {
    sqlx::query(r#"INSERT INTO violations (id, created_at, record_json) VALUES (?, ?, ?)"#)
        .bind(&violation.violation_id)
        .bind(violation.timestamp.to_rfc3339())
        .bind(serde_json::to_string(violation)?)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn list_violations(db: &Db) -> Result<Vec<Violation>, ApiError> {
    let rows = sqlx::query(r#"SELECT record_json FROM violations ORDER BY rowid"#)
        .fetch_all(db)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let json: String = row.get(0);
        out.push(serde_json::from_str(&json)?);
    }
    Ok(out)
}

pub async fn count_violations(db: &Db) -> Result<u64, ApiError> {
    count(db, r#"SELECT COUNT(*) AS c FROM violations"#).await
}

// --- judgments ---

fn precedent_for(issued_at: &DateTime<Utc>, seq: i64) -> String {
    format!("ATA-{}-{:04}", issued_at.format("%Y"), seq)
}

/// Store a ruling, assigning its precedent number `ATA-{year}-{n:04}`.
pub async fn insert_judgment(db: &Db, mut judgment: Judgment) -> Result<Judgment, ApiError> {
    // The number is allocated by the INSERT itself, as for event sequence
    // numbers; the stored record leaves `precedent` for the reader to fill.
    judgment.precedent = String::new();
    let row = sqlx::query(
        r#"INSERT INTO judgments (id, seq, issued_at, record_json)
           SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ? FROM judgments
           RETURNING seq"#,
    )
    .bind(&judgment.judgment_id)
    .bind(judgment.issued_at.to_rfc3339())
    .bind(serde_json::to_string(&judgment)?)
    .fetch_one(db)
    .await?;

    let seq: i64 = row.get(0);
    judgment.precedent = precedent_for(&judgment.issued_at, seq);
    Ok(judgment)
}

pub async fn list_judgments(db: &Db) -> Result<Vec<Judgment>, ApiError> {
    let rows = sqlx::query(r#"SELECT seq, record_json FROM judgments ORDER BY seq"#)
        .fetch_all(db)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let seq: i64 = row.get(0);
        let json: String = row.get(1);
        let mut judgment: Judgment = serde_json::from_str(&json)?;
        judgment.precedent = precedent_for(&judgment.issued_at, seq);
        out.push(judgment);
    }
    Ok(out)
}

pub async fn count_judgments(db: &Db) -> Result<u64, ApiError> {
    count(db, r#"SELECT COUNT(*) AS c FROM judgments"#).await
}

// --- attestations ---

pub struct AttestationRow {
    pub chain_id: String,
    pub created_at: DateTime<Utc>,
    pub event_count: u64,
    pub ledger_root: String,
    pub batch_size: u64,
    pub status: String,
    pub commitment_hex: Option<String>,
    pub stats: Option<BatchStats>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub async fn insert_attestation(
    db: &Db,
    attestation_id: Uuid,
    chain_id: &str,
    event_count: u64,
    ledger_root: &str,
    batch_size: u64,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"INSERT INTO attestations (id, chain_id, created_at, event_count, ledger_root, batch_size, status)
           VALUES (?, ?, ?, ?, ?, ?, 'generating')"#,
    )
    .bind(attestation_id.to_string())
    .bind(chain_id)
    .bind(Utc::now().to_rfc3339())
    .bind(event_count as i64)
    .bind(ledger_root)
    .bind(batch_size as i64)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn set_attestation_ready(
    db: &Db,
    attestation_id: Uuid,
    commitment_hex: &str,
    stats: &BatchStats,
    expires_at: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"UPDATE attestations
           SET status = 'ready', commitment_hex = ?, stats_json = ?, expires_at = ?, error = NULL
           WHERE id = ?"#,
    )
    .bind(commitment_hex)
    .bind(serde_json::to_string(stats)?)
    .bind(expires_at.to_rfc3339())
    .bind(attestation_id.to_string())
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_attestation_failed(db: &Db, attestation_id: Uuid, error: &str) -> Result<(), ApiError> {
    sqlx::query(r#"UPDATE attestations SET status = 'failed', error = ? WHERE id = ?"#)
        .bind(error)
        .bind(attestation_id.to_string())
        .execute(db)
        .await?;
    Ok(())
}

/// Mark attestations whose job died with a previous process as failed.
pub async fn fail_interrupted_attestations(db: &Db) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"UPDATE attestations SET status = 'failed', error = 'interrupted by restart'
           WHERE status = 'generating'"#,
    )
    .execute(db)
    .await?;
    Ok(res.rows_affected())
}

pub async fn get_attestation(db: &Db, attestation_id: Uuid) -> Result<Option<AttestationRow>, ApiError> {
    let row = sqlx::query(
        r#"SELECT chain_id, created_at, event_count, ledger_root, batch_size, status,
                  commitment_hex, stats_json, expires_at, error
           FROM attestations WHERE id = ?"#,
    )
    .bind(attestation_id.to_string())
    .fetch_optional(db)
    .await?;

    let Some(row) = row else { return Ok(None); };

    let created_at: String = row.get(1);
    let event_count: i64 = row.get(2);
    let batch_size: i64 = row.get(4);
    let stats_json: Option<String> = row.get(7);
    let expires_at: Option<String> = row.get(8);

    Ok(Some(AttestationRow {
        chain_id: row.get(0),
        created_at: parse_time(&created_at)?,
        event_count: event_count as u64,
        ledger_root: row.get(3),
        batch_size: batch_size as u64,
        status: row.get(5),
        commitment_hex: row.get(6),
        stats: stats_json.map(|s| serde_json::from_str(&s)).transpose()?,
        expires_at: expires_at.map(|s| parse_time(&s)).transpose()?,
        error: row.get(9),
    }))
}

pub async fn insert_batch(
    db: &Db,
    attestation_id: Uuid,
    batch_index: u64,
    batch_commitment_hex: &str,
    stats: &BatchStats,
    proof_b64: &str,
    verified: bool,
) -> Result<(), ApiError> {
    let stats_json = serde_json::to_string(stats)?;

    sqlx::query(
        r#"INSERT OR REPLACE INTO batches
           (attestation_id, batch_index, batch_commitment_hex, stats_json, proof_b64, verified)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(attestation_id.to_string())
    .bind(batch_index as i64)
    .bind(batch_commitment_hex)
    .bind(stats_json)
    .bind(proof_b64)
    .bind(if verified { 1i64 } else { 0i64 })
    .execute(db)
    .await?;

    Ok(())
}

pub async fn count_batches_done(db: &Db, attestation_id: Uuid) -> Result<u64, ApiError> {
    let row = sqlx::query(r#"SELECT COUNT(*) AS c FROM batches WHERE attestation_id = ?"#)
        .bind(attestation_id.to_string())
        .fetch_one(db)
        .await?;
    let c: i64 = row.get("c");
    Ok(c as u64)
}

pub async fn list_batches(
    db: &Db,
    attestation_id: Uuid,
    offset: u64,
    limit: u64,
    include_proof: bool,
) -> Result<Vec<(u64, String, BatchStats, bool, Option<String>)>, ApiError> {
    let rows = sqlx::query(
        r#"SELECT batch_index, batch_commitment_hex, stats_json, verified, proof_b64
           FROM batches
           WHERE attestation_id = ?
           ORDER BY batch_index
           LIMIT ? OFFSET ?"#,
    )
    .bind(attestation_id.to_string())
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(db)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let batch_index: i64 = row.get(0);
        let commitment: String = row.get(1);
        let stats_json: String = row.get(2);
        let verified: i64 = row.get(3);
        let proof_b64: String = row.get(4);

        let stats: BatchStats = serde_json::from_str(&stats_json)?;

        out.push((
            batch_index as u64,
            commitment,
            stats,
            verified == 1,
            if include_proof { Some(proof_b64) } else { None },
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallows_ledger::{ComplianceStatus, EventDraft};

    async fn test_db() -> Db {
        let db = connect_in_memory().await.unwrap();
        init_schema(&db).await.unwrap();
        db
    }

    fn event(model: &str) -> Article12Event {
        Article12Event::from_draft(
            EventDraft {
                model_id: model.to_string(),
                input_data: "in".to_string(),
                output_data: "out".to_string(),
                compliance_status: ComplianceStatus::Pass,
                ..EventDraft::default()
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn sequence_numbers_are_per_chain() {
        let db = test_db().await;
        ensure_chain(&db, "chain-a").await.unwrap();
        ensure_chain(&db, "chain-b").await.unwrap();
        ensure_chain(&db, "chain-a").await.unwrap();
        assert_eq!(count_chains(&db).await.unwrap(), 2);

        for expected in 0..3 {
            let e = event("m");
            let seq = append_event(&db, "chain-a", &e, &e.event_hash().unwrap()).await.unwrap();
            assert_eq!(seq, expected);
        }
        let e = event("m");
        assert_eq!(append_event(&db, "chain-b", &e, &e.event_hash().unwrap()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ledger_round_trips_through_storage() {
        let db = test_db().await;
        ensure_chain(&db, "chain-a").await.unwrap();

        let mut hashes = Vec::new();
        for i in 0..5 {
            let e = event(&format!("m{i}"));
            let h = e.event_hash().unwrap();
            append_event(&db, "chain-a", &e, &h).await.unwrap();
            hashes.push(h);
        }

        let ledger = load_ledger(&db, "chain-a", None).await.unwrap().unwrap();
        assert_eq!(ledger.len(), 5);
        assert_eq!(ledger.event_hash(4), Some(hashes[4].as_str()));

        let prefix = load_ledger(&db, "chain-a", Some(3)).await.unwrap().unwrap();
        assert_eq!(prefix.len(), 3);
        assert_eq!(prefix.root_hex(), ledger.consistency_proof(3).unwrap().old_root);

        assert!(load_ledger(&db, "chain-missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tree_loads_from_stored_hashes_only() {
        let db = test_db().await;
        ensure_chain(&db, "chain-a").await.unwrap();
        for i in 0..4 {
            let e = event(&format!("m{i}"));
            append_event(&db, "chain-a", &e, &e.event_hash().unwrap()).await.unwrap();
        }

        let ledger = load_ledger(&db, "chain-a", None).await.unwrap().unwrap();
        let tree = load_tree(&db, "chain-a", None).await.unwrap().unwrap();
        assert_eq!(tree.root_hex(), ledger.root_hex());

        let prefix = load_tree(&db, "chain-a", Some(2)).await.unwrap().unwrap();
        assert_eq!(prefix.len(), 2);
        assert_eq!(prefix.root_hex(), ledger.consistency_proof(2).unwrap().old_root);

        // Bodies are not read, so an unparseable one does not matter here.
        sqlx::query("UPDATE events SET event_json = 'not json' WHERE seq = 3")
            .execute(&db)
            .await
            .unwrap();
        assert_eq!(load_tree(&db, "chain-a", None).await.unwrap().unwrap().root_hex(), tree.root_hex());
        assert!(load_ledger(&db, "chain-a", None).await.is_err());

        assert!(load_tree(&db, "chain-missing", None).await.unwrap().is_none());
    }

    fn judgment(id: usize) -> Judgment {
        Judgment {
            judgment_id: format!("JUD-{id:08}"),
            article: 14,
            question: "q".to_string(),
            ruling: "r".to_string(),
            precedent_cases: Vec::new(),
            precedent: String::new(),
            issued_at: Utc::now(),
            authority: "Digital Gallows".to_string(),
            status: "BINDING".to_string(),
        }
    }

    #[tokio::test]
    async fn concurrent_rulings_get_distinct_precedents() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("rulings.sqlite").to_string_lossy());
        let db = connect(&url).await.unwrap();
        init_schema(&db).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move { insert_judgment(&db, judgment(i)).await })
            })
            .collect();

        let mut precedents = Vec::new();
        for handle in handles {
            precedents.push(handle.await.unwrap().unwrap().precedent);
        }
        precedents.sort();
        precedents.dedup();
        assert_eq!(precedents.len(), 20);

        let listed = list_judgments(&db).await.unwrap();
        assert_eq!(listed.len(), 20);
        assert!(listed[0].precedent.ends_with("-0001"));
        assert!(listed[19].precedent.ends_with("-0020"));
    }

    #[tokio::test]
    async fn interrupted_attestations_are_failed_on_startup() {
        let db = test_db().await;
        let running = Uuid::new_v4();
        let done = Uuid::new_v4();
        insert_attestation(&db, running, "chain-a", 3, &"00".repeat(32), 64).await.unwrap();
        insert_attestation(&db, done, "chain-a", 3, &"00".repeat(32), 64).await.unwrap();
        set_attestation_ready(&db, done, "ab", &BatchStats::zero(), Utc::now()).await.unwrap();

        assert_eq!(fail_interrupted_attestations(&db).await.unwrap(), 1);

        let row = get_attestation(&db, running).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error.as_deref(), Some("interrupted by restart"));
        assert_eq!(get_attestation(&db, done).await.unwrap().unwrap().status, "ready");
    }

    #[tokio::test]
    async fn tampered_event_is_detected() {
        let db = test_db().await;
        ensure_chain(&db, "chain-a").await.unwrap();
        let e = event("m");
        append_event(&db, "chain-a", &e, &"00".repeat(32)).await.unwrap();

        assert!(matches!(load_ledger(&db, "chain-a", None).await, Err(ApiError::Internal)));
    }
}
