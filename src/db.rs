// 🗄️ SQLite persistence - validated records, aggregated groups, audit events
//
// Artifact tables hold exactly one run: each run replaces them inside a
// single transaction. The events table is append-only.

use crate::error::Result;
use crate::records::{AggregatedGroup, CanonicalExpenseRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Event for the audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactTable {
    ValidatedExpenses,
    AggregatedExpenses,
    Events,
}

impl ArtifactTable {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactTable::ValidatedExpenses => "validated_expenses",
            ArtifactTable::AggregatedExpenses => "aggregated_expenses",
            ArtifactTable::Events => "events",
        }
    }
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS validated_expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            registry_id TEXT,
            tax_id TEXT,
            legal_name TEXT,
            year TEXT,
            quarter TEXT,
            expense_value REAL NOT NULL,
            suspicious_value_flag INTEGER NOT NULL,
            duplicate_flag INTEGER NOT NULL,
            missing_registry_flag INTEGER NOT NULL,
            invalid_tax_id_flag INTEGER NOT NULL,
            invalid_name_flag INTEGER NOT NULL,
            modality TEXT,
            state_code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregated_expenses (
            rank INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            legal_name TEXT,
            state_code TEXT,
            total_expense REAL NOT NULL,
            mean_expense REAL NOT NULL,
            std_dev_expense REAL,
            record_count INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_validated_registry ON validated_expenses(registry_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Replace both artifact tables with this run's output, all or nothing.
/// Returns (validated rows, aggregated rows).
pub fn replace_artifacts(
    conn: &mut Connection,
    run_id: &str,
    records: &[CanonicalExpenseRecord],
    groups: &[AggregatedGroup],
) -> Result<(usize, usize)> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM validated_expenses", [])?;
    tx.execute("DELETE FROM aggregated_expenses", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO validated_expenses (
                run_id, fingerprint, registry_id, tax_id, legal_name, year, quarter,
                expense_value, suspicious_value_flag, duplicate_flag, missing_registry_flag,
                invalid_tax_id_flag, invalid_name_flag, modality, state_code
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;

        for r in records {
            stmt.execute(params![
                run_id,
                r.fingerprint(),
                r.registry_id,
                r.tax_id,
                r.legal_name,
                r.year,
                r.quarter,
                r.expense_value,
                r.suspicious_value_flag,
                r.duplicate_flag,
                r.missing_registry_flag,
                r.invalid_tax_id_flag,
                r.invalid_name_flag,
                r.modality,
                r.state_code,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO aggregated_expenses (
                rank, run_id, legal_name, state_code, total_expense, mean_expense,
                std_dev_expense, record_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for (rank, g) in groups.iter().enumerate() {
            stmt.execute(params![
                rank as i64 + 1,
                run_id,
                g.legal_name,
                g.state_code,
                g.total_expense,
                g.mean_expense,
                g.std_dev_expense,
                g.record_count as i64,
            ])?;
        }
    }

    tx.commit()?;
    info!(
        validated = records.len(),
        aggregated = groups.len(),
        "Artifacts stored in SQLite"
    );

    Ok((records.len(), groups.len()))
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events of one type, oldest first
pub fn get_events(conn: &Connection, event_type: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![event_type], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn verify_count(conn: &Connection, table: ArtifactTable) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record(registry_id: &str, value: f64) -> CanonicalExpenseRecord {
        let mut r = CanonicalExpenseRecord::new(
            Some(registry_id.to_string()),
            Some("11222333000181".to_string()),
            Some("Operadora A".to_string()),
            Some("2025".to_string()),
            Some("1T".to_string()),
            value,
        );
        r.state_code = Some("SP".to_string());
        r
    }

    fn create_test_group(name: &str, total: f64) -> AggregatedGroup {
        AggregatedGroup {
            legal_name: Some(name.to_string()),
            state_code: Some("SP".to_string()),
            total_expense: total,
            mean_expense: total,
            std_dev_expense: None,
            record_count: 1,
        }
    }

    #[test]
    fn test_replace_artifacts_twice_keeps_one_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let records = vec![create_test_record("1", 10.0), create_test_record("2", 20.0)];
        let groups = vec![create_test_group("Operadora A", 30.0)];

        replace_artifacts(&mut conn, "run-1", &records, &groups).unwrap();
        replace_artifacts(&mut conn, "run-2", &records[..1], &groups).unwrap();

        assert_eq!(verify_count(&conn, ArtifactTable::ValidatedExpenses).unwrap(), 1);
        assert_eq!(verify_count(&conn, ArtifactTable::AggregatedExpenses).unwrap(), 1);

        let run_id: String = conn
            .query_row("SELECT DISTINCT run_id FROM validated_expenses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(run_id, "run-2");
    }

    #[test]
    fn test_null_std_dev_stored_as_null() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        replace_artifacts(&mut conn, "run", &[], &[create_test_group("A", 5.0)]).unwrap();

        let std_dev: Option<f64> = conn
            .query_row("SELECT std_dev_expense FROM aggregated_expenses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(std_dev, None);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "run_completed",
            "run",
            "run-123",
            serde_json::json!({"records": 2}),
            "test_actor",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events(&conn, "run_completed").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, "run-123");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["records"], 2);
        assert_eq!(verify_count(&conn, ArtifactTable::Events).unwrap(), 1);
    }

    #[test]
    fn test_open_database_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db").join("despesas.db");

        let conn = open_database(&path).unwrap();
        assert!(path.exists());
        assert_eq!(verify_count(&conn, ArtifactTable::Events).unwrap(), 0);
    }
}
