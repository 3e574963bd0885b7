use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::Database;

/// One prompt/response pair sent to the vision model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
    #[serde(rename = "execution_time_ms")]
    pub latency_ms: Option<i64>,
    /// Camera whose image produced the response.
    pub source_id: Option<String>,
}

const LEDGER_COLUMNS: &str = "id, timestamp, prompt, response, execution_time_ms, source_id";

fn row_to_ledger_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        prompt: row.get(2)?,
        response: row.get(3)?,
        latency_ms: row.get(4)?,
        source_id: row.get(5)?,
    })
}

impl Database {
    /// Most recent ledger rows, newest first.
    pub fn recent_ledger_entries(&self, limit: u32) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM llm_analytics
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#
        ))?;
        let entries = stmt
            .query_map([limit], row_to_ledger_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Newest rows produced by `prompt`, optionally for one source only.
    pub fn ledger_entries_for_prompt(
        &self,
        prompt: &str,
        source_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM llm_analytics
            WHERE prompt = ?1 AND (?2 IS NULL OR source_id = ?2)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?3
            "#
        ))?;
        let entries = stmt
            .query_map(params![prompt, source_id, limit], row_to_ledger_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn get_ledger_entry(&self, id: i64) -> Result<Option<LedgerEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {LEDGER_COLUMNS} FROM llm_analytics WHERE id = ?1"),
                [id],
                row_to_ledger_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn count_ledger_entries(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM llm_analytics", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[test]
    fn test_entries_for_prompt_filters_prompt_and_source() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.persist_ledger_entry("advise", "a1", None, Some("cam-1")).unwrap();
        db.persist_ledger_entry("count cars", "c1", None, Some("cam-1")).unwrap();
        let newest = db.persist_ledger_entry("advise", "a2", None, Some("cam-2")).unwrap();

        let all = db.ledger_entries_for_prompt("advise", None, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newest);
        assert!(all.iter().all(|e| e.prompt == "advise"));

        let cam1 = db.ledger_entries_for_prompt("advise", Some("cam-1"), 10).unwrap();
        assert_eq!(cam1.len(), 1);
        assert_eq!(cam1[0].response, "a1");
        assert_eq!(cam1[0].source_id.as_deref(), Some("cam-1"));

        assert!(db.ledger_entries_for_prompt("advise", Some("cam-9"), 10).unwrap().is_empty());
    }
}
