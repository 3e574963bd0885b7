//! Writes analysis results back to storage.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::params;

use crate::db::{format_timestamp, Database};

impl Database {
    /// Store `text` as the analysis of sample `sample_id`.
    ///
    /// Runs in its own transaction; a failed write is rolled back and the
    /// error returned. A missing sample is an error.
    pub fn persist_analysis(&self, sample_id: i64, text: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE timeseries_analytics SET analysis_result = ?1 WHERE id = ?2",
            params![text, sample_id],
        )?;
        if updated == 0 {
            tx.rollback()?;
            return Err(anyhow!("Sample {} not found", sample_id));
        }

        tx.commit()?;
        Ok(())
    }

    /// Append one prompt/response pair to the ledger and return its id.
    pub fn persist_ledger_entry(
        &self,
        prompt: &str,
        response: &str,
        latency_ms: Option<i64>,
        source_id: Option<&str>,
    ) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO llm_analytics (timestamp, prompt, response, execution_time_ms, source_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![format_timestamp(Utc::now()), prompt, response, latency_ms, source_id],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }
}
