use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::history::{EventKind, HistoryEvent};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history_events (
                seq INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                summary TEXT NOT NULL,
                title TEXT NOT NULL,
                episode INTEGER,
                filename TEXT,
                recorded_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Replaces the stored history with `events`, oldest first.
    pub fn replace_history<'a>(
        &self,
        events: impl IntoIterator<Item = &'a HistoryEvent>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM history_events", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO history_events (seq, kind, summary, title, episode, filename, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for (seq, event) in events.into_iter().enumerate() {
                stmt.execute(params![
                    seq as i64,
                    event.kind.as_str(),
                    event.summary,
                    event.title,
                    event.episode,
                    event.filename,
                    event.recorded_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads up to `limit` most recent events, oldest first. Rows with an unknown kind
    /// are skipped and counted.
    pub fn load_history(&self, limit: usize) -> Result<(Vec<HistoryEvent>, usize)> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, summary, title, episode, filename, recorded_at FROM history_events ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<u32>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        let mut skipped = 0;
        for row in rows {
            let (kind, summary, title, episode, filename, recorded_at) = row?;
            let Some(kind) = EventKind::parse(&kind) else {
                skipped += 1;
                continue;
            };
            out.push(HistoryEvent {
                kind,
                summary,
                title,
                episode,
                filename,
                recorded_at,
            });
        }
        out.reverse();
        Ok((out, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_round_trips_in_order() {
        let db = Database::open_in_memory().expect("open");
        db.migrate().expect("migrate");
        let events = vec![
            HistoryEvent::new(EventKind::Search, "naruto", "Searched naruto"),
            HistoryEvent::new(EventKind::DownloadEpisode, "Naruto", "Downloaded Naruto 5")
                .with_episode(5)
                .with_filename("Naruto Episode 5.mp4"),
        ];

        db.replace_history(&events).expect("store");
        let (loaded, skipped) = db.load_history(10).expect("load");

        assert_eq!(loaded, events);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn load_history_skips_unknown_kinds() {
        let db = Database::open_in_memory().expect("open");
        db.migrate().expect("migrate");
        db.conn
            .execute(
                "INSERT INTO history_events (seq, kind, summary, title, recorded_at) VALUES (0, 'bogus', 's', 't', 'now')",
                [],
            )
            .expect("insert");

        let (loaded, skipped) = db.load_history(10).expect("load");
        assert!(loaded.is_empty());
        assert_eq!(skipped, 1);
    }
}
