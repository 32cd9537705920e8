//! SQLite stats backend
//!
//! Tables (see `/sql/`):
//! - `campaign_stats` / `campaign_screens` - UPSERT on campaign_id, INSERT OR IGNORE for set members
//! - `screen_stats` / `screen_campaigns` - same shape per screen
//!
//! Listings order by count DESC then rowid ASC; rowid survives
//! `ON CONFLICT DO UPDATE`, so it doubles as first-seen order.

use super::error::StoreError;
use super::store::StatsBackend;
use super::types::{CampaignDelta, CampaignRecord, QueuedEvent, ScreenDelta, ScreenRecord};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in filename order and executes
/// them. Every file must use "IF NOT EXISTS" so the run is idempotent.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Schema directory not found: {}", schema_dir),
        )));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    // 00_, 01_, 02_ ... ordering
    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);

        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;

        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// SQLite implementation of `StatsBackend`
pub struct SqliteStatsBackend {
    conn: Mutex<Connection>,
}

impl SqliteStatsBackend {
    /// Open (or create) the database at `db_path` and bring its schema up to date
    pub fn open(db_path: &str, schema_dir: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;

        log::info!("✅ SQLite stats backend opened: {}", db_path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn write_campaign(
        conn: &Connection,
        campaign_id: &str,
        delta: &CampaignDelta,
        now: i64,
    ) -> Result<(), StoreError> {
        conn.execute(
            r#"
            INSERT INTO campaign_stats (campaign_id, play_count, last_played, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(campaign_id) DO UPDATE SET
                play_count = play_count + excluded.play_count,
                last_played = excluded.last_played,
                updated_at = excluded.updated_at
            "#,
            params![campaign_id, delta.plays as i64, delta.last_played, now],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO campaign_screens (campaign_id, screen_id) VALUES (?1, ?2)",
            params![campaign_id, delta.screen_id],
        )?;
        Ok(())
    }

    fn write_screen(
        conn: &Connection,
        screen_id: &str,
        delta: &ScreenDelta,
        now: i64,
    ) -> Result<(), StoreError> {
        conn.execute(
            r#"
            INSERT INTO screen_stats (screen_id, impression_count, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(screen_id) DO UPDATE SET
                impression_count = impression_count + excluded.impression_count,
                updated_at = excluded.updated_at
            "#,
            params![screen_id, delta.impressions as i64, now],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO screen_campaigns (screen_id, campaign_id) VALUES (?1, ?2)",
            params![screen_id, delta.campaign_id],
        )?;
        Ok(())
    }

    /// Load a whole membership table grouped by owner key
    fn load_members(
        conn: &Connection,
        sql: &str,
    ) -> Result<HashMap<String, BTreeSet<String>>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut members: HashMap<String, BTreeSet<String>> = HashMap::new();
        for row in rows {
            let (owner, member) = row?;
            members.entry(owner).or_default().insert(member);
        }
        Ok(members)
    }

    fn load_member_set(conn: &Connection, sql: &str, key: &str) -> Result<BTreeSet<String>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;
        let mut set = BTreeSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }
}

#[async_trait]
impl StatsBackend for SqliteStatsBackend {
    async fn upsert_campaign(
        &self,
        campaign_id: &str,
        delta: &CampaignDelta,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::write_campaign(&conn, campaign_id, delta, chrono::Utc::now().timestamp())
    }

    async fn upsert_screen(&self, screen_id: &str, delta: &ScreenDelta) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::write_screen(&conn, screen_id, delta, chrono::Utc::now().timestamp())
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRecord>, StoreError> {
        let conn = self.lock()?;
        let mut screens = Self::load_members(
            &conn,
            "SELECT campaign_id, screen_id FROM campaign_screens",
        )?;

        let mut stmt = conn.prepare(
            "SELECT campaign_id, play_count, last_played FROM campaign_stats
             ORDER BY play_count DESC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut campaigns = Vec::new();
        for row in rows {
            let (campaign_id, play_count, last_played) = row?;
            let screen_ids = screens.remove(&campaign_id).unwrap_or_default();
            campaigns.push(CampaignRecord {
                campaign_id,
                play_count: play_count.max(0) as u64,
                screen_ids,
                last_played,
            });
        }
        Ok(campaigns)
    }

    async fn list_screens(&self) -> Result<Vec<ScreenRecord>, StoreError> {
        let conn = self.lock()?;
        let mut campaigns = Self::load_members(
            &conn,
            "SELECT screen_id, campaign_id FROM screen_campaigns",
        )?;

        let mut stmt = conn.prepare(
            "SELECT screen_id, impression_count FROM screen_stats
             ORDER BY impression_count DESC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut screens = Vec::new();
        for row in rows {
            let (screen_id, impression_count) = row?;
            let campaign_ids = campaigns.remove(&screen_id).unwrap_or_default();
            screens.push(ScreenRecord {
                screen_id,
                impression_count: impression_count.max(0) as u64,
                campaign_ids,
            });
        }
        Ok(screens)
    }

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT play_count, last_played FROM campaign_stats WHERE campaign_id = ?1",
                [campaign_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let Some((play_count, last_played)) = row else {
            return Ok(None);
        };

        let screen_ids = Self::load_member_set(
            &conn,
            "SELECT screen_id FROM campaign_screens WHERE campaign_id = ?1",
            campaign_id,
        )?;

        Ok(Some(CampaignRecord {
            campaign_id: campaign_id.to_string(),
            play_count: play_count.max(0) as u64,
            screen_ids,
            last_played,
        }))
    }

    async fn find_screen(&self, screen_id: &str) -> Result<Option<ScreenRecord>, StoreError> {
        let conn = self.lock()?;
        let impression_count = conn
            .query_row(
                "SELECT impression_count FROM screen_stats WHERE screen_id = ?1",
                [screen_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        let Some(impression_count) = impression_count else {
            return Ok(None);
        };

        let campaign_ids = Self::load_member_set(
            &conn,
            "SELECT campaign_id FROM screen_campaigns WHERE screen_id = ?1",
            screen_id,
        )?;

        Ok(Some(ScreenRecord {
            screen_id: screen_id.to_string(),
            impression_count: impression_count.max(0) as u64,
            campaign_ids,
        }))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "DELETE FROM campaign_screens;
             DELETE FROM campaign_stats;
             DELETE FROM screen_campaigns;
             DELETE FROM screen_stats;",
        )?;
        log::info!("🧹 Cleared SQLite stats tables");
        Ok(())
    }

    /// Both upserts in a single transaction
    async fn apply_event(&self, event: &QueuedEvent) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction()?;
        Self::write_campaign(&tx, event.campaign_id(), &CampaignDelta::from(event), now)?;
        Self::write_screen(&tx, event.screen_id(), &ScreenDelta::from(event), now)?;
        tx.commit()?;

        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}
