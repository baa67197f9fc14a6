//! 结果存储 - 基础设施层
//!
//! 唯一持有 SQLite 连接的地方。四张表：
//! - `crawler_logs`：批次，`status = 'running'` 同时充当互斥标志
//! - `district_query_results`：每个行政区一行，随批次级联删除
//! - `household_records`：门牌资料，批次删除后 `batch_id` 置空，资料保留
//! - `email_address`：通知收件人

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, FixedOffset};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{
    BatchId, BatchRun, BatchStatus, DistrictQueryResult, HouseholdRecord, NotificationRecipient,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS crawler_logs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    api_endpoint    TEXT    NOT NULL,
    start_time      TEXT    NOT NULL,
    end_time        TEXT,
    records_fetched INTEGER NOT NULL DEFAULT 0,
    status          TEXT    NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
    error_message   TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_crawler_logs_single_running
    ON crawler_logs(status) WHERE status = 'running';

CREATE TABLE IF NOT EXISTS district_query_results (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id      INTEGER NOT NULL REFERENCES crawler_logs(id) ON DELETE CASCADE,
    city_name     TEXT    NOT NULL,
    district_code TEXT    NOT NULL,
    district_name TEXT    NOT NULL,
    record_count  INTEGER NOT NULL DEFAULT 0,
    status        TEXT    NOT NULL CHECK (status IN ('success', 'failed', 'no_data')),
    error_message TEXT,
    queried_at    TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_district_results_batch ON district_query_results(batch_id);

CREATE TABLE IF NOT EXISTS household_records (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id       INTEGER REFERENCES crawler_logs(id) ON DELETE SET NULL,
    city           TEXT NOT NULL,
    district       TEXT NOT NULL,
    full_address   TEXT NOT NULL,
    edit_date      TEXT NOT NULL,
    edit_type_code TEXT NOT NULL,
    edit_type_name TEXT NOT NULL,
    raw_data       TEXT
);
CREATE INDEX IF NOT EXISTS idx_household_batch ON household_records(batch_id);
CREATE INDEX IF NOT EXISTS idx_household_district_date ON household_records(district, edit_date);

CREATE TABLE IF NOT EXISTS email_address (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    email     TEXT    NOT NULL UNIQUE,
    name      TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);
"#;

/// 进程被中断时遗留的 running 批次会以这个原因关闭
pub const INTERRUPTED_REASON: &str = "process terminated";

/// 门牌资料查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub city: Option<String>,
    pub district: Option<String>,
    pub edit_type: Option<String>,
    /// 民国日期，含当天
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub batch_id: Option<BatchId>,
    pub limit: Option<usize>,
}

/// 落库后的一笔门牌资料
#[derive(Debug, Clone, PartialEq)]
pub struct StoredHousehold {
    pub id: i64,
    pub batch_id: Option<BatchId>,
    pub edit_type_name: String,
    pub record: HouseholdRecord,
}

#[derive(Clone)]
pub struct ResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl ResultStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// 内存数据库，测试与 `--no-save` 场景使用
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ---------------------------------------------------------------
    // crawler_logs
    // ---------------------------------------------------------------

    /// 新建 running 批次；已有 running 批次时拒绝
    pub fn begin_batch(
        &self,
        endpoint: &str,
        started_at: DateTime<FixedOffset>,
    ) -> Result<BatchId, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let running: Option<BatchId> = tx
            .query_row(
                "SELECT id FROM crawler_logs WHERE status = 'running' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = running {
            return Err(StoreError::BatchAlreadyRunning(id));
        }

        tx.execute(
            "INSERT INTO crawler_logs (api_endpoint, start_time, records_fetched, status)
             VALUES (?1, ?2, 0, 'running')",
            params![endpoint, started_at.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!("新建批次 #{}", id);
        Ok(id)
    }

    /// 唯一一次终态更新
    pub fn finish_batch(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        error_message: Option<&str>,
        total_records: usize,
        ended_at: DateTime<FixedOffset>,
    ) -> Result<(), StoreError> {
        if status == BatchStatus::Running {
            return Err(StoreError::NotTerminal);
        }
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE crawler_logs
             SET status = ?1, error_message = ?2, records_fetched = ?3, end_time = ?4
             WHERE id = ?5 AND status = 'running'",
            params![
                status.as_str(),
                error_message,
                total_records as i64,
                ended_at.to_rfc3339(),
                batch_id
            ],
        )?;
        if changed == 1 {
            return Ok(());
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM crawler_logs WHERE id = ?1",
                params![batch_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Err(StoreError::BatchAlreadyFinished(batch_id)),
            None => Err(StoreError::BatchNotFound(batch_id)),
        }
    }

    /// 把上次进程遗留的 running 批次关闭为 failed，返回被关闭的批次
    pub fn recover_interrupted(
        &self,
        ended_at: DateTime<FixedOffset>,
    ) -> Result<Vec<BatchId>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ids: Vec<BatchId> = {
            let mut stmt = tx.prepare("SELECT id FROM crawler_logs WHERE status = 'running'")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        tx.execute(
            "UPDATE crawler_logs SET status = 'failed', error_message = ?1, end_time = ?2
             WHERE status = 'running'",
            params![INTERRUPTED_REASON, ended_at.to_rfc3339()],
        )?;
        tx.commit()?;

        if !ids.is_empty() {
            warn!("⚠️ 关闭了 {} 个中断的批次: {:?}", ids.len(), ids);
        }
        Ok(ids)
    }

    pub fn running_batch(&self) -> Result<Option<BatchRun>, StoreError> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                &format!("{BATCH_COLUMNS} WHERE status = 'running' ORDER BY id DESC LIMIT 1"),
                [],
                map_batch_run,
            )
            .optional()?;
        Ok(run)
    }

    pub fn batch(&self, batch_id: BatchId) -> Result<Option<BatchRun>, StoreError> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                &format!("{BATCH_COLUMNS} WHERE id = ?1"),
                params![batch_id],
                map_batch_run,
            )
            .optional()?;
        Ok(run)
    }

    pub fn latest_batch(&self) -> Result<Option<BatchRun>, StoreError> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                &format!("{BATCH_COLUMNS} ORDER BY id DESC LIMIT 1"),
                [],
                map_batch_run,
            )
            .optional()?;
        Ok(run)
    }

    /// 删除批次；行政区结果级联删除，门牌资料保留但 batch_id 置空
    pub fn delete_batch(&self, batch_id: BatchId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM crawler_logs WHERE id = ?1", params![batch_id])?;
        Ok(changed > 0)
    }

    // ---------------------------------------------------------------
    // district_query_results
    // ---------------------------------------------------------------

    pub fn record_district(
        &self,
        batch_id: BatchId,
        result: &DistrictQueryResult,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO district_query_results
             (batch_id, city_name, district_code, district_name, record_count, status, error_message, queried_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch_id,
                result.city_name,
                result.district_code,
                result.district_name,
                result.record_count as i64,
                result.status.as_str(),
                result.error_message,
                result.queried_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn district_results(&self, batch_id: BatchId) -> Result<Vec<DistrictQueryResult>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT city_name, district_code, district_name, record_count, status, error_message, queried_at
             FROM district_query_results WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(DistrictQueryResult {
                city_name: row.get(0)?,
                district_code: row.get(1)?,
                district_name: row.get(2)?,
                record_count: row.get::<_, i64>(3)? as usize,
                status: parse_text(row, 4)?,
                error_message: row.get(5)?,
                queried_at: parse_time(row, 6)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // ---------------------------------------------------------------
    // household_records
    // ---------------------------------------------------------------

    /// 同一个事务写入一个行政区的全部资料
    pub fn record_households(
        &self,
        batch_id: BatchId,
        records: &[HouseholdRecord],
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO household_records
                 (batch_id, city, district, full_address, edit_date, edit_type_code, edit_type_name, raw_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                let raw = if record.raw.is_null() {
                    serde_json::to_string(record)?
                } else {
                    serde_json::to_string(&record.raw)?
                };
                stmt.execute(params![
                    batch_id,
                    record.city,
                    record.district,
                    record.address,
                    record.date,
                    record.edit_type,
                    record.edit_type_name(),
                    raw,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            "💾 写入 {} 笔资料 ({} {})",
            records.len(),
            records[0].city,
            records[0].district
        );
        Ok(records.len())
    }

    pub fn count_households(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM household_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 条件查询，按异动日期新到旧
    pub fn search_records(&self, filter: &RecordFilter) -> Result<Vec<StoredHousehold>, StoreError> {
        let mut sql = String::from(
            "SELECT id, batch_id, city, district, full_address, edit_date, edit_type_code, edit_type_name, raw_data
             FROM household_records WHERE 1 = 1",
        );
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        let mut push = |clause: &str, value: rusqlite::types::Value| {
            args.push(value);
            sql.push_str(&format!(" AND {clause} ?{}", args.len()));
        };
        if let Some(city) = &filter.city {
            push("city =", city.clone().into());
        }
        if let Some(district) = &filter.district {
            push("district =", district.clone().into());
        }
        if let Some(edit_type) = &filter.edit_type {
            push("edit_type_code =", edit_type.clone().into());
        }
        if let Some(start) = &filter.start_date {
            push("edit_date >=", start.clone().into());
        }
        if let Some(end) = &filter.end_date {
            push("edit_date <=", end.clone().into());
        }
        if let Some(batch_id) = filter.batch_id {
            push("batch_id =", batch_id.into());
        }
        sql.push_str(" ORDER BY edit_date DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let raw: Option<String> = row.get(8)?;
            Ok(StoredHousehold {
                id: row.get(0)?,
                batch_id: row.get(1)?,
                edit_type_name: row.get(7)?,
                record: HouseholdRecord {
                    city: row.get(2)?,
                    district: row.get(3)?,
                    address: row.get(4)?,
                    date: row.get(5)?,
                    edit_type: row.get(6)?,
                    raw: raw
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                },
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn households_for_batch(&self, batch_id: BatchId) -> Result<Vec<StoredHousehold>, StoreError> {
        self.search_records(&RecordFilter {
            batch_id: Some(batch_id),
            ..RecordFilter::default()
        })
    }

    // ---------------------------------------------------------------
    // email_address
    // ---------------------------------------------------------------

    /// 新增收件人；已存在时重新启用并更新名称
    pub fn add_recipient(&self, email: &str, name: Option<&str>) -> Result<i64, StoreError> {
        let email = email.trim();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO email_address (email, name, is_active) VALUES (?1, ?2, 1)
             ON CONFLICT(email) DO UPDATE SET is_active = 1, name = COALESCE(excluded.name, name)",
            params![email, name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM email_address WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 停用收件人，返回是否存在
    pub fn deactivate_recipient(&self, email: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE email_address SET is_active = 0 WHERE email = ?1",
            params![email.trim()],
        )?;
        Ok(changed > 0)
    }

    pub fn active_recipients(&self) -> Result<Vec<NotificationRecipient>, StoreError> {
        self.query_recipients("WHERE is_active = 1")
    }

    pub fn list_recipients(&self) -> Result<Vec<NotificationRecipient>, StoreError> {
        self.query_recipients("")
    }

    fn query_recipients(&self, condition: &str) -> Result<Vec<NotificationRecipient>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, email, name, is_active FROM email_address {condition} ORDER BY id"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(NotificationRecipient {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                is_active: row.get::<_, i64>(3)? != 0,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

const BATCH_COLUMNS: &str = "SELECT id, api_endpoint, start_time, end_time, records_fetched, status, error_message FROM crawler_logs";

fn map_batch_run(row: &Row<'_>) -> rusqlite::Result<BatchRun> {
    let end_time: Option<String> = row.get(3)?;
    Ok(BatchRun {
        id: row.get(0)?,
        api_endpoint: row.get(1)?,
        start_time: parse_time(row, 2)?,
        end_time: end_time
            .map(|s| DateTime::parse_from_rfc3339(&s).map_err(|e| conversion_error(3, e)))
            .transpose()?,
        records_fetched: row.get::<_, i64>(4)? as usize,
        status: parse_text(row, 5)?,
        error_message: row.get(6)?,
    })
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<FixedOffset>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text).map_err(|e| conversion_error(idx, e))
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| conversion_error(idx, e))
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}
