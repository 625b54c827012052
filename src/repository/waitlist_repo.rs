// ==========================================
// 选课准入系统 - 候补队列仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: position 必须保持 1..k 稠密序列,移除后同事务内重排
// 说明: 晋升保留(hold)以 notified_at/notification_expires_at 两列表达,
//       "保留中的席位"与已入班人数一并计入容量口径
// ==========================================

use crate::domain::enrollment::WaitlistEntry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts, parse_ts_opt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// WaitlistRepository - 候补队列仓储
// ==========================================
pub struct WaitlistRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WaitlistRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<WaitlistEntry> {
        let added_at_str: String = row.get(5)?;
        Ok(WaitlistEntry {
            class_id: row.get(0)?,
            student_id: row.get(1)?,
            position: row.get(2)?,
            priority: row.get(3)?,
            estimated_probability: row.get(4)?,
            added_at: parse_ts(5, &added_at_str)?,
            notified_at: parse_ts_opt(6, row.get(6)?)?,
            notification_expires_at: parse_ts_opt(7, row.get(7)?)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        class_id, student_id, position, priority, estimated_probability,
        added_at, notified_at, notification_expires_at
    "#;

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入候补条目(事务内使用)
    pub fn insert_with(conn: &Connection, entry: &WaitlistEntry) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO waitlist_entry (
                class_id, student_id, position, priority, estimated_probability,
                added_at, notified_at, notification_expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.class_id,
                entry.student_id,
                entry.position,
                entry.priority,
                entry.estimated_probability,
                format_ts(entry.added_at),
                entry.notified_at.map(format_ts),
                entry.notification_expires_at.map(format_ts),
            ],
        )?;
        Ok(())
    }

    /// 移除候补条目并重排后续位次(事务内使用)
    ///
    /// # 说明
    /// 移除 position=p 的条目后,所有 position>p 的条目前移一位,
    /// 并按新位次重算 estimated_probability,保证 1..k 稠密无空洞
    pub fn remove_with(
        conn: &Connection,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<bool> {
        let removed_position: Option<i32> = conn
            .query_row(
                "SELECT position FROM waitlist_entry WHERE class_id = ?1 AND student_id = ?2",
                params![class_id, student_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(position) = removed_position else {
            return Ok(false);
        };

        conn.execute(
            "DELETE FROM waitlist_entry WHERE class_id = ?1 AND student_id = ?2",
            params![class_id, student_id],
        )?;

        // 前移后续位次
        conn.execute(
            r#"
            UPDATE waitlist_entry
            SET position = position - 1
            WHERE class_id = ?1 AND position > ?2
            "#,
            params![class_id, position],
        )?;

        // 位次变化后刷新预估概率: clamp(1 - position*0.1, 0.1, 0.9)
        conn.execute(
            r#"
            UPDATE waitlist_entry
            SET estimated_probability = MAX(0.1, MIN(0.9, 1.0 - position * 0.1))
            WHERE class_id = ?1 AND position >= ?2
            "#,
            params![class_id, position],
        )?;

        Ok(true)
    }

    /// 设置晋升保留窗口(事务内使用)
    pub fn set_hold_with(
        conn: &Connection,
        class_id: &str,
        student_id: &str,
        notified_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let changed = conn.execute(
            r#"
            UPDATE waitlist_entry
            SET notified_at = ?3, notification_expires_at = ?4
            WHERE class_id = ?1 AND student_id = ?2
            "#,
            params![
                class_id,
                student_id,
                format_ts(notified_at),
                format_ts(expires_at)
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "WaitlistEntry".to_string(),
                id: format!("{}/{}", class_id, student_id),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 统计候补人数(事务内使用)
    pub fn count_with(conn: &Connection, class_id: &str) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM waitlist_entry WHERE class_id = ?1",
            params![class_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count(&self, class_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::count_with(&conn, class_id)
    }

    /// 统计未过期保留数(事务内使用,容量口径的一部分)
    pub fn count_active_holds_with(
        conn: &Connection,
        class_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM waitlist_entry
            WHERE class_id = ?1
              AND notified_at IS NOT NULL
              AND notification_expires_at > ?2
            "#,
            params![class_id, format_ts(now)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 查询当前未过期的保留条目(事务内使用)
    pub fn active_hold_with(
        conn: &Connection,
        class_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<Option<WaitlistEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM waitlist_entry
            WHERE class_id = ?1
              AND notified_at IS NOT NULL
              AND notification_expires_at > ?2
            ORDER BY notified_at
            LIMIT 1
            "#,
            Self::SELECT_COLUMNS
        );
        let entry = conn
            .query_row(&sql, params![class_id, format_ts(now)], Self::map_row)
            .optional()?;
        Ok(entry)
    }

    /// 查询保留已超时的条目(事务内使用)
    pub fn expired_holds_with(
        conn: &Connection,
        class_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<Vec<WaitlistEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM waitlist_entry
            WHERE class_id = ?1
              AND notified_at IS NOT NULL
              AND notification_expires_at <= ?2
            ORDER BY position
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![class_id, format_ts(now)], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 选出下一个晋升候选: priority DESC, added_at ASC,排除已有保留的条目
    pub fn head_candidate_with(
        conn: &Connection,
        class_id: &str,
    ) -> RepositoryResult<Option<WaitlistEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM waitlist_entry
            WHERE class_id = ?1 AND notified_at IS NULL
            ORDER BY priority DESC, added_at ASC
            LIMIT 1
            "#,
            Self::SELECT_COLUMNS
        );
        let entry = conn
            .query_row(&sql, params![class_id], Self::map_row)
            .optional()?;
        Ok(entry)
    }

    /// 查找单个候补条目
    pub fn find_with(
        conn: &Connection,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<WaitlistEntry>> {
        let sql = format!(
            "SELECT {} FROM waitlist_entry WHERE class_id = ?1 AND student_id = ?2",
            Self::SELECT_COLUMNS
        );
        let entry = conn
            .query_row(&sql, params![class_id, student_id], Self::map_row)
            .optional()?;
        Ok(entry)
    }

    pub fn find(
        &self,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<WaitlistEntry>> {
        let conn = self.get_conn()?;
        Self::find_with(&conn, class_id, student_id)
    }

    /// 按位次列出班级候补队列
    pub fn list_by_class(&self, class_id: &str) -> RepositoryResult<Vec<WaitlistEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM waitlist_entry WHERE class_id = ?1 ORDER BY position",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![class_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}
