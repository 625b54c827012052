// ==========================================
// 选课准入系统 - 审计日志仓储
// ==========================================
// 红线: 只追加; 本仓储不提供 UPDATE/DELETE
// 说明: insert_with 供引擎层在状态迁移事务内写入,
//       保证"迁移落库则审计必落库"
// ==========================================

use crate::domain::audit::AuditLogEntry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// AuditLogRepository - 审计日志仓储
// ==========================================
pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<AuditLogEntry> {
        let created_at_str: String = row.get(8)?;
        Ok(AuditLogEntry {
            audit_id: row.get(0)?,
            institution_id: row.get(1)?,
            student_id: row.get(2)?,
            class_id: row.get(3)?,
            action: row.get(4)?,
            performed_by: row.get(5)?,
            reason: row.get(6)?,
            detail: row.get(7)?,
            created_at: parse_ts(8, &created_at_str)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        audit_id, institution_id, student_id, class_id, action,
        performed_by, reason, detail, created_at
    "#;

    /// 插入审计条目(事务内使用)
    pub fn insert_with(conn: &Connection, entry: &AuditLogEntry) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO audit_log (
                audit_id, institution_id, student_id, class_id, action,
                performed_by, reason, detail, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.audit_id,
                entry.institution_id,
                entry.student_id,
                entry.class_id,
                entry.action,
                entry.performed_by,
                entry.reason,
                entry.detail,
                format_ts(entry.created_at),
            ],
        )?;
        Ok(())
    }

    /// 插入审计条目
    pub fn insert(&self, entry: &AuditLogEntry) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, entry)
    }

    /// 按 (学生, 班级) 查询审计轨迹
    pub fn list_by_student_class(
        &self,
        student_id: &str,
        class_id: &str,
    ) -> RepositoryResult<Vec<AuditLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM audit_log
            WHERE student_id = ?1 AND class_id = ?2
            ORDER BY created_at, audit_id
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![student_id, class_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 按动作类型统计 (学生, 班级) 的审计条数
    pub fn count_by_action(
        &self,
        student_id: &str,
        class_id: &str,
        action: &str,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM audit_log
            WHERE student_id = ?1 AND class_id = ?2 AND action = ?3
            "#,
            params![student_id, class_id, action],
            |row| row.get(0),
        )?;
        Ok(count)
    }

}
