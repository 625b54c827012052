// ==========================================
// 选课准入系统 - 冲突记录仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 扫描过程中每条冲突记录独立插入(非整批事务),
//       中途取消不会留下半写状态
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{ConflictSeverity, ConflictStatus, ConflictType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts, parse_ts_opt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// ConflictRepository - 冲突记录仓储
// ==========================================
pub struct ConflictRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<ConflictRecord> {
        let type_str: String = row.get(2)?;
        let conflict_type = ConflictType::from_str(&type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("未知冲突类型: {}", type_str).into(),
            )
        })?;
        let severity_str: String = row.get(3)?;
        let severity = ConflictSeverity::from_str(&severity_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("未知严重级别: {}", severity_str).into(),
            )
        })?;
        let status_str: String = row.get(8)?;
        let status = ConflictStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                format!("未知冲突状态: {}", status_str).into(),
            )
        })?;
        let detected_at_str: String = row.get(9)?;

        Ok(ConflictRecord {
            conflict_id: row.get(0)?,
            institution_id: row.get(1)?,
            conflict_type,
            severity,
            class_id: row.get(4)?,
            student_id: row.get(5)?,
            affected_students: row.get(6)?,
            description: row.get(7)?,
            status,
            detected_at: parse_ts(9, &detected_at_str)?,
            resolved_by: row.get(10)?,
            resolved_at: parse_ts_opt(11, row.get(11)?)?,
            resolution: row.get(12)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        conflict_id, institution_id, conflict_type, severity, class_id, student_id,
        affected_students, description, status, detected_at,
        resolved_by, resolved_at, resolution
    "#;

    /// 插入冲突记录(单条独立原子写入)
    pub fn insert(&self, record: &ConflictRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO conflict_record (
                conflict_id, institution_id, conflict_type, severity, class_id, student_id,
                affected_students, description, status, detected_at,
                resolved_by, resolved_at, resolution
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.conflict_id,
                record.institution_id,
                record.conflict_type.to_db_str(),
                record.severity.to_db_str(),
                record.class_id,
                record.student_id,
                record.affected_students,
                record.description,
                record.status.to_db_str(),
                format_ts(record.detected_at),
                record.resolved_by,
                record.resolved_at.map(format_ts),
                record.resolution,
            ],
        )?;
        Ok(())
    }

    /// 查找同一主体的未关闭记录(扫描幂等性: 不重复开单)
    pub fn find_open_by_subject(
        &self,
        conflict_type: ConflictType,
        class_id: Option<&str>,
        student_id: Option<&str>,
    ) -> RepositoryResult<Option<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM conflict_record
            WHERE conflict_type = ?1 AND status = 'OPEN'
              AND (?2 IS NULL OR class_id = ?2)
              AND (?3 IS NULL OR student_id = ?3)
            LIMIT 1
            "#,
            Self::SELECT_COLUMNS
        );
        let record = conn
            .query_row(
                &sql,
                params![conflict_type.to_db_str(), class_id, student_id],
                Self::map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// 按ID查询
    pub fn find_by_id(&self, conflict_id: &str) -> RepositoryResult<Option<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_record WHERE conflict_id = ?1",
            Self::SELECT_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![conflict_id], Self::map_row)
            .optional()?;
        Ok(record)
    }

    /// 列出租户未关闭的冲突
    pub fn list_open(&self, institution_id: &str) -> RepositoryResult<Vec<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM conflict_record
            WHERE institution_id = ?1 AND status = 'OPEN'
            ORDER BY severity DESC, detected_at
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![institution_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 关闭冲突记录(仅允许 OPEN -> RESOLVED)
    pub fn mark_resolved(
        &self,
        conflict_id: &str,
        resolved_by: &str,
        resolution: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE conflict_record
            SET status = 'RESOLVED', resolved_by = ?2, resolution = ?3, resolved_at = ?4
            WHERE conflict_id = ?1 AND status = 'OPEN'
            "#,
            params![conflict_id, resolved_by, resolution, format_ts(now)],
        )?;
        if changed == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: "RESOLVED".to_string(),
                to: "RESOLVED".to_string(),
            });
        }
        Ok(())
    }
}
