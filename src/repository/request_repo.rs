// ==========================================
// 选课准入系统 - 审批申请仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 懒惰过期(读到超时 PENDING 即转 EXPIRED)由引擎层驱动,
//       本仓储只提供 mark_expired 的原子写入
// ==========================================

use crate::domain::enrollment::EnrollmentRequest;
use crate::domain::types::RequestStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts, parse_ts_opt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// EnrollmentRequestRepository - 审批申请仓储
// ==========================================
pub struct EnrollmentRequestRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EnrollmentRequestRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<EnrollmentRequest> {
        let status_str: String = row.get(4)?;
        let status = RequestStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("未知申请状态: {}", status_str).into(),
            )
        })?;
        let requested_at_str: String = row.get(6)?;
        let expires_at_str: String = row.get(7)?;

        Ok(EnrollmentRequest {
            request_id: row.get(0)?,
            class_id: row.get(1)?,
            student_id: row.get(2)?,
            institution_id: row.get(3)?,
            status,
            justification: row.get(5)?,
            requested_at: parse_ts(6, &requested_at_str)?,
            expires_at: parse_ts(7, &expires_at_str)?,
            reviewed_by: row.get(8)?,
            reviewed_at: parse_ts_opt(9, row.get(9)?)?,
            review_notes: row.get(10)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        request_id, class_id, student_id, institution_id, status,
        justification, requested_at, expires_at,
        reviewed_by, reviewed_at, review_notes
    "#;

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入审批申请(事务内使用)
    pub fn insert_with(conn: &Connection, request: &EnrollmentRequest) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO enrollment_request (
                request_id, class_id, student_id, institution_id, status,
                justification, requested_at, expires_at,
                reviewed_by, reviewed_at, review_notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                request.request_id,
                request.class_id,
                request.student_id,
                request.institution_id,
                request.status.to_db_str(),
                request.justification,
                format_ts(request.requested_at),
                format_ts(request.expires_at),
                request.reviewed_by,
                request.reviewed_at.map(format_ts),
                request.review_notes,
            ],
        )?;
        Ok(())
    }

    /// 将申请迁移到终态(事务内使用)
    ///
    /// # 红线
    /// 仅允许从 PENDING 出发;目标状态的合法性由引擎层判定
    pub fn finalize_with(
        conn: &Connection,
        request_id: &str,
        status: RequestStatus,
        reviewed_by: Option<&str>,
        review_notes: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let changed = conn.execute(
            r#"
            UPDATE enrollment_request
            SET status = ?2, reviewed_by = ?3, reviewed_at = ?4, review_notes = ?5
            WHERE request_id = ?1 AND status = 'PENDING'
            "#,
            params![
                request_id,
                status.to_db_str(),
                reviewed_by,
                format_ts(now),
                review_notes,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: "NON_PENDING".to_string(),
                to: status.to_db_str().to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按申请ID查询(事务内使用)
    pub fn find_by_id_with(
        conn: &Connection,
        request_id: &str,
    ) -> RepositoryResult<Option<EnrollmentRequest>> {
        let sql = format!(
            "SELECT {} FROM enrollment_request WHERE request_id = ?1",
            Self::SELECT_COLUMNS
        );
        let request = conn
            .query_row(&sql, params![request_id], Self::map_row)
            .optional()?;
        Ok(request)
    }

    pub fn find_by_id(&self, request_id: &str) -> RepositoryResult<Option<EnrollmentRequest>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, request_id)
    }

    /// 查找 (班级, 学生) 的待审申请(事务内使用)
    pub fn find_pending_with(
        conn: &Connection,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<EnrollmentRequest>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM enrollment_request
            WHERE class_id = ?1 AND student_id = ?2 AND status = 'PENDING'
            "#,
            Self::SELECT_COLUMNS
        );
        let request = conn
            .query_row(&sql, params![class_id, student_id], Self::map_row)
            .optional()?;
        Ok(request)
    }

    /// 按班级列出待审申请
    pub fn list_pending_by_class(
        &self,
        class_id: &str,
    ) -> RepositoryResult<Vec<EnrollmentRequest>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM enrollment_request
            WHERE class_id = ?1 AND status = 'PENDING'
            ORDER BY requested_at
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![class_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}
