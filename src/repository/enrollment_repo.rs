// ==========================================
// 选课准入系统 - 选课记录仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 终态记录只读,状态更新仅允许从活动状态出发(由引擎层保证)
// ==========================================

use crate::domain::enrollment::Enrollment;
use crate::domain::types::EnrollmentStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// EnrollmentRepository - 选课记录仓储
// ==========================================
pub struct EnrollmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EnrollmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<Enrollment> {
        let status_str: String = row.get(4)?;
        let status = EnrollmentStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("未知选课状态: {}", status_str).into(),
            )
        })?;
        let enrolled_at_str: String = row.get(7)?;
        let updated_at_str: String = row.get(8)?;

        Ok(Enrollment {
            enrollment_id: row.get(0)?,
            class_id: row.get(1)?,
            student_id: row.get(2)?,
            institution_id: row.get(3)?,
            status,
            enrolled_by: row.get(5)?,
            status_reason: row.get(6)?,
            enrolled_at: parse_ts(7, &enrolled_at_str)?,
            updated_at: parse_ts(8, &updated_at_str)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        enrollment_id, class_id, student_id, institution_id, status,
        enrolled_by, status_reason, enrolled_at, updated_at
    "#;

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入选课记录(事务内使用)
    pub fn insert_with(conn: &Connection, enrollment: &Enrollment) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO enrollment (
                enrollment_id, class_id, student_id, institution_id, status,
                enrolled_by, status_reason, enrolled_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                enrollment.enrollment_id,
                enrollment.class_id,
                enrollment.student_id,
                enrollment.institution_id,
                enrollment.status.to_db_str(),
                enrollment.enrolled_by,
                enrollment.status_reason,
                format_ts(enrollment.enrolled_at),
                format_ts(enrollment.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 更新选课记录状态(事务内使用)
    pub fn update_status_with(
        conn: &Connection,
        enrollment_id: &str,
        status: EnrollmentStatus,
        reason: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let changed = conn.execute(
            r#"
            UPDATE enrollment
            SET status = ?2, status_reason = ?3, updated_at = ?4
            WHERE enrollment_id = ?1
            "#,
            params![enrollment_id, status.to_db_str(), reason, format_ts(now)],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Enrollment".to_string(),
                id: enrollment_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 查找 (班级, 学生) 的活动记录(ENROLLED/WAITLISTED)
    pub fn find_active_with(
        conn: &Connection,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<Enrollment>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM enrollment
            WHERE class_id = ?1 AND student_id = ?2
              AND status IN ('ENROLLED', 'WAITLISTED')
            "#,
            Self::SELECT_COLUMNS
        );
        let enrollment = conn
            .query_row(&sql, params![class_id, student_id], Self::map_row)
            .optional()?;
        Ok(enrollment)
    }

    pub fn find_active(
        &self,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<Enrollment>> {
        let conn = self.get_conn()?;
        Self::find_active_with(&conn, class_id, student_id)
    }

    /// 按记录ID查询
    pub fn find_by_id(&self, enrollment_id: &str) -> RepositoryResult<Option<Enrollment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM enrollment WHERE enrollment_id = ?1",
            Self::SELECT_COLUMNS
        );
        let enrollment = conn
            .query_row(&sql, params![enrollment_id], Self::map_row)
            .optional()?;
        Ok(enrollment)
    }

    /// 按状态统计班级人数(事务内使用,容量判定的唯一口径)
    pub fn count_by_status_with(
        conn: &Connection,
        class_id: &str,
        status: EnrollmentStatus,
    ) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enrollment WHERE class_id = ?1 AND status = ?2",
            params![class_id, status.to_db_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_by_status(
        &self,
        class_id: &str,
        status: EnrollmentStatus,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::count_by_status_with(&conn, class_id, status)
    }

    /// 按班级列出指定状态的记录
    pub fn list_by_class(
        &self,
        class_id: &str,
        status: Option<EnrollmentStatus>,
    ) -> RepositoryResult<Vec<Enrollment>> {
        let conn = self.get_conn()?;
        match status {
            Some(s) => {
                let sql = format!(
                    "SELECT {} FROM enrollment WHERE class_id = ?1 AND status = ?2 ORDER BY enrolled_at",
                    Self::SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![class_id, s.to_db_str()], Self::map_row)?
                    .collect::<SqliteResult<Vec<_>>>()?;
                Ok(rows)
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM enrollment WHERE class_id = ?1 ORDER BY enrolled_at",
                    Self::SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![class_id], Self::map_row)?
                    .collect::<SqliteResult<Vec<_>>>()?;
                Ok(rows)
            }
        }
    }

    /// 统计滚动窗口内每个学生的去重班级选课数(供异常速率扫描)
    ///
    /// # 返回
    /// - Vec<(student_id, distinct_class_count)>,仅包含计数 > 0 的学生
    pub fn count_recent_distinct_classes(
        &self,
        institution_id: &str,
        window_start: NaiveDateTime,
    ) -> RepositoryResult<Vec<(String, i64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT student_id, COUNT(DISTINCT class_id) AS class_count
            FROM enrollment
            WHERE institution_id = ?1
              AND enrolled_at >= ?2
              AND status IN ('ENROLLED', 'WAITLISTED')
            GROUP BY student_id
            ORDER BY class_count DESC, student_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![institution_id, format_ts(window_start)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}
