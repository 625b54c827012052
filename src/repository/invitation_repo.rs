// ==========================================
// 选课准入系统 - 入班邀请仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::enrollment::Invitation;
use crate::domain::types::InvitationStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// InvitationRepository - 入班邀请仓储
// ==========================================
pub struct InvitationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl InvitationRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<Invitation> {
        let status_str: String = row.get(4)?;
        let status = InvitationStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("未知邀请状态: {}", status_str).into(),
            )
        })?;
        let invited_at_str: String = row.get(6)?;
        let expires_at_str: String = row.get(7)?;

        Ok(Invitation {
            invitation_id: row.get(0)?,
            class_id: row.get(1)?,
            student_id: row.get(2)?,
            institution_id: row.get(3)?,
            status,
            invited_by: row.get(5)?,
            invited_at: parse_ts(6, &invited_at_str)?,
            expires_at: parse_ts(7, &expires_at_str)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        invitation_id, class_id, student_id, institution_id, status,
        invited_by, invited_at, expires_at
    "#;

    /// 插入邀请
    pub fn insert(&self, invitation: &Invitation) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO invitation (
                invitation_id, class_id, student_id, institution_id, status,
                invited_by, invited_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                invitation.invitation_id,
                invitation.class_id,
                invitation.student_id,
                invitation.institution_id,
                invitation.status.to_db_str(),
                invitation.invited_by,
                format_ts(invitation.invited_at),
                format_ts(invitation.expires_at),
            ],
        )?;
        Ok(())
    }

    /// 查找 (班级, 学生) 的有效邀请: PENDING 且未过期(事务内使用)
    pub fn find_live_with(
        conn: &Connection,
        class_id: &str,
        student_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<Option<Invitation>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM invitation
            WHERE class_id = ?1 AND student_id = ?2
              AND status = 'PENDING' AND expires_at > ?3
            ORDER BY invited_at DESC
            LIMIT 1
            "#,
            Self::SELECT_COLUMNS
        );
        let invitation = conn
            .query_row(&sql, params![class_id, student_id, format_ts(now)], Self::map_row)
            .optional()?;
        Ok(invitation)
    }

    /// 将邀请迁移到终态(事务内使用;仅允许从 PENDING 出发)
    pub fn finalize_with(
        conn: &Connection,
        invitation_id: &str,
        status: InvitationStatus,
    ) -> RepositoryResult<()> {
        let changed = conn.execute(
            r#"
            UPDATE invitation
            SET status = ?2
            WHERE invitation_id = ?1 AND status = 'PENDING'
            "#,
            params![invitation_id, status.to_db_str()],
        )?;
        if changed == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: "NON_PENDING".to_string(),
                to: status.to_db_str().to_string(),
            });
        }
        Ok(())
    }
}
