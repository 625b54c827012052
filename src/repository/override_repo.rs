// ==========================================
// 选课准入系统 - 越权放行仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: role_capability 是"角色可用越权菜单"的数据表,
//       按 scope_id 做租户覆写, 'global' 为兜底
// ==========================================

use crate::domain::conflict::{OverrideRequest, RoleCapability};
use crate::domain::types::{OverrideStatus, OverrideType, Role};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts, parse_ts_opt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row, Result as SqliteResult};
use std::sync::{Arc, Mutex};

// ==========================================
// OverrideRepository - 越权请求仓储
// ==========================================
pub struct OverrideRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OverrideRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<OverrideRequest> {
        let type_str: String = row.get(4)?;
        let override_type = OverrideType::from_str(&type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("未知越权类型: {}", type_str).into(),
            )
        })?;
        let status_str: String = row.get(5)?;
        let status = OverrideStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("未知越权状态: {}", status_str).into(),
            )
        })?;
        let requested_at_str: String = row.get(7)?;

        Ok(OverrideRequest {
            override_id: row.get(0)?,
            class_id: row.get(1)?,
            student_id: row.get(2)?,
            institution_id: row.get(3)?,
            override_type,
            status,
            requested_by: row.get(6)?,
            requested_at: parse_ts(7, &requested_at_str)?,
            approved_by: row.get(8)?,
            decided_at: parse_ts_opt(9, row.get(9)?)?,
            notes: row.get(10)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        override_id, class_id, student_id, institution_id, override_type, status,
        requested_by, requested_at, approved_by, decided_at, notes
    "#;

    /// 插入越权请求
    pub fn insert(&self, request: &OverrideRequest) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO override_request (
                override_id, class_id, student_id, institution_id, override_type, status,
                requested_by, requested_at, approved_by, decided_at, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                request.override_id,
                request.class_id,
                request.student_id,
                request.institution_id,
                request.override_type.to_db_str(),
                request.status.to_db_str(),
                request.requested_by,
                format_ts(request.requested_at),
                request.approved_by,
                request.decided_at.map(format_ts),
                request.notes,
            ],
        )?;
        Ok(())
    }

    /// 按ID查询
    pub fn find_by_id(&self, override_id: &str) -> RepositoryResult<Option<OverrideRequest>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM override_request WHERE override_id = ?1",
            Self::SELECT_COLUMNS
        );
        let request = conn
            .query_row(&sql, params![override_id], Self::map_row)
            .optional()?;
        Ok(request)
    }

    /// 将越权请求迁移到终态(仅允许从 PENDING 出发)
    pub fn finalize(
        &self,
        override_id: &str,
        status: OverrideStatus,
        approved_by: &str,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE override_request
            SET status = ?2, approved_by = ?3, decided_at = ?4,
                notes = COALESCE(?5, notes)
            WHERE override_id = ?1 AND status = 'PENDING'
            "#,
            params![
                override_id,
                status.to_db_str(),
                approved_by,
                format_ts(now),
                notes,
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

    /// 统计某操作人在周期窗口内的越权请求数(PENDING+APPROVED,配额口径)
    pub fn count_in_period(
        &self,
        requested_by: &str,
        override_type: OverrideType,
        window_start: NaiveDateTime,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM override_request
            WHERE requested_by = ?1
              AND override_type = ?2
              AND requested_at >= ?3
              AND status IN ('PENDING', 'APPROVED')
            "#,
            params![requested_by, override_type.to_db_str(), format_ts(window_start)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // 角色越权能力
    // ==========================================

    /// 查询角色能力: 先找租户 scope,未配置时回退 global
    pub fn find_capability(
        &self,
        scope_id: &str,
        role: Role,
        override_type: OverrideType,
    ) -> RepositoryResult<Option<RoleCapability>> {
        let conn = self.get_conn()?;

        let map = |row: &Row<'_>| -> SqliteResult<RoleCapability> {
            let role_str: String = row.get(1)?;
            let role = Role::from_str(&role_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("未知角色: {}", role_str).into(),
                )
            })?;
            let type_str: String = row.get(2)?;
            let override_type = OverrideType::from_str(&type_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("未知越权类型: {}", type_str).into(),
                )
            })?;
            Ok(RoleCapability {
                scope_id: row.get(0)?,
                role,
                override_type,
                max_per_period: row.get(3)?,
                period_days: row.get(4)?,
                requires_justification: row.get::<_, i64>(5)? != 0,
            })
        };

        let sql = r#"
            SELECT scope_id, role, override_type, max_per_period, period_days, requires_justification
            FROM role_capability
            WHERE scope_id = ?1 AND role = ?2 AND override_type = ?3
        "#;

        // 租户 scope 优先
        let capability = conn
            .query_row(
                sql,
                params![scope_id, role.to_db_str(), override_type.to_db_str()],
                map,
            )
            .optional()?;
        if capability.is_some() {
            return Ok(capability);
        }

        // global 兜底
        let capability = conn
            .query_row(
                sql,
                params!["global", role.to_db_str(), override_type.to_db_str()],
                map,
            )
            .optional()?;
        Ok(capability)
    }

    /// 写入/覆写角色能力(租户管理操作)
    pub fn upsert_capability(&self, capability: &RoleCapability) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO role_capability (
                scope_id, role, override_type, max_per_period, period_days, requires_justification
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                capability.scope_id,
                capability.role.to_db_str(),
                capability.override_type.to_db_str(),
                capability.max_per_period,
                capability.period_days,
                capability.requires_justification as i64,
            ],
        )?;
        Ok(())
    }
}
