// ==========================================
// 选课准入系统 - 班级选课配置仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 配置由教务 CRUD 面维护,本核心读多写少;
//       upsert 仅供初始化与测试搭建使用
// ==========================================

use crate::domain::class_config::{ClassEnrollmentConfig, Prerequisite, Restriction};
use crate::domain::types::{EnrollmentMode, RuleType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts_opt};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// ClassConfigRepository - 班级配置仓储
// ==========================================
pub struct ClassConfigRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ClassConfigRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<ClassEnrollmentConfig> {
        let mode_str: String = row.get(2)?;
        let enrollment_mode = EnrollmentMode::from_str(&mode_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("未知选课模式: {}", mode_str).into(),
            )
        })?;

        Ok(ClassEnrollmentConfig {
            class_id: row.get(0)?,
            institution_id: row.get(1)?,
            enrollment_mode,
            capacity: row.get(3)?,
            waitlist_capacity: row.get(4)?,
            allow_waitlist: row.get::<_, i64>(5)? != 0,
            max_waitlist_position: row.get(6)?,
            enrollment_start: parse_ts_opt(7, row.get(7)?)?,
            enrollment_end: parse_ts_opt(8, row.get(8)?)?,
            drop_deadline: parse_ts_opt(9, row.get(9)?)?,
            withdraw_deadline: parse_ts_opt(10, row.get(10)?)?,
            auto_approve: row.get::<_, i64>(11)? != 0,
            requires_justification: row.get::<_, i64>(12)? != 0,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        class_id, institution_id, enrollment_mode, capacity, waitlist_capacity,
        allow_waitlist, max_waitlist_position,
        enrollment_start, enrollment_end, drop_deadline, withdraw_deadline,
        auto_approve, requires_justification
    "#;

    /// 按班级ID查询配置(事务内可复用)
    pub fn find_by_id_with(
        conn: &Connection,
        class_id: &str,
    ) -> RepositoryResult<Option<ClassEnrollmentConfig>> {
        let sql = format!(
            "SELECT {} FROM class_config WHERE class_id = ?1",
            Self::SELECT_COLUMNS
        );
        let config = conn
            .query_row(&sql, params![class_id], Self::map_row)
            .optional()?;
        Ok(config)
    }

    /// 按班级ID查询配置
    pub fn find_by_id(&self, class_id: &str) -> RepositoryResult<Option<ClassEnrollmentConfig>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, class_id)
    }

    /// 按租户查询所有班级配置(供冲突扫描使用)
    pub fn list_by_institution(
        &self,
        institution_id: &str,
    ) -> RepositoryResult<Vec<ClassEnrollmentConfig>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM class_config WHERE institution_id = ?1 ORDER BY class_id",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let configs = stmt
            .query_map(params![institution_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(configs)
    }

    /// 插入或更新班级配置
    pub fn upsert(&self, config: &ClassEnrollmentConfig) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO class_config (
                class_id, institution_id, enrollment_mode, capacity, waitlist_capacity,
                allow_waitlist, max_waitlist_position,
                enrollment_start, enrollment_end, drop_deadline, withdraw_deadline,
                auto_approve, requires_justification, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, datetime('now'))
            "#,
            params![
                config.class_id,
                config.institution_id,
                config.enrollment_mode.to_db_str(),
                config.capacity,
                config.waitlist_capacity,
                config.allow_waitlist as i64,
                config.max_waitlist_position,
                config.enrollment_start.map(format_ts),
                config.enrollment_end.map(format_ts),
                config.drop_deadline.map(format_ts),
                config.withdraw_deadline.map(format_ts),
                config.auto_approve as i64,
                config.requires_justification as i64,
            ],
        )?;
        Ok(())
    }

    /// 调整班级容量(管理操作;容量变化后的候补晋升由引擎层触发)
    pub fn update_capacity(&self, class_id: &str, capacity: i32) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE class_config SET capacity = ?2, updated_at = datetime('now') WHERE class_id = ?1",
            params![class_id, capacity],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ClassConfig".to_string(),
                id: class_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 前置条件 / 限制条件
    // ==========================================

    /// 插入前置条件
    pub fn insert_prerequisite(&self, prereq: &Prerequisite) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO prerequisite (class_id, prereq_type, requirement, strict)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                prereq.class_id,
                prereq.prereq_type.to_db_str(),
                prereq.requirement,
                prereq.strict as i64,
            ],
        )?;
        Ok(())
    }

    /// 插入限制条件
    pub fn insert_restriction(&self, restriction: &Restriction) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO restriction (class_id, restriction_type, condition, overridable)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                restriction.class_id,
                restriction.restriction_type.to_db_str(),
                restriction.condition,
                restriction.overridable as i64,
            ],
        )?;
        Ok(())
    }

    /// 查询班级的全部前置条件
    pub fn prerequisites(&self, class_id: &str) -> RepositoryResult<Vec<Prerequisite>> {
        let conn = self.get_conn()?;
        Self::prerequisites_with(&conn, class_id)
    }

    pub fn prerequisites_with(
        conn: &Connection,
        class_id: &str,
    ) -> RepositoryResult<Vec<Prerequisite>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT class_id, prereq_type, requirement, strict
            FROM prerequisite
            WHERE class_id = ?1
            ORDER BY prereq_type, requirement
            "#,
        )?;
        let rows = stmt
            .query_map(params![class_id], |row| {
                let type_str: String = row.get(1)?;
                let prereq_type = RuleType::from_str(&type_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("未知规则类型: {}", type_str).into(),
                    )
                })?;
                Ok(Prerequisite {
                    class_id: row.get(0)?,
                    prereq_type,
                    requirement: row.get(2)?,
                    strict: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 查询班级的全部限制条件
    pub fn restrictions(&self, class_id: &str) -> RepositoryResult<Vec<Restriction>> {
        let conn = self.get_conn()?;
        Self::restrictions_with(&conn, class_id)
    }

    pub fn restrictions_with(
        conn: &Connection,
        class_id: &str,
    ) -> RepositoryResult<Vec<Restriction>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT class_id, restriction_type, condition, overridable
            FROM restriction
            WHERE class_id = ?1
            ORDER BY restriction_type, condition
            "#,
        )?;
        let rows = stmt
            .query_map(params![class_id], |row| {
                let type_str: String = row.get(1)?;
                let restriction_type = RuleType::from_str(&type_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("未知规则类型: {}", type_str).into(),
                    )
                })?;
                Ok(Restriction {
                    class_id: row.get(0)?,
                    restriction_type,
                    condition: row.get(2)?,
                    overridable: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}
