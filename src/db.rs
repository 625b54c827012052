// ==========================================
// 选课准入系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免"部分模块外键开启/部分不开启"
// - 统一 busy_timeout，为所有后端等待设置上界，减少并发写入时的偶发 busy 错误
// - 集中建表，保证生产与测试使用同一份 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema（幂等）
///
/// # 说明
/// - 所有表使用 CREATE TABLE IF NOT EXISTS，重复调用安全
/// - 同时写入全局配置 scope 与默认角色越权能力（INSERT OR IGNORE）
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- ===== 配置 =====
        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        -- ===== 班级选课配置 =====
        CREATE TABLE IF NOT EXISTS class_config (
            class_id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL,
            enrollment_mode TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            waitlist_capacity INTEGER NOT NULL DEFAULT 0,
            allow_waitlist INTEGER NOT NULL DEFAULT 1,
            max_waitlist_position INTEGER,
            enrollment_start TEXT,
            enrollment_end TEXT,
            drop_deadline TEXT,
            withdraw_deadline TEXT,
            auto_approve INTEGER NOT NULL DEFAULT 0,
            requires_justification INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS prerequisite (
            class_id TEXT NOT NULL REFERENCES class_config(class_id) ON DELETE CASCADE,
            prereq_type TEXT NOT NULL,
            requirement TEXT NOT NULL,
            strict INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (class_id, prereq_type, requirement)
        );

        CREATE TABLE IF NOT EXISTS restriction (
            class_id TEXT NOT NULL REFERENCES class_config(class_id) ON DELETE CASCADE,
            restriction_type TEXT NOT NULL,
            condition TEXT NOT NULL,
            overridable INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (class_id, restriction_type, condition)
        );

        -- ===== 选课记录 =====
        CREATE TABLE IF NOT EXISTS enrollment (
            enrollment_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES class_config(class_id),
            student_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            status TEXT NOT NULL,
            enrolled_by TEXT NOT NULL,
            status_reason TEXT,
            enrolled_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_enrollment_class_status
          ON enrollment(class_id, status);
        CREATE INDEX IF NOT EXISTS idx_enrollment_student
          ON enrollment(student_id, enrolled_at);
        -- 同一学生在同一班级最多一条活动记录
        CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollment_active_unique
          ON enrollment(class_id, student_id)
          WHERE status IN ('ENROLLED', 'WAITLISTED');

        -- ===== 候补队列 =====
        CREATE TABLE IF NOT EXISTS waitlist_entry (
            class_id TEXT NOT NULL REFERENCES class_config(class_id),
            student_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            estimated_probability REAL NOT NULL,
            added_at TEXT NOT NULL,
            notified_at TEXT,
            notification_expires_at TEXT,
            PRIMARY KEY (class_id, student_id)
        );

        CREATE INDEX IF NOT EXISTS idx_waitlist_class_position
          ON waitlist_entry(class_id, position);

        -- ===== 审批制申请 =====
        CREATE TABLE IF NOT EXISTS enrollment_request (
            request_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES class_config(class_id),
            student_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            status TEXT NOT NULL,
            justification TEXT,
            requested_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            reviewed_by TEXT,
            reviewed_at TEXT,
            review_notes TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_request_class_status
          ON enrollment_request(class_id, status);
        CREATE INDEX IF NOT EXISTS idx_request_student
          ON enrollment_request(student_id, status);

        -- ===== 入班邀请 =====
        CREATE TABLE IF NOT EXISTS invitation (
            invitation_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES class_config(class_id),
            student_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            status TEXT NOT NULL,
            invited_by TEXT NOT NULL,
            invited_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_invitation_class_student
          ON invitation(class_id, student_id, status);

        -- ===== 冲突记录 =====
        CREATE TABLE IF NOT EXISTS conflict_record (
            conflict_id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            class_id TEXT,
            student_id TEXT,
            affected_students INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            detected_at TEXT NOT NULL,
            resolved_by TEXT,
            resolved_at TEXT,
            resolution TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conflict_institution_status
          ON conflict_record(institution_id, status);

        -- ===== 越权放行 =====
        CREATE TABLE IF NOT EXISTS override_request (
            override_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES class_config(class_id),
            student_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            override_type TEXT NOT NULL,
            status TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            approved_by TEXT,
            decided_at TEXT,
            notes TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_override_requester
          ON override_request(requested_by, override_type, requested_at);

        CREATE TABLE IF NOT EXISTS role_capability (
            scope_id TEXT NOT NULL DEFAULT 'global',
            role TEXT NOT NULL,
            override_type TEXT NOT NULL,
            max_per_period INTEGER NOT NULL,
            period_days INTEGER NOT NULL,
            requires_justification INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (scope_id, role, override_type)
        );

        -- ===== 审计日志 =====
        CREATE TABLE IF NOT EXISTS audit_log (
            audit_id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL,
            student_id TEXT,
            class_id TEXT,
            action TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            reason TEXT,
            detail TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_class
          ON audit_log(class_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_student
          ON audit_log(student_id, created_at);
        "#,
    )?;

    // 全局配置 scope
    conn.execute(
        r#"
        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global')
        "#,
        [],
    )?;

    // 默认角色越权能力(global 兜底,租户 scope 可覆写)
    conn.execute_batch(
        r#"
        INSERT OR IGNORE INTO role_capability
            (scope_id, role, override_type, max_per_period, period_days, requires_justification)
        VALUES
            ('global', 'INSTRUCTOR', 'PREREQUISITE_OVERRIDE', 10, 30, 1),
            ('global', 'REGISTRAR', 'CAPACITY_OVERRIDE', 20, 30, 1),
            ('global', 'REGISTRAR', 'PREREQUISITE_OVERRIDE', 20, 30, 1),
            ('global', 'ADMIN', 'CAPACITY_OVERRIDE', 100, 30, 0),
            ('global', 'ADMIN', 'PREREQUISITE_OVERRIDE', 100, 30, 0);
        "#,
    )?;

    // 标记 schema 版本
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}
