// ==========================================
// 选课准入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、租户覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: scope_id 即租户(院校)ID; 未配置的键回退 'global' scope,
//       global 亦无配置时使用内置默认值
// ==========================================

use crate::config::enroll_config_trait::EnrollConfigReader;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ===== 内置默认值 =====
const DEFAULT_SUSPICIOUS_THRESHOLD: i64 = 10;
const DEFAULT_SUSPICIOUS_WINDOW_HOURS: i64 = 24;
const DEFAULT_BURST_THRESHOLD: i64 = 5;
const DEFAULT_BURST_WINDOW_HOURS: i64 = 1;
const DEFAULT_PROMOTION_HOLD_HOURS: i64 = 24;
const DEFAULT_REQUEST_EXPIRY_DAYS: i64 = 7;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值(单一 scope)
    fn get_scoped_value(
        &self,
        scope_id: &str,
        key: &str,
    ) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![scope_id, key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取配置值: 租户 scope 优先, 回退 global
    pub fn get_config_value(
        &self,
        institution_id: &str,
        key: &str,
    ) -> Result<Option<String>, Box<dyn Error>> {
        if let Some(value) = self.get_scoped_value(institution_id, key)? {
            return Ok(Some(value));
        }
        self.get_scoped_value("global", key)
    }

    /// 读取整数配置, 未配置时使用默认值
    fn get_i64_or_default(
        &self,
        institution_id: &str,
        key: &str,
        default: i64,
    ) -> Result<i64, Box<dyn Error>> {
        match self.get_config_value(institution_id, key)? {
            Some(raw) => {
                let parsed = raw.trim().parse::<i64>().map_err(|e| {
                    format!("配置 {} 解析失败 (value={}): {}", key, raw, e)
                })?;
                Ok(parsed)
            }
            None => Ok(default),
        }
    }

    /// 写入租户配置(自动补建 scope 行)
    pub fn set_config_value(
        &self,
        institution_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            r#"
            INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
            VALUES (?1, 'INSTITUTION', ?1)
            "#,
            params![institution_id],
        )?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            "#,
            params![institution_id, key, value],
        )?;
        Ok(())
    }
}

// ==========================================
// EnrollConfigReader 实现
// ==========================================
#[async_trait]
impl EnrollConfigReader for ConfigManager {
    async fn get_suspicious_threshold(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(
            institution_id,
            "suspicious_enrollment_threshold",
            DEFAULT_SUSPICIOUS_THRESHOLD,
        )
    }

    async fn get_suspicious_window_hours(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(
            institution_id,
            "suspicious_window_hours",
            DEFAULT_SUSPICIOUS_WINDOW_HOURS,
        )
    }

    async fn get_burst_threshold(&self, institution_id: &str) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(institution_id, "burst_enrollment_threshold", DEFAULT_BURST_THRESHOLD)
    }

    async fn get_burst_window_hours(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(institution_id, "burst_window_hours", DEFAULT_BURST_WINDOW_HOURS)
    }

    async fn get_promotion_hold_hours(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(
            institution_id,
            "promotion_hold_hours",
            DEFAULT_PROMOTION_HOLD_HOURS,
        )
    }

    async fn get_request_expiry_days(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>> {
        self.get_i64_or_default(
            institution_id,
            "request_expiry_days",
            DEFAULT_REQUEST_EXPIRY_DAYS,
        )
    }
}
