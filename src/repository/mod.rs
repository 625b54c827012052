// ==========================================
// 选课准入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑,只做数据映射
// 说明: 每个仓储同时提供实例方法与 `*_with(conn, ..)` 关联函数,
//       后者供引擎层在同一事务内组合多仓储写入
// ==========================================

pub mod audit_log_repo;
pub mod class_config_repo;
pub mod conflict_repo;
pub mod enrollment_repo;
pub mod error;
pub mod invitation_repo;
pub mod override_repo;
pub mod request_repo;
pub mod waitlist_repo;

pub use error::{RepositoryError, RepositoryResult};

use chrono::{NaiveDateTime, ParseError};

/// 时间戳统一存储格式
pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 格式化时间戳(与数据库一致)
pub(crate) fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 解析时间戳,失败时映射为 rusqlite 转换错误
pub(crate) fn parse_ts(idx: usize, raw: &str) -> Result<NaiveDateTime, rusqlite::Error> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT).map_err(|e: ParseError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// 解析可空时间戳
pub(crate) fn parse_ts_opt(
    idx: usize,
    raw: Option<String>,
) -> Result<Option<NaiveDateTime>, rusqlite::Error> {
    match raw {
        Some(s) => Ok(Some(parse_ts(idx, &s)?)),
        None => Ok(None),
    }
}
