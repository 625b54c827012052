// ==========================================
// 选课准入系统 - 班级选课配置领域模型
// ==========================================
// 职责: 班级维度的准入配置 + 同步校验
// 红线: 非法配置同步拒绝,绝不落库
// 说明: 配置由教务 CRUD 面(不在本核心范围内)维护,本核心只读消费
// ==========================================

use crate::domain::types::{EnrollmentMode, RuleType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ==========================================
// ClassEnrollmentConfig - 班级选课配置
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassEnrollmentConfig {
    pub class_id: String,
    pub institution_id: String,

    // ===== 准入模式与容量 =====
    pub enrollment_mode: EnrollmentMode,
    pub capacity: i32,            // 席位容量 (>= 1)
    pub waitlist_capacity: i32,   // 候补容量 (>= 0)
    pub allow_waitlist: bool,
    pub max_waitlist_position: Option<i32>, // 可选的候补截断位 (<= waitlist_capacity)

    // ===== 选课窗口与退课截止 =====
    pub enrollment_start: Option<NaiveDateTime>,
    pub enrollment_end: Option<NaiveDateTime>,
    pub drop_deadline: Option<NaiveDateTime>,
    pub withdraw_deadline: Option<NaiveDateTime>, // 必须晚于 drop_deadline

    // ===== 审批相关 =====
    pub auto_approve: bool,          // RESTRICTED 模式下跳过人工审批
    pub requires_justification: bool, // 提交申请必须附理由
}

impl ClassEnrollmentConfig {
    /// 校验配置合法性
    ///
    /// # 校验项
    /// 1. capacity >= 1, waitlist_capacity >= 0
    /// 2. enrollment_start < enrollment_end
    /// 3. drop_deadline < withdraw_deadline
    /// 4. max_waitlist_position <= waitlist_capacity
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.capacity < 1 {
            return Err(ConfigValidationError::InvalidCapacity {
                capacity: self.capacity,
            });
        }
        if self.waitlist_capacity < 0 {
            return Err(ConfigValidationError::InvalidWaitlistCapacity {
                waitlist_capacity: self.waitlist_capacity,
            });
        }
        if let (Some(start), Some(end)) = (self.enrollment_start, self.enrollment_end) {
            if start >= end {
                return Err(ConfigValidationError::InvalidEnrollmentWindow {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }
        if let (Some(drop), Some(withdraw)) = (self.drop_deadline, self.withdraw_deadline) {
            if drop >= withdraw {
                return Err(ConfigValidationError::InvalidDeadlineOrder {
                    drop_deadline: drop.to_string(),
                    withdraw_deadline: withdraw.to_string(),
                });
            }
        }
        if let Some(max_pos) = self.max_waitlist_position {
            if max_pos < 1 || max_pos > self.waitlist_capacity {
                return Err(ConfigValidationError::InvalidMaxWaitlistPosition {
                    max_position: max_pos,
                    waitlist_capacity: self.waitlist_capacity,
                });
            }
        }
        Ok(())
    }

    /// 候补位上限(取 max_waitlist_position 与 waitlist_capacity 的较小者)
    pub fn effective_waitlist_limit(&self) -> i32 {
        match self.max_waitlist_position {
            Some(max_pos) => max_pos.min(self.waitlist_capacity),
            None => self.waitlist_capacity,
        }
    }
}

// ==========================================
// ConfigValidationError - 配置校验错误
// ==========================================
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("容量非法: capacity={capacity} (必须 >= 1)")]
    InvalidCapacity { capacity: i32 },

    #[error("候补容量非法: waitlist_capacity={waitlist_capacity} (必须 >= 0)")]
    InvalidWaitlistCapacity { waitlist_capacity: i32 },

    #[error("选课窗口非法: start={start} 必须早于 end={end}")]
    InvalidEnrollmentWindow { start: String, end: String },

    #[error("退课截止顺序非法: drop_deadline={drop_deadline} 必须早于 withdraw_deadline={withdraw_deadline}")]
    InvalidDeadlineOrder {
        drop_deadline: String,
        withdraw_deadline: String,
    },

    #[error("候补截断位非法: max_position={max_position}, waitlist_capacity={waitlist_capacity}")]
    InvalidMaxWaitlistPosition {
        max_position: i32,
        waitlist_capacity: i32,
    },
}

// ==========================================
// Prerequisite - 前置条件
// ==========================================
// 附着在班级上,由规则引擎求值,绝不被引擎修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    pub class_id: String,
    pub prereq_type: RuleType,
    pub requirement: String, // 如 "MATH101" / "MATH101:C" / "3.0" / ">=2"
    pub strict: bool,        // strict=true 时不满足即阻断
}

// ==========================================
// Restriction - 限制条件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restriction {
    pub class_id: String,
    pub restriction_type: RuleType,
    pub condition: String,  // 如 "CS,SE" / "ENGINEERING"
    pub overridable: bool,  // overridable=true 时可由越权流程绕过
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base_config() -> ClassEnrollmentConfig {
        ClassEnrollmentConfig {
            class_id: "CLS001".to_string(),
            institution_id: "INST001".to_string(),
            enrollment_mode: EnrollmentMode::Open,
            capacity: 30,
            waitlist_capacity: 10,
            allow_waitlist: true,
            max_waitlist_position: None,
            enrollment_start: None,
            enrollment_end: None,
            drop_deadline: None,
            withdraw_deadline: None,
            auto_approve: false,
            requires_justification: false,
        }
    }

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_validate_ok() {
        let config = base_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = base_config();
        config.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidCapacity { .. }));
    }

    #[test]
    fn test_validate_rejects_negative_waitlist_capacity() {
        let mut config = base_config();
        config.waitlist_capacity = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = base_config();
        config.enrollment_start = Some(ts(2026, 9, 10));
        config.enrollment_end = Some(ts(2026, 9, 1));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidEnrollmentWindow { .. }));
    }

    #[test]
    fn test_validate_rejects_inverted_deadlines() {
        let mut config = base_config();
        config.drop_deadline = Some(ts(2026, 10, 15));
        config.withdraw_deadline = Some(ts(2026, 10, 1));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidDeadlineOrder { .. }));
    }

    #[test]
    fn test_validate_rejects_max_position_over_capacity() {
        let mut config = base_config();
        config.max_waitlist_position = Some(11); // waitlist_capacity=10
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigValidationError::InvalidMaxWaitlistPosition { .. }
        ));
    }

    #[test]
    fn test_effective_waitlist_limit() {
        let mut config = base_config();
        assert_eq!(config.effective_waitlist_limit(), 10);
        config.max_waitlist_position = Some(5);
        assert_eq!(config.effective_waitlist_limit(), 5);
    }
}
