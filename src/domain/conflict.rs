// ==========================================
// 选课准入系统 - 冲突与越权领域模型
// ==========================================
// 说明: ConflictRecord 由检测扫描创建,由处置/越权流程关闭;
//       RoleCapability 是"角色可用越权菜单"数据表的内存映射(数据而非代码)
// ==========================================

use crate::domain::types::{
    ConflictSeverity, ConflictStatus, ConflictType, OverrideStatus, OverrideType, Role,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// ConflictRecord - 冲突记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: String,
    pub institution_id: String,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub class_id: Option<String>,   // CAPACITY_EXCEEDED 时为班级
    pub student_id: Option<String>, // SUSPICIOUS_ACTIVITY 时为学生
    pub affected_students: i32,
    pub description: String,
    pub status: ConflictStatus,
    pub detected_at: NaiveDateTime,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolution: Option<String>,
}

// ==========================================
// OverrideRequest - 越权放行请求
// ==========================================
// 终态 APPROVED/DENIED 后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub override_id: String,
    pub class_id: String,
    pub student_id: String,
    pub institution_id: String,
    pub override_type: OverrideType,
    pub status: OverrideStatus,
    pub requested_by: String,
    pub requested_at: NaiveDateTime,
    pub approved_by: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

// ==========================================
// RoleCapability - 角色越权能力
// ==========================================
// 每个角色一份固定的越权类型菜单 + 周期配额 + 是否必附理由
// 按 scope_id 支持租户覆写(global 为兜底)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleCapability {
    pub scope_id: String,
    pub role: Role,
    pub override_type: OverrideType,
    pub max_per_period: i32,
    pub period_days: i32,
    pub requires_justification: bool,
}
