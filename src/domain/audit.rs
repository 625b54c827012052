// ==========================================
// 选课准入系统 - 审计日志领域模型
// ==========================================
// 红线: 所有状态迁移必须落一条审计; 只追加,不更新,不删除
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// AuditAction - 审计动作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    EligibilityFailed,  // 规则判定不通过
    Enrolled,           // 直接入班
    Waitlisted,         // 进入候补
    CapacityRejected,   // 容量不足被拒
    ApprovalRequested,  // 创建审批申请
    Approved,           // 审批通过
    Denied,             // 审批拒绝
    RequestExpired,     // 申请懒惰过期
    Dropped,            // 退课
    Completed,          // 结课
    Promoted,           // 候补晋升(席位保留)
    PromotionAccepted,  // 晋升接受
    PromotionExpired,   // 晋升保留超时
    InvitationAccepted, // 邀请接受
    OverrideRequested,  // 提交越权请求
    OverrideApproved,   // 越权批准
    OverrideDenied,     // 越权拒绝
    ConflictResolved,   // 冲突处置
}

impl AuditAction {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EligibilityFailed => "EligibilityFailed",
            AuditAction::Enrolled => "Enrolled",
            AuditAction::Waitlisted => "Waitlisted",
            AuditAction::CapacityRejected => "CapacityRejected",
            AuditAction::ApprovalRequested => "ApprovalRequested",
            AuditAction::Approved => "Approved",
            AuditAction::Denied => "Denied",
            AuditAction::RequestExpired => "RequestExpired",
            AuditAction::Dropped => "Dropped",
            AuditAction::Completed => "Completed",
            AuditAction::Promoted => "Promoted",
            AuditAction::PromotionAccepted => "PromotionAccepted",
            AuditAction::PromotionExpired => "PromotionExpired",
            AuditAction::InvitationAccepted => "InvitationAccepted",
            AuditAction::OverrideRequested => "OverrideRequested",
            AuditAction::OverrideApproved => "OverrideApproved",
            AuditAction::OverrideDenied => "OverrideDenied",
            AuditAction::ConflictResolved => "ConflictResolved",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EligibilityFailed" => Some(AuditAction::EligibilityFailed),
            "Enrolled" => Some(AuditAction::Enrolled),
            "Waitlisted" => Some(AuditAction::Waitlisted),
            "CapacityRejected" => Some(AuditAction::CapacityRejected),
            "ApprovalRequested" => Some(AuditAction::ApprovalRequested),
            "Approved" => Some(AuditAction::Approved),
            "Denied" => Some(AuditAction::Denied),
            "RequestExpired" => Some(AuditAction::RequestExpired),
            "Dropped" => Some(AuditAction::Dropped),
            "Completed" => Some(AuditAction::Completed),
            "Promoted" => Some(AuditAction::Promoted),
            "PromotionAccepted" => Some(AuditAction::PromotionAccepted),
            "PromotionExpired" => Some(AuditAction::PromotionExpired),
            "InvitationAccepted" => Some(AuditAction::InvitationAccepted),
            "OverrideRequested" => Some(AuditAction::OverrideRequested),
            "OverrideApproved" => Some(AuditAction::OverrideApproved),
            "OverrideDenied" => Some(AuditAction::OverrideDenied),
            "ConflictResolved" => Some(AuditAction::ConflictResolved),
            _ => None,
        }
    }
}

// ==========================================
// AuditLogEntry - 审计日志条目
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub audit_id: String,
    pub institution_id: String,
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub action: String, // AuditAction 的字符串形式
    pub performed_by: String,
    pub reason: Option<String>,
    pub detail: Option<String>,
    pub created_at: NaiveDateTime,
}

impl AuditLogEntry {
    /// 创建新的审计条目
    ///
    /// # 参数
    /// - `audit_id`: 条目ID (通常使用UUID)
    /// - `institution_id`: 租户(院校)ID
    /// - `action`: 动作类型
    /// - `performed_by`: 操作主体
    pub fn new(
        audit_id: String,
        institution_id: String,
        action: AuditAction,
        performed_by: String,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            audit_id,
            institution_id,
            student_id: None,
            class_id: None,
            action: action.as_str().to_string(),
            performed_by,
            reason: None,
            detail: None,
            created_at: now,
        }
    }

    /// 设置关联学生
    pub fn with_student(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = Some(student_id.into());
        self
    }

    /// 设置关联班级
    pub fn with_class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = Some(class_id.into());
        self
    }

    /// 设置原因
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// 设置详情
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// 设置操作负载 (序列化为 JSON 存入 detail)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.detail = serde_json::to_string(payload).ok();
        self
    }
}
