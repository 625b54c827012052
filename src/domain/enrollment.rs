// ==========================================
// 选课准入系统 - 选课记录领域模型
// ==========================================
// 红线: Enrollment 为软状态记录,终态 DROPPED/COMPLETED 永不删除
// 红线: WaitlistEntry.position 为 1 起始稠密序号,任何移除后必须重排
// ==========================================

use crate::domain::types::{EnrollmentStatus, InvitationStatus, RequestStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Enrollment - 选课记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: String,
    pub class_id: String,
    pub student_id: String,
    pub institution_id: String,
    pub status: EnrollmentStatus,
    pub enrolled_by: String,           // 操作主体(本人或教务)
    pub status_reason: Option<String>, // 最近一次状态变化的原因
    pub enrolled_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Enrollment {
    /// 创建新的选课记录
    pub fn new(
        enrollment_id: String,
        class_id: String,
        student_id: String,
        institution_id: String,
        status: EnrollmentStatus,
        enrolled_by: String,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            enrollment_id,
            class_id,
            student_id,
            institution_id,
            status,
            enrolled_by,
            status_reason: None,
            enrolled_at: now,
            updated_at: now,
        }
    }
}

// ==========================================
// WaitlistEntry - 候补队列条目
// ==========================================
// 排序键: priority DESC, added_at ASC
// notified_at/notification_expires_at 记录晋升保留窗口
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub class_id: String,
    pub student_id: String,
    pub position: i32,              // 1 起始稠密序号
    pub priority: i32,              // 越大越优先
    pub estimated_probability: f64, // clamp(1 - position*0.1, 0.1, 0.9)
    pub added_at: NaiveDateTime,
    pub notified_at: Option<NaiveDateTime>,
    pub notification_expires_at: Option<NaiveDateTime>,
}

impl WaitlistEntry {
    /// 晋升保留是否仍然有效
    pub fn has_active_hold(&self, now: NaiveDateTime) -> bool {
        match (self.notified_at, self.notification_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            _ => false,
        }
    }
}

// ==========================================
// EnrollmentRequest - 审批制选课申请
// ==========================================
// 仅 RESTRICTED 模式使用; PENDING 为唯一非终态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub request_id: String,
    pub class_id: String,
    pub student_id: String,
    pub institution_id: String,
    pub status: RequestStatus,
    pub justification: Option<String>,
    pub requested_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_notes: Option<String>,
}

impl EnrollmentRequest {
    /// 是否已超过待审时限(按读取时刻判定,懒惰过期)
    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        self.status == RequestStatus::Pending && now >= self.expires_at
    }
}

// ==========================================
// Invitation - 入班邀请
// ==========================================
// INVITATION_ONLY 模式的准入凭证
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub invitation_id: String,
    pub class_id: String,
    pub student_id: String,
    pub institution_id: String,
    pub status: InvitationStatus,
    pub invited_by: String,
    pub invited_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl Invitation {
    /// 邀请是否仍然有效(未接受/未拒绝且未过期)
    pub fn is_live(&self, now: NaiveDateTime) -> bool {
        self.status == InvitationStatus::Pending && now < self.expires_at
    }
}
