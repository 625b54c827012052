// ==========================================
// 选课准入系统 - 审批工作流引擎
// ==========================================
// 职责: RESTRICTED 模式审批申请的批准/拒绝/懒惰过期
// 红线: 仅 PENDING 且未超时的申请可决策; 终态申请不可变
// 红线: 批准时重新核对容量(容量可能已变化),满员回落候补而非失败
// 说明: 过期采用懒惰语义: 任何读取到超时 PENDING 的路径都把它
//       转为 EXPIRED 并只落一条审计
// ==========================================

use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::class_config::ClassEnrollmentConfig;
use crate::domain::enrollment::EnrollmentRequest;
use crate::domain::types::{Principal, RequestStatus};
use crate::engine::capacity::{AllocationOutcome, CapacityManager};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, OptionalEventPublisher};
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::class_config_repo::ClassConfigRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::request_repo::EnrollmentRequestRepository;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};
use uuid::Uuid;

// ==========================================
// ApprovalOutcome - 审批结果
// ==========================================
#[derive(Debug, Clone)]
pub enum ApprovalOutcome {
    /// 批准且直接入班
    ApprovedEnrolled { enrollment_id: String },
    /// 批准但容量已满,自动转入候补(产品决策: 不回询审批人)
    ApprovedWaitlisted {
        enrollment_id: String,
        position: i32,
        estimated_probability: f64,
    },
}

// ==========================================
// ApprovalEngine - 审批工作流引擎
// ==========================================
pub struct ApprovalEngine {
    conn: Arc<Mutex<Connection>>,
    capacity: Arc<CapacityManager>,
    events: OptionalEventPublisher,
}

impl ApprovalEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        capacity: Arc<CapacityManager>,
        events: OptionalEventPublisher,
    ) -> Self {
        Self {
            conn,
            capacity,
            events,
        }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取申请,附带懒惰过期
    ///
    /// # 规则
    /// - PENDING 且已过 expires_at 的申请在读取时转 EXPIRED 并落一条审计
    /// - 过期迁移只发生一次(finalize 仅更新 PENDING 行),重复读取不再写审计
    #[instrument(skip(self), fields(request_id = %request_id))]
    pub fn get_request(
        &self,
        request_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<EnrollmentRequest> {
        let request = {
            let conn = self.get_conn()?;
            EnrollmentRequestRepository::find_by_id_with(&conn, request_id)?
        }
        .ok_or_else(|| RepositoryError::NotFound {
            entity: "EnrollmentRequest".to_string(),
            id: request_id.to_string(),
        })?;

        if !request.is_overdue(now) {
            return Ok(request);
        }

        // 懒惰过期: 同事务完成状态迁移 + 审计
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        EnrollmentRequestRepository::finalize_with(
            &tx,
            request_id,
            RequestStatus::Expired,
            None,
            None,
            now,
        )?;
        let entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            request.institution_id.clone(),
            AuditAction::RequestExpired,
            "system".to_string(),
            now,
        )
        .with_student(request.student_id.clone())
        .with_class(request.class_id.clone())
        .with_reason("待审申请超时");
        AuditLogRepository::insert_with(&tx, &entry)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(request_id = %request_id, "待审申请懒惰过期");
        let mut expired = request;
        expired.status = RequestStatus::Expired;
        expired.reviewed_at = Some(now);
        Ok(expired)
    }

    /// 批准申请
    ///
    /// # 流程
    /// 1. 懒惰过期检查; 非 PENDING 拒绝
    /// 2. 班级锁 + 事务内: 申请转 APPROVED,重新核对容量并分配
    ///    (满员回落候补; 候补也满则整体回滚,申请保持 PENDING)
    /// 3. 审计 + 通知
    #[instrument(skip(self, principal), fields(request_id = %request_id))]
    pub fn approve(
        &self,
        principal: &Principal,
        request_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<ApprovalOutcome> {
        let request = self.get_request(request_id, now)?;
        if request.status != RequestStatus::Pending {
            return Err(RepositoryError::InvalidStateTransition {
                from: request.status.to_db_str().to_string(),
                to: "APPROVED".to_string(),
            });
        }
        let class_cfg = self.load_class(&request)?;

        let lock = self.capacity.class_lock(&request.class_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        EnrollmentRequestRepository::finalize_with(
            &tx,
            request_id,
            RequestStatus::Approved,
            Some(&principal.user_id),
            None,
            now,
        )?;

        // 决策时刻的容量重查: allocate_in_tx 自带审计
        let allocation = CapacityManager::allocate_in_tx(
            &tx,
            &class_cfg,
            &request.student_id,
            &principal.user_id,
            0,
            now,
        )?;

        let outcome = match allocation {
            AllocationOutcome::Enrolled { enrollment_id } => {
                ApprovalOutcome::ApprovedEnrolled { enrollment_id }
            }
            AllocationOutcome::Waitlisted {
                enrollment_id,
                position,
                estimated_probability,
            } => ApprovalOutcome::ApprovedWaitlisted {
                enrollment_id,
                position,
                estimated_probability,
            },
            AllocationOutcome::Rejected { message, .. } => {
                // 候补也满: 事务随 drop 回滚,申请保持 PENDING
                return Err(RepositoryError::BusinessRuleViolation(format!(
                    "批准失败,容量与候补均已满: {}",
                    message
                )));
            }
        };

        let entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            request.institution_id.clone(),
            AuditAction::Approved,
            principal.user_id.clone(),
            now,
        )
        .with_student(request.student_id.clone())
        .with_class(request.class_id.clone())
        .with_payload(&request);
        AuditLogRepository::insert_with(&tx, &entry)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        self.events.publish_quietly(EnrollmentEvent::new(
            request.institution_id.clone(),
            request.class_id.clone(),
            request.student_id.clone(),
            EnrollmentEventType::RequestApproved,
        ));
        Ok(outcome)
    }

    /// 拒绝申请
    ///
    /// # 红线
    /// 拒绝理由必填(非空)
    #[instrument(skip(self, principal, reason), fields(request_id = %request_id))]
    pub fn deny(
        &self,
        principal: &Principal,
        request_id: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        if reason.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "拒绝操作必须附理由".to_string(),
            ));
        }

        let request = self.get_request(request_id, now)?;
        if request.status != RequestStatus::Pending {
            return Err(RepositoryError::InvalidStateTransition {
                from: request.status.to_db_str().to_string(),
                to: "DENIED".to_string(),
            });
        }

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        EnrollmentRequestRepository::finalize_with(
            &tx,
            request_id,
            RequestStatus::Denied,
            Some(&principal.user_id),
            Some(reason.trim()),
            now,
        )?;
        let entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            request.institution_id.clone(),
            AuditAction::Denied,
            principal.user_id.clone(),
            now,
        )
        .with_student(request.student_id.clone())
        .with_class(request.class_id.clone())
        .with_reason(reason.trim());
        AuditLogRepository::insert_with(&tx, &entry)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        self.events.publish_quietly(
            EnrollmentEvent::new(
                request.institution_id.clone(),
                request.class_id.clone(),
                request.student_id.clone(),
                EnrollmentEventType::RequestDenied,
            )
            .with_detail(reason.trim()),
        );
        Ok(())
    }

    fn load_class(&self, request: &EnrollmentRequest) -> RepositoryResult<ClassEnrollmentConfig> {
        let conn = self.get_conn()?;
        ClassConfigRepository::find_by_id_with(&conn, &request.class_id)?.ok_or_else(|| {
            RepositoryError::NotFound {
                entity: "ClassConfig".to_string(),
                id: request.class_id.clone(),
            }
        })
    }
}
