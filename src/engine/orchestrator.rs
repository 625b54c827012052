// ==========================================
// 选课准入系统 - 选课编排器
// ==========================================
// 职责: 驱动单个选课请求从提交到终态的状态机
// 红线: "活动记录检查 -> 规则判定 -> 席位分配 -> 审计写入"
//       是一个原子单元,同一事务内同落或同滚
// 红线: 重复请求是幂等空操作,返回现有状态而非报错
// 状态机: requested -> {eligibility_failed, enrolled, waitlisted, pending_approval}
//                   -> {enrolled, waitlisted, denied, expired}
//                   -> {dropped, completed}
// ==========================================

use crate::config::enroll_config_trait::EnrollConfigReader;
use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::class_config::ClassEnrollmentConfig;
use crate::domain::enrollment::EnrollmentRequest;
use crate::domain::types::{
    EnrollmentMode, EnrollmentStatus, InvitationStatus, Principal, RequestStatus, Role,
};
use crate::engine::capacity::{AllocationOutcome, CapacityManager};
use crate::engine::eligibility::{EligibilityEngine, EligibilityReason, StudentFactsProvider};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, OptionalEventPublisher};
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::class_config_repo::ClassConfigRepository;
use crate::repository::enrollment_repo::EnrollmentRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::invitation_repo::InvitationRepository;
use crate::repository::request_repo::EnrollmentRequestRepository;
use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// EnrollmentOutcome - 选课结果
// ==========================================
// 封闭判别类型: 预期内的每种走向都是结果而非错误
#[derive(Debug, Clone)]
pub enum EnrollmentOutcome {
    Enrolled {
        enrollment_id: String,
    },
    Waitlisted {
        enrollment_id: String,
        position: i32,
        estimated_probability: f64,
    },
    PendingApproval {
        request_id: String,
        expires_at: NaiveDateTime,
    },
    EligibilityFailed {
        reasons: Vec<EligibilityReason>,
    },
    /// 幂等命中: 该 (学生, 班级) 已有活动记录
    AlreadyActive {
        status: EnrollmentStatus,
    },
    Rejected {
        code: String,
        message: String,
    },
}

// ==========================================
// BulkEnrollReport - 批量选课结果
// ==========================================
#[derive(Debug, Clone)]
pub struct BulkEnrollItem {
    pub student_id: String,
    pub outcome: Option<EnrollmentOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BulkEnrollReport {
    pub total: usize,
    pub enrolled: usize,
    pub waitlisted: usize,
    pub pending: usize,
    pub rejected: usize,
    pub failed: usize,
    pub items: Vec<BulkEnrollItem>,
}

// ==========================================
// EnrollmentOrchestrator - 选课编排器
// ==========================================
pub struct EnrollmentOrchestrator<C>
where
    C: EnrollConfigReader,
{
    conn: Arc<Mutex<Connection>>,
    capacity: Arc<CapacityManager>,
    eligibility: EligibilityEngine,
    facts: Arc<dyn StudentFactsProvider>,
    config: Arc<C>,
    events: OptionalEventPublisher,
}

impl<C> EnrollmentOrchestrator<C>
where
    C: EnrollConfigReader,
{
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        capacity: Arc<CapacityManager>,
        facts: Arc<dyn StudentFactsProvider>,
        config: Arc<C>,
        events: OptionalEventPublisher,
    ) -> Self {
        Self {
            conn,
            capacity,
            eligibility: EligibilityEngine::new(),
            facts,
            config,
            events,
        }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 载入班级配置并做租户/权限前置检查
    fn load_class_checked(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
    ) -> RepositoryResult<ClassEnrollmentConfig> {
        let config = {
            let conn = self.get_conn()?;
            ClassConfigRepository::find_by_id_with(&conn, class_id)?
        }
        .ok_or_else(|| RepositoryError::NotFound {
            entity: "ClassConfig".to_string(),
            id: class_id.to_string(),
        })?;

        config
            .validate()
            .map_err(|e| RepositoryError::ValidationError(e.to_string()))?;

        if principal.institution_id != config.institution_id {
            return Err(RepositoryError::AuthorizationDenied(
                "跨租户操作被拒绝".to_string(),
            ));
        }
        // 学生只能为本人操作; 教务可代办
        if principal.role == Role::Student && principal.user_id != student_id {
            return Err(RepositoryError::AuthorizationDenied(
                "学生只能操作本人的选课".to_string(),
            ));
        }
        Ok(config)
    }

    // ==========================================
    // 选课请求
    // ==========================================

    /// 提交选课请求
    ///
    /// # 流程
    /// 1. 活动记录检查(幂等空操作)
    /// 2. 规则引擎判定,不可越权的 ERROR 即 eligibility_failed
    /// 3. 按 enrollment_mode 分支: OPEN 直接分配 / RESTRICTED 建审批申请
    ///    / INVITATION_ONLY 校验有效邀请
    /// 4. 每次状态迁移同事务写一条审计
    #[instrument(skip(self, principal, justification), fields(student_id = %student_id, class_id = %class_id))]
    pub async fn request_enrollment(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        justification: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<EnrollmentOutcome> {
        let class_cfg = self.load_class_checked(principal, student_id, class_id)?;

        // 进入临界区前完成全部异步配置读取
        let expiry_days = self
            .config
            .get_request_expiry_days(&class_cfg.institution_id)
            .await
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        // 学生事实(外部提供方,可能失败 -> system 类错误)
        let facts = self
            .facts
            .facts(&class_cfg.institution_id, student_id)
            .map_err(|e| RepositoryError::InternalError(format!("学生事实获取失败: {}", e)))?;

        let (prereqs, restrictions) = {
            let conn = self.get_conn()?;
            (
                ClassConfigRepository::prerequisites_with(&conn, class_id)?,
                ClassConfigRepository::restrictions_with(&conn, class_id)?,
            )
        };

        // ===== 临界区: 班级锁 + 事务 =====
        let lock = self.capacity.class_lock(class_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        // 步骤 1: 幂等检查(无写入,事务随 drop 回滚)
        if let Some(existing) = EnrollmentRepository::find_active_with(&tx, class_id, student_id)? {
            info!(status = %existing.status, "重复选课请求,返回现有状态");
            return Ok(EnrollmentOutcome::AlreadyActive {
                status: existing.status,
            });
        }
        if let Some(pending) =
            EnrollmentRequestRepository::find_pending_with(&tx, class_id, student_id)?
        {
            if !pending.is_overdue(now) {
                return Ok(EnrollmentOutcome::PendingApproval {
                    request_id: pending.request_id,
                    expires_at: pending.expires_at,
                });
            }
            // 旧申请懒惰过期后继续走新请求
            EnrollmentRequestRepository::finalize_with(
                &tx,
                &pending.request_id,
                RequestStatus::Expired,
                None,
                None,
                now,
            )?;
            Self::audit_in_tx(
                &tx,
                &class_cfg,
                student_id,
                "system",
                AuditAction::RequestExpired,
                Some("待审申请超时"),
                now,
            )?;
        }

        // 步骤 2: 规则判定
        let evaluation =
            self.eligibility
                .evaluate(&facts, &class_cfg, &prereqs, &restrictions, now);
        if !evaluation.eligible {
            Self::audit_in_tx(
                &tx,
                &class_cfg,
                student_id,
                &principal.user_id,
                AuditAction::EligibilityFailed,
                Some(&evaluation.reason_summary()),
                now,
            )?;
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            return Ok(EnrollmentOutcome::EligibilityFailed {
                reasons: evaluation.reasons,
            });
        }

        // 步骤 3: 按模式分支
        match class_cfg.enrollment_mode {
            EnrollmentMode::Open => {
                let outcome = CapacityManager::allocate_in_tx(
                    &tx,
                    &class_cfg,
                    student_id,
                    &principal.user_id,
                    0,
                    now,
                )?;
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(Self::map_allocation(outcome))
            }
            EnrollmentMode::Restricted => {
                if class_cfg.requires_justification
                    && justification.map_or(true, |j| j.trim().is_empty())
                {
                    return Err(RepositoryError::ValidationError(
                        "该班级要求选课申请附理由".to_string(),
                    ));
                }

                if class_cfg.auto_approve {
                    // 自动审批: 短路为 OPEN 式分配
                    let outcome = CapacityManager::allocate_in_tx(
                        &tx,
                        &class_cfg,
                        student_id,
                        &principal.user_id,
                        0,
                        now,
                    )?;
                    tx.commit()
                        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                    return Ok(Self::map_allocation(outcome));
                }

                let request = EnrollmentRequest {
                    request_id: Uuid::new_v4().to_string(),
                    class_id: class_id.to_string(),
                    student_id: student_id.to_string(),
                    institution_id: class_cfg.institution_id.clone(),
                    status: RequestStatus::Pending,
                    justification: justification.map(|j| j.trim().to_string()),
                    requested_at: now,
                    expires_at: now + Duration::days(expiry_days),
                    reviewed_by: None,
                    reviewed_at: None,
                    review_notes: None,
                };
                EnrollmentRequestRepository::insert_with(&tx, &request)?;
                Self::audit_in_tx(
                    &tx,
                    &class_cfg,
                    student_id,
                    &principal.user_id,
                    AuditAction::ApprovalRequested,
                    justification,
                    now,
                )?;
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

                self.events.publish_quietly(EnrollmentEvent::new(
                    class_cfg.institution_id.clone(),
                    class_id,
                    student_id,
                    EnrollmentEventType::RequestSubmitted,
                ));
                Ok(EnrollmentOutcome::PendingApproval {
                    request_id: request.request_id,
                    expires_at: request.expires_at,
                })
            }
            EnrollmentMode::InvitationOnly => {
                let Some(invitation) =
                    InvitationRepository::find_live_with(&tx, class_id, student_id, now)?
                else {
                    Self::audit_in_tx(
                        &tx,
                        &class_cfg,
                        student_id,
                        &principal.user_id,
                        AuditAction::EligibilityFailed,
                        Some("invitation_required"),
                        now,
                    )?;
                    tx.commit()
                        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                    return Ok(EnrollmentOutcome::Rejected {
                        code: "invitation_required".to_string(),
                        message: "该班级仅限受邀学生,且需持有有效邀请".to_string(),
                    });
                };

                // 持有效邀请的请求即视为接受邀请,走 OPEN 式分配
                InvitationRepository::finalize_with(
                    &tx,
                    &invitation.invitation_id,
                    InvitationStatus::Accepted,
                )?;
                Self::audit_in_tx(
                    &tx,
                    &class_cfg,
                    student_id,
                    &principal.user_id,
                    AuditAction::InvitationAccepted,
                    None,
                    now,
                )?;
                let outcome = CapacityManager::allocate_in_tx(
                    &tx,
                    &class_cfg,
                    student_id,
                    &principal.user_id,
                    0,
                    now,
                )?;
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(Self::map_allocation(outcome))
            }
        }
    }

    /// 接受入班邀请(等价于对 INVITATION_ONLY 班级提交请求)
    pub async fn accept_invitation(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<EnrollmentOutcome> {
        self.request_enrollment(principal, student_id, class_id, None, now)
            .await
    }

    // ==========================================
    // 退课 / 结课
    // ==========================================

    /// 退课
    ///
    /// # 规则
    /// - 仅允许从 ENROLLED 退出
    /// - 晚于 withdraw_deadline 拒绝; 晚于 drop_deadline 按"退选(withdrawn)"记录
    /// - 释放席位后触发候补晋升
    #[instrument(skip(self, principal), fields(student_id = %student_id, class_id = %class_id))]
    pub async fn drop_student(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let class_cfg = self.load_class_checked(principal, student_id, class_id)?;

        if let Some(withdraw_deadline) = class_cfg.withdraw_deadline {
            if now > withdraw_deadline {
                return Err(RepositoryError::BusinessRuleViolation(
                    "退课窗口已关闭,无法退出".to_string(),
                ));
            }
        }
        let effective_reason = match class_cfg.drop_deadline {
            Some(drop_deadline) if now > drop_deadline => format!("withdrawn: {}", reason),
            _ => reason.to_string(),
        };

        let hold_hours = self
            .config
            .get_promotion_hold_hours(&class_cfg.institution_id)
            .await
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        self.capacity.release(
            &class_cfg,
            student_id,
            &effective_reason,
            &principal.user_id,
            hold_hours,
            now,
        )
    }

    /// 结课: 学期结束由教务将在班学生转为 COMPLETED
    pub fn complete_enrollment(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        if !principal.role.is_staff() {
            return Err(RepositoryError::AuthorizationDenied(
                "结课操作仅限教务角色".to_string(),
            ));
        }
        let class_cfg = self.load_class_checked(principal, student_id, class_id)?;

        let lock = self.capacity.class_lock(class_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let enrollment = EnrollmentRepository::find_active_with(&tx, class_id, student_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Enrollment".to_string(),
                id: format!("{}/{}", class_id, student_id),
            })?;
        if enrollment.status != EnrollmentStatus::Enrolled {
            return Err(RepositoryError::InvalidStateTransition {
                from: enrollment.status.to_db_str().to_string(),
                to: "COMPLETED".to_string(),
            });
        }
        EnrollmentRepository::update_status_with(
            &tx,
            &enrollment.enrollment_id,
            EnrollmentStatus::Completed,
            Some("term_completed"),
            now,
        )?;
        Self::audit_in_tx(
            &tx,
            &class_cfg,
            student_id,
            &principal.user_id,
            AuditAction::Completed,
            None,
            now,
        )?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    // ==========================================
    // 批量选课
    // ==========================================

    /// 批量选课: 逐个执行,不跨批原子,失败项记录在结果中
    ///
    /// # 红线
    /// 单个失败不终止批次,也不自动重试
    #[instrument(skip(self, principal, student_ids), fields(class_id = %class_id, batch = student_ids.len()))]
    pub async fn bulk_enroll(
        &self,
        principal: &Principal,
        student_ids: &[String],
        class_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<BulkEnrollReport> {
        if !principal.role.is_staff() {
            return Err(RepositoryError::AuthorizationDenied(
                "批量选课仅限教务角色".to_string(),
            ));
        }

        let mut report = BulkEnrollReport {
            total: student_ids.len(),
            ..Default::default()
        };

        for student_id in student_ids {
            match self
                .request_enrollment(principal, student_id, class_id, None, now)
                .await
            {
                Ok(outcome) => {
                    match &outcome {
                        EnrollmentOutcome::Enrolled { .. } => report.enrolled += 1,
                        EnrollmentOutcome::Waitlisted { .. } => report.waitlisted += 1,
                        EnrollmentOutcome::PendingApproval { .. } => report.pending += 1,
                        EnrollmentOutcome::AlreadyActive { status } => match status {
                            EnrollmentStatus::Waitlisted => report.waitlisted += 1,
                            _ => report.enrolled += 1,
                        },
                        EnrollmentOutcome::EligibilityFailed { .. }
                        | EnrollmentOutcome::Rejected { .. } => report.rejected += 1,
                    }
                    report.items.push(BulkEnrollItem {
                        student_id: student_id.clone(),
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(student_id = %student_id, error = %e, "批量选课单项失败");
                    report.failed += 1;
                    report.items.push(BulkEnrollItem {
                        student_id: student_id.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            total = report.total,
            enrolled = report.enrolled,
            waitlisted = report.waitlisted,
            pending = report.pending,
            rejected = report.rejected,
            failed = report.failed,
            "批量选课完成"
        );
        Ok(report)
    }

    // ==========================================
    // 辅助
    // ==========================================

    fn map_allocation(outcome: AllocationOutcome) -> EnrollmentOutcome {
        match outcome {
            AllocationOutcome::Enrolled { enrollment_id } => {
                EnrollmentOutcome::Enrolled { enrollment_id }
            }
            AllocationOutcome::Waitlisted {
                enrollment_id,
                position,
                estimated_probability,
            } => EnrollmentOutcome::Waitlisted {
                enrollment_id,
                position,
                estimated_probability,
            },
            AllocationOutcome::Rejected { code, message } => {
                EnrollmentOutcome::Rejected { code, message }
            }
        }
    }

    fn audit_in_tx(
        tx: &Connection,
        config: &ClassEnrollmentConfig,
        student_id: &str,
        performed_by: &str,
        action: AuditAction,
        reason: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let mut entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            config.institution_id.clone(),
            action,
            performed_by.to_string(),
            now,
        )
        .with_student(student_id)
        .with_class(config.class_id.clone());
        if let Some(reason) = reason {
            entry = entry.with_reason(reason);
        }
        AuditLogRepository::insert_with(tx, &entry)
    }
}
