// ==========================================
// 选课准入系统 - 越权放行引擎
// ==========================================
// 职责: 越权请求的提交/批准/拒绝,以及角色能力与配额校验
// 红线: 角色能力是数据(role_capability 表)而非代码分支,按租户可覆写
// 红线: 配额与理由校验发生在任何状态写入之前
// 说明: 批准后的纠正性变更回调容量管理器:
//       CAPACITY_OVERRIDE  -> 为单个学生突破名义容量一个席位
//       PREREQUISITE_OVERRIDE -> 绕过规则引擎直接分配(容量规则仍生效)
// ==========================================

use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::class_config::ClassEnrollmentConfig;
use crate::domain::conflict::OverrideRequest;
use crate::domain::types::{OverrideStatus, OverrideType, Principal};
use crate::engine::capacity::{AllocationOutcome, CapacityManager};
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::class_config_repo::ClassConfigRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::override_repo::OverrideRepository;
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

// ==========================================
// OverrideEngine - 越权放行引擎
// ==========================================
pub struct OverrideEngine {
    classes: Arc<ClassConfigRepository>,
    overrides: Arc<OverrideRepository>,
    audits: Arc<AuditLogRepository>,
    capacity: Arc<CapacityManager>,
}

impl OverrideEngine {
    pub fn new(
        classes: Arc<ClassConfigRepository>,
        overrides: Arc<OverrideRepository>,
        audits: Arc<AuditLogRepository>,
        capacity: Arc<CapacityManager>,
    ) -> Self {
        Self {
            classes,
            overrides,
            audits,
            capacity,
        }
    }

    /// 校验主体对该越权类型的能力与配额
    ///
    /// # 规则
    /// 1. role_capability 无对应行 -> 权限不足
    /// 2. requires_justification 且未附理由 -> 校验失败
    /// 3. 周期窗口内 PENDING+APPROVED 计数达到 max_per_period -> 配额用尽
    fn check_capability(
        &self,
        principal: &Principal,
        override_type: OverrideType,
        justification: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let capability = self
            .overrides
            .find_capability(&principal.institution_id, principal.role, override_type)?
            .ok_or_else(|| {
                RepositoryError::AuthorizationDenied(format!(
                    "角色 {} 不具备 {} 越权能力",
                    principal.role, override_type
                ))
            })?;

        if capability.requires_justification
            && justification.map_or(true, |j| j.trim().is_empty())
        {
            return Err(RepositoryError::ValidationError(format!(
                "{} 越权必须附理由",
                override_type
            )));
        }

        let window_start = now - Duration::days(capability.period_days as i64);
        let used =
            self.overrides
                .count_in_period(&principal.user_id, override_type, window_start)?;
        if used >= capability.max_per_period as i64 {
            return Err(RepositoryError::BusinessRuleViolation(format!(
                "越权配额已用尽: {} 天窗口内已用 {}/{}",
                capability.period_days, used, capability.max_per_period
            )));
        }
        Ok(())
    }

    /// 提交越权请求
    #[instrument(skip(self, principal, justification), fields(class_id = %class_id, student_id = %student_id, override_type = %override_type))]
    pub fn request_override(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        override_type: OverrideType,
        justification: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<OverrideRequest> {
        let class_cfg = self.load_class(principal, class_id)?;
        self.check_capability(principal, override_type, justification, now)?;

        let request = OverrideRequest {
            override_id: Uuid::new_v4().to_string(),
            class_id: class_id.to_string(),
            student_id: student_id.to_string(),
            institution_id: class_cfg.institution_id.clone(),
            override_type,
            status: OverrideStatus::Pending,
            requested_by: principal.user_id.clone(),
            requested_at: now,
            approved_by: None,
            decided_at: None,
            notes: justification.map(|j| j.trim().to_string()),
        };
        self.overrides.insert(&request)?;

        let entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            class_cfg.institution_id,
            AuditAction::OverrideRequested,
            principal.user_id.clone(),
            now,
        )
        .with_student(student_id)
        .with_class(class_id)
        .with_detail(format!("override_type={}", override_type));
        self.audits.insert(&entry)?;

        info!(override_id = %request.override_id, "越权请求已提交");
        Ok(request)
    }

    /// 批准越权请求并执行纠正性变更
    #[instrument(skip(self, principal, notes), fields(override_id = %override_id))]
    pub fn approve_override(
        &self,
        principal: &Principal,
        override_id: &str,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> RepositoryResult<AllocationOutcome> {
        let request = self
            .overrides
            .find_by_id(override_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "OverrideRequest".to_string(),
                id: override_id.to_string(),
            })?;
        if request.status != OverrideStatus::Pending {
            return Err(RepositoryError::InvalidStateTransition {
                from: request.status.to_db_str().to_string(),
                to: "APPROVED".to_string(),
            });
        }
        if request.institution_id != principal.institution_id {
            return Err(RepositoryError::AuthorizationDenied(
                "跨租户操作被拒绝".to_string(),
            ));
        }
        // 审批人自身必须具备该越权能力
        self.overrides
            .find_capability(&principal.institution_id, principal.role, request.override_type)?
            .ok_or_else(|| {
                RepositoryError::AuthorizationDenied(format!(
                    "角色 {} 无权批准 {} 越权",
                    principal.role, request.override_type
                ))
            })?;

        let class_cfg = self.load_class(principal, &request.class_id)?;

        // 先落终态,再执行纠正变更; 变更失败时请求保持 APPROVED 且有审计可追溯
        self.overrides.finalize(
            override_id,
            OverrideStatus::Approved,
            &principal.user_id,
            notes,
            now,
        )?;

        let outcome = match request.override_type {
            OverrideType::CapacityOverride => self.capacity.grant_capacity_override(
                &class_cfg,
                &request.student_id,
                &principal.user_id,
                now,
            )?,
            // 绕过规则引擎,容量规则仍生效(allocate 自带审计)
            OverrideType::PrerequisiteOverride => self.capacity.allocate(
                &class_cfg,
                &request.student_id,
                &principal.user_id,
                0,
                now,
            )?,
        };

        info!(override_id = %override_id, "越权请求已批准");
        Ok(outcome)
    }

    /// 拒绝越权请求(理由必填)
    #[instrument(skip(self, principal, reason), fields(override_id = %override_id))]
    pub fn deny_override(
        &self,
        principal: &Principal,
        override_id: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        if reason.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "拒绝越权必须附理由".to_string(),
            ));
        }
        let request = self
            .overrides
            .find_by_id(override_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "OverrideRequest".to_string(),
                id: override_id.to_string(),
            })?;
        if request.status != OverrideStatus::Pending {
            return Err(RepositoryError::InvalidStateTransition {
                from: request.status.to_db_str().to_string(),
                to: "DENIED".to_string(),
            });
        }
        if request.institution_id != principal.institution_id {
            return Err(RepositoryError::AuthorizationDenied(
                "跨租户操作被拒绝".to_string(),
            ));
        }

        self.overrides.finalize(
            override_id,
            OverrideStatus::Denied,
            &principal.user_id,
            Some(reason.trim()),
            now,
        )?;

        let entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            request.institution_id.clone(),
            AuditAction::OverrideDenied,
            principal.user_id.clone(),
            now,
        )
        .with_student(request.student_id.clone())
        .with_class(request.class_id.clone())
        .with_reason(reason.trim());
        self.audits.insert(&entry)?;
        Ok(())
    }

    fn load_class(
        &self,
        principal: &Principal,
        class_id: &str,
    ) -> RepositoryResult<ClassEnrollmentConfig> {
        let config = self
            .classes
            .find_by_id(class_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ClassConfig".to_string(),
                id: class_id.to_string(),
            })?;
        if config.institution_id != principal.institution_id {
            return Err(RepositoryError::AuthorizationDenied(
                "跨租户操作被拒绝".to_string(),
            ));
        }
        Ok(config)
    }
}
