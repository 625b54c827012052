// ==========================================
// 选课准入系统 - 选课 API 门面
// ==========================================
// 职责: 组合各引擎,暴露给外层 UI/API 的全部操作;
//       权限前置校验 + Repository 错误到 ApiError 的转换
// 红线: authorization 拒绝发生在任何状态写入之前
// 说明: 所有句柄显式注入(无全局单例),测试可为每个用例建独立实例
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::enroll_config_trait::EnrollConfigReader;
use crate::domain::audit::AuditLogEntry;
use crate::domain::class_config::ClassEnrollmentConfig;
use crate::domain::conflict::{ConflictRecord, OverrideRequest};
use crate::domain::enrollment::{EnrollmentRequest, WaitlistEntry};
use crate::domain::types::{OverrideType, Principal};
use crate::engine::approval::{ApprovalEngine, ApprovalOutcome};
use crate::engine::capacity::{AllocationOutcome, CapacityManager, PromotionOutcome};
use crate::engine::conflict::ConflictDetector;
use crate::engine::eligibility::{EligibilityEngine, EligibilityResult, StudentFactsProvider};
use crate::engine::events::{EnrollmentEventPublisher, OptionalEventPublisher};
use crate::engine::orchestrator::{BulkEnrollReport, EnrollmentOrchestrator, EnrollmentOutcome};
use crate::engine::override_flow::OverrideEngine;
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::class_config_repo::ClassConfigRepository;
use crate::repository::conflict_repo::ConflictRepository;
use crate::repository::enrollment_repo::EnrollmentRepository;
use crate::repository::override_repo::OverrideRepository;
use crate::repository::request_repo::EnrollmentRequestRepository;
use crate::repository::waitlist_repo::WaitlistRepository;
use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

// ==========================================
// EnrollmentApi - 选课 API 门面
// ==========================================
pub struct EnrollmentApi<C>
where
    C: EnrollConfigReader + 'static,
{
    classes: Arc<ClassConfigRepository>,
    waitlists: Arc<WaitlistRepository>,
    requests: Arc<EnrollmentRequestRepository>,
    audits: Arc<AuditLogRepository>,
    capacity: Arc<CapacityManager>,
    orchestrator: EnrollmentOrchestrator<C>,
    approval: ApprovalEngine,
    detector: ConflictDetector<C>,
    overrides: OverrideEngine,
    eligibility: EligibilityEngine,
    facts: Arc<dyn StudentFactsProvider>,
    config: Arc<C>,
}

impl<C> EnrollmentApi<C>
where
    C: EnrollConfigReader + 'static,
{
    /// 构建 API 门面
    ///
    /// # 参数
    /// - conn: 共享数据库连接(显式注入,测试用临时库)
    /// - config: 租户配置读取器
    /// - facts: 学生事实提供方
    /// - publisher: 通知发布者(None 则静默)
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: Arc<C>,
        facts: Arc<dyn StudentFactsProvider>,
        publisher: Option<Arc<dyn EnrollmentEventPublisher>>,
    ) -> Self {
        let events = match publisher {
            Some(p) => OptionalEventPublisher::with_publisher(p),
            None => OptionalEventPublisher::none(),
        };

        let classes = Arc::new(ClassConfigRepository::new(conn.clone()));
        let enrollments = Arc::new(EnrollmentRepository::new(conn.clone()));
        let waitlists = Arc::new(WaitlistRepository::new(conn.clone()));
        let requests = Arc::new(EnrollmentRequestRepository::new(conn.clone()));
        let conflicts = Arc::new(ConflictRepository::new(conn.clone()));
        let override_repo = Arc::new(OverrideRepository::new(conn.clone()));
        let audits = Arc::new(AuditLogRepository::new(conn.clone()));

        let capacity = Arc::new(CapacityManager::new(conn.clone(), events.clone()));
        let orchestrator = EnrollmentOrchestrator::new(
            conn.clone(),
            capacity.clone(),
            facts.clone(),
            config.clone(),
            events.clone(),
        );
        let approval = ApprovalEngine::new(conn.clone(), capacity.clone(), events.clone());
        let detector = ConflictDetector::new(
            classes.clone(),
            enrollments,
            conflicts,
            audits.clone(),
            config.clone(),
        );
        let overrides = OverrideEngine::new(
            classes.clone(),
            override_repo,
            audits.clone(),
            capacity.clone(),
        );

        Self {
            classes,
            waitlists,
            requests,
            audits,
            capacity,
            orchestrator,
            approval,
            detector,
            overrides,
            eligibility: EligibilityEngine::new(),
            facts,
            config,
        }
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn require_staff(principal: &Principal, operation: &str) -> ApiResult<()> {
        if !principal.role.is_staff() {
            return Err(ApiError::AuthorizationDenied(format!(
                "{} 仅限教务角色",
                operation
            )));
        }
        Ok(())
    }

    fn load_class(&self, principal: &Principal, class_id: &str) -> ApiResult<ClassEnrollmentConfig> {
        let config = self
            .classes
            .find_by_id(class_id)?
            .ok_or_else(|| ApiError::NotFound(format!("ClassConfig(id={})不存在", class_id)))?;
        if config.institution_id != principal.institution_id {
            return Err(ApiError::AuthorizationDenied("跨租户操作被拒绝".to_string()));
        }
        Ok(config)
    }

    async fn hold_hours(&self, institution_id: &str) -> ApiResult<i64> {
        self.config
            .get_promotion_hold_hours(institution_id)
            .await
            .map_err(|e| ApiError::InternalError(e.to_string()))
    }

    // ==========================================
    // 选课主流程
    // ==========================================

    /// 提交选课请求
    pub async fn request_enrollment(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        justification: Option<&str>,
    ) -> ApiResult<EnrollmentOutcome> {
        Ok(self
            .orchestrator
            .request_enrollment(principal, student_id, class_id, justification, Self::now())
            .await?)
    }

    /// 退课
    pub async fn drop_student(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        reason: &str,
    ) -> ApiResult<()> {
        Ok(self
            .orchestrator
            .drop_student(principal, student_id, class_id, reason, Self::now())
            .await?)
    }

    /// 批量选课(逐项结果,不跨批原子)
    pub async fn bulk_enroll(
        &self,
        principal: &Principal,
        student_ids: &[String],
        class_id: &str,
    ) -> ApiResult<BulkEnrollReport> {
        Ok(self
            .orchestrator
            .bulk_enroll(principal, student_ids, class_id, Self::now())
            .await?)
    }

    /// 接受入班邀请
    pub async fn accept_invitation(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
    ) -> ApiResult<EnrollmentOutcome> {
        Ok(self
            .orchestrator
            .accept_invitation(principal, student_id, class_id, Self::now())
            .await?)
    }

    /// 结课
    pub fn complete_enrollment(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
    ) -> ApiResult<()> {
        Ok(self
            .orchestrator
            .complete_enrollment(principal, student_id, class_id, Self::now())?)
    }

    /// 规则判定(只读,无副作用)
    pub fn evaluate_eligibility(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
    ) -> ApiResult<EligibilityResult> {
        let class_cfg = self.load_class(principal, class_id)?;
        let facts = self
            .facts
            .facts(&class_cfg.institution_id, student_id)
            .map_err(|e| ApiError::InternalError(format!("学生事实获取失败: {}", e)))?;
        let prereqs = self.classes.prerequisites(class_id)?;
        let restrictions = self.classes.restrictions(class_id)?;
        Ok(self
            .eligibility
            .evaluate(&facts, &class_cfg, &prereqs, &restrictions, Self::now()))
    }

    // ==========================================
    // 容量与候补
    // ==========================================

    /// 直接席位分配(教务操作)
    pub fn allocate(
        &self,
        principal: &Principal,
        class_id: &str,
        student_id: &str,
    ) -> ApiResult<AllocationOutcome> {
        Self::require_staff(principal, "直接席位分配")?;
        let class_cfg = self.load_class(principal, class_id)?;
        Ok(self
            .capacity
            .allocate(&class_cfg, student_id, &principal.user_id, 0, Self::now())?)
    }

    /// 释放席位(教务操作; 触发晋升)
    pub async fn release(
        &self,
        principal: &Principal,
        class_id: &str,
        student_id: &str,
        reason: &str,
    ) -> ApiResult<()> {
        Self::require_staff(principal, "释放席位")?;
        let class_cfg = self.load_class(principal, class_id)?;
        let hold_hours = self.hold_hours(&class_cfg.institution_id).await?;
        Ok(self.capacity.release(
            &class_cfg,
            student_id,
            reason,
            &principal.user_id,
            hold_hours,
            Self::now(),
        )?)
    }

    /// 手动触发候补晋升(教务操作; 容量上调后使用)
    pub async fn promote(
        &self,
        principal: &Principal,
        class_id: &str,
    ) -> ApiResult<PromotionOutcome> {
        Self::require_staff(principal, "候补晋升")?;
        let class_cfg = self.load_class(principal, class_id)?;
        let hold_hours = self.hold_hours(&class_cfg.institution_id).await?;
        Ok(self.capacity.promote(&class_cfg, hold_hours, Self::now())?)
    }

    /// 接受候补晋升
    pub async fn accept_promotion(
        &self,
        principal: &Principal,
        class_id: &str,
        student_id: &str,
    ) -> ApiResult<AllocationOutcome> {
        if !principal.role.is_staff() && principal.user_id != student_id {
            return Err(ApiError::AuthorizationDenied(
                "学生只能接受本人的晋升".to_string(),
            ));
        }
        let class_cfg = self.load_class(principal, class_id)?;
        let hold_hours = self.hold_hours(&class_cfg.institution_id).await?;
        Ok(self
            .capacity
            .accept_promotion(&class_cfg, student_id, hold_hours, Self::now())?)
    }

    /// 查询候补位次
    pub fn get_waitlist_position(
        &self,
        principal: &Principal,
        class_id: &str,
        student_id: &str,
    ) -> ApiResult<Option<i32>> {
        self.load_class(principal, class_id)?;
        Ok(self.capacity.get_waitlist_position(class_id, student_id)?)
    }

    /// 查询预估晋升概率
    pub fn estimate_enrollment_probability(
        &self,
        principal: &Principal,
        class_id: &str,
        student_id: &str,
    ) -> ApiResult<Option<f64>> {
        self.load_class(principal, class_id)?;
        Ok(self
            .capacity
            .estimate_enrollment_probability(class_id, student_id)?)
    }

    /// 班级候补队列全览(教务操作)
    pub fn list_waitlist(
        &self,
        principal: &Principal,
        class_id: &str,
    ) -> ApiResult<Vec<WaitlistEntry>> {
        Self::require_staff(principal, "候补队列查询")?;
        self.load_class(principal, class_id)?;
        Ok(self.waitlists.list_by_class(class_id)?)
    }

    // ==========================================
    // 审批工作流
    // ==========================================

    /// 读取申请(懒惰过期生效)
    pub fn get_request(
        &self,
        principal: &Principal,
        request_id: &str,
    ) -> ApiResult<EnrollmentRequest> {
        let request = self.approval.get_request(request_id, Self::now())?;
        if request.institution_id != principal.institution_id {
            return Err(ApiError::AuthorizationDenied("跨租户操作被拒绝".to_string()));
        }
        Ok(request)
    }

    /// 按班级列出待审申请(教务操作)
    pub fn list_pending_requests(
        &self,
        principal: &Principal,
        class_id: &str,
    ) -> ApiResult<Vec<EnrollmentRequest>> {
        Self::require_staff(principal, "待审申请查询")?;
        self.load_class(principal, class_id)?;
        Ok(self.requests.list_pending_by_class(class_id)?)
    }

    /// 批准申请
    pub fn approve_request(
        &self,
        principal: &Principal,
        request_id: &str,
    ) -> ApiResult<ApprovalOutcome> {
        Self::require_staff(principal, "审批")?;
        Ok(self.approval.approve(principal, request_id, Self::now())?)
    }

    /// 拒绝申请(理由必填)
    pub fn deny_request(
        &self,
        principal: &Principal,
        request_id: &str,
        reason: &str,
    ) -> ApiResult<()> {
        Self::require_staff(principal, "审批")?;
        Ok(self.approval.deny(principal, request_id, reason, Self::now())?)
    }

    // ==========================================
    // 冲突与越权
    // ==========================================

    /// 执行冲突检测扫描
    pub async fn detect_conflicts(
        &self,
        principal: &Principal,
        cancel: Option<&AtomicBool>,
    ) -> ApiResult<Vec<ConflictRecord>> {
        Self::require_staff(principal, "冲突检测")?;
        Ok(self
            .detector
            .detect_conflicts(&principal.institution_id, Self::now(), cancel)
            .await)
    }

    /// 处置冲突(只关单,不改选课记录)
    pub fn resolve_conflict(
        &self,
        principal: &Principal,
        conflict_id: &str,
        resolution: &str,
    ) -> ApiResult<ConflictRecord> {
        Self::require_staff(principal, "冲突处置")?;
        Ok(self
            .detector
            .resolve_conflict(principal, conflict_id, resolution, Self::now())?)
    }

    /// 提交越权请求
    pub fn request_override(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
        override_type: OverrideType,
        justification: Option<&str>,
    ) -> ApiResult<OverrideRequest> {
        Ok(self.overrides.request_override(
            principal,
            student_id,
            class_id,
            override_type,
            justification,
            Self::now(),
        )?)
    }

    /// 批准越权请求
    pub fn approve_override(
        &self,
        principal: &Principal,
        override_id: &str,
        notes: Option<&str>,
    ) -> ApiResult<AllocationOutcome> {
        Self::require_staff(principal, "越权批准")?;
        Ok(self
            .overrides
            .approve_override(principal, override_id, notes, Self::now())?)
    }

    /// 拒绝越权请求(理由必填)
    pub fn deny_override(
        &self,
        principal: &Principal,
        override_id: &str,
        reason: &str,
    ) -> ApiResult<()> {
        Self::require_staff(principal, "越权拒绝")?;
        Ok(self
            .overrides
            .deny_override(principal, override_id, reason, Self::now())?)
    }

    // ==========================================
    // 审计查询
    // ==========================================

    /// 查询 (学生, 班级) 的审计轨迹
    pub fn list_audit_trail(
        &self,
        principal: &Principal,
        student_id: &str,
        class_id: &str,
    ) -> ApiResult<Vec<AuditLogEntry>> {
        self.load_class(principal, class_id)?;
        if !principal.role.is_staff() && principal.user_id != student_id {
            return Err(ApiError::AuthorizationDenied(
                "学生只能查询本人的审计轨迹".to_string(),
            ));
        }
        Ok(self.audits.list_by_student_class(student_id, class_id)?)
    }
}
