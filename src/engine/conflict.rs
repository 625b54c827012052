// ==========================================
// 选课准入系统 - 冲突检测与处置引擎
// ==========================================
// 职责: 周期/按需扫描容量不变量破坏与异常选课速率
// 红线: 扫描边界内吞掉后端错误(记运维日志,返回空结果),绝不向调用方抛出
// 红线: 每条冲突记录独立原子写入,扫描可中途取消且不留半写批次
// 红线: resolve 只关单,不改动选课记录; 纠正性变更走越权流程
// ==========================================

use crate::config::enroll_config_trait::EnrollConfigReader;
use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{ConflictSeverity, ConflictStatus, ConflictType, EnrollmentStatus, Principal};
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::class_config_repo::ClassConfigRepository;
use crate::repository::conflict_repo::ConflictRepository;
use crate::repository::enrollment_repo::EnrollmentRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// ConflictDetector - 冲突检测器
// ==========================================
pub struct ConflictDetector<C>
where
    C: EnrollConfigReader,
{
    classes: Arc<ClassConfigRepository>,
    enrollments: Arc<EnrollmentRepository>,
    conflicts: Arc<ConflictRepository>,
    audits: Arc<AuditLogRepository>,
    config: Arc<C>,
}

impl<C> ConflictDetector<C>
where
    C: EnrollConfigReader,
{
    pub fn new(
        classes: Arc<ClassConfigRepository>,
        enrollments: Arc<EnrollmentRepository>,
        conflicts: Arc<ConflictRepository>,
        audits: Arc<AuditLogRepository>,
        config: Arc<C>,
    ) -> Self {
        Self {
            classes,
            enrollments,
            conflicts,
            audits,
            config,
        }
    }

    /// 执行一次检测扫描
    ///
    /// # 参数
    /// - institution_id: 租户(院校)ID
    /// - cancel: 取消标志,扫描在每个检查单元之间探测
    ///
    /// # 返回
    /// 本次新建的冲突记录列表; 后端错误被吞掉并返回空列表
    #[instrument(skip(self, cancel), fields(institution_id = %institution_id))]
    pub async fn detect_conflicts(
        &self,
        institution_id: &str,
        now: NaiveDateTime,
        cancel: Option<&AtomicBool>,
    ) -> Vec<ConflictRecord> {
        match self.detect_inner(institution_id, now, cancel).await {
            Ok(found) => {
                info!(found = found.len(), "冲突检测扫描完成");
                found
            }
            Err(e) => {
                // 检测失败不得越过扫描边界
                error!(error = %e, "冲突检测扫描失败,返回空结果");
                Vec::new()
            }
        }
    }

    async fn detect_inner(
        &self,
        institution_id: &str,
        now: NaiveDateTime,
        cancel: Option<&AtomicBool>,
    ) -> RepositoryResult<Vec<ConflictRecord>> {
        let suspicious_threshold = self
            .config
            .get_suspicious_threshold(institution_id)
            .await
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        let suspicious_window = self
            .config
            .get_suspicious_window_hours(institution_id)
            .await
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        let burst_threshold = self
            .config
            .get_burst_threshold(institution_id)
            .await
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        let burst_window = self
            .config
            .get_burst_window_hours(institution_id)
            .await
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        let mut found = Vec::new();

        // ==========================================
        // 检查 1: capacity_exceeded
        // ==========================================
        for class_cfg in self.classes.list_by_institution(institution_id)? {
            if Self::is_cancelled(cancel) {
                info!("扫描被取消(容量检查阶段)");
                return Ok(found);
            }
            let enrolled = self
                .enrollments
                .count_by_status(&class_cfg.class_id, EnrollmentStatus::Enrolled)?;
            if enrolled <= class_cfg.capacity as i64 {
                continue;
            }
            // 幂等: 同班级已有未关闭记录时不重复开单
            if self
                .conflicts
                .find_open_by_subject(
                    ConflictType::CapacityExceeded,
                    Some(&class_cfg.class_id),
                    None,
                )?
                .is_some()
            {
                continue;
            }

            let excess = (enrolled - class_cfg.capacity as i64) as i32;
            let record = ConflictRecord {
                conflict_id: Uuid::new_v4().to_string(),
                institution_id: institution_id.to_string(),
                conflict_type: ConflictType::CapacityExceeded,
                severity: ConflictSeverity::High,
                class_id: Some(class_cfg.class_id.clone()),
                student_id: None,
                affected_students: excess,
                description: format!(
                    "班级 {} 实际入班 {} 人,超出容量 {} ({} 人超额)",
                    class_cfg.class_id, enrolled, class_cfg.capacity, excess
                ),
                status: ConflictStatus::Open,
                detected_at: now,
                resolved_by: None,
                resolved_at: None,
                resolution: None,
            };
            self.conflicts.insert(&record)?;
            warn!(class_id = %class_cfg.class_id, excess, "检测到容量超限");
            found.push(record);
        }

        // ==========================================
        // 检查 2: suspicious_activity (滚动 24h 去重班级数)
        // ==========================================
        let mut flagged: HashSet<String> = HashSet::new();
        let window_start = now - Duration::hours(suspicious_window);
        for (student_id, count) in self
            .enrollments
            .count_recent_distinct_classes(institution_id, window_start)?
        {
            if Self::is_cancelled(cancel) {
                info!("扫描被取消(异常速率检查阶段)");
                return Ok(found);
            }
            if count <= suspicious_threshold {
                continue;
            }
            self.flag_suspicious(
                institution_id,
                &student_id,
                &format!(
                    "学生 {} 在 {} 小时内选了 {} 个不同班级 (阈值 {})",
                    student_id, suspicious_window, count, suspicious_threshold
                ),
                now,
                &mut flagged,
                &mut found,
            )?;
        }

        // ==========================================
        // 检查 3: 突发窗口 (短窗口批量选课)
        // ==========================================
        let burst_start = now - Duration::hours(burst_window);
        for (student_id, count) in self
            .enrollments
            .count_recent_distinct_classes(institution_id, burst_start)?
        {
            if Self::is_cancelled(cancel) {
                info!("扫描被取消(突发检查阶段)");
                return Ok(found);
            }
            if count <= burst_threshold {
                continue;
            }
            self.flag_suspicious(
                institution_id,
                &student_id,
                &format!(
                    "学生 {} 在 {} 小时内选了 {} 个不同班级 (突发阈值 {})",
                    student_id, burst_window, count, burst_threshold
                ),
                now,
                &mut flagged,
                &mut found,
            )?;
        }

        Ok(found)
    }

    /// 异常选课开单(同学生去重 + 未关闭记录幂等)
    fn flag_suspicious(
        &self,
        institution_id: &str,
        student_id: &str,
        description: &str,
        now: NaiveDateTime,
        flagged: &mut HashSet<String>,
        found: &mut Vec<ConflictRecord>,
    ) -> RepositoryResult<()> {
        if flagged.contains(student_id) {
            return Ok(());
        }
        if self
            .conflicts
            .find_open_by_subject(ConflictType::SuspiciousActivity, None, Some(student_id))?
            .is_some()
        {
            return Ok(());
        }

        let record = ConflictRecord {
            conflict_id: Uuid::new_v4().to_string(),
            institution_id: institution_id.to_string(),
            conflict_type: ConflictType::SuspiciousActivity,
            severity: ConflictSeverity::Medium,
            class_id: None,
            student_id: Some(student_id.to_string()),
            affected_students: 1,
            description: description.to_string(),
            status: ConflictStatus::Open,
            detected_at: now,
            resolved_by: None,
            resolved_at: None,
            resolution: None,
        };
        self.conflicts.insert(&record)?;
        warn!(student_id = %student_id, "检测到异常选课速率");
        flagged.insert(student_id.to_string());
        found.push(record);
        Ok(())
    }

    /// 处置冲突: 只记录处置并关单,不触碰选课记录
    ///
    /// # 说明
    /// 纠正性变更(补席位/强制入班)必须经 OverrideRequest 审批回到
    /// 容量管理器/编排器执行
    #[instrument(skip(self, principal, resolution), fields(conflict_id = %conflict_id))]
    pub fn resolve_conflict(
        &self,
        principal: &Principal,
        conflict_id: &str,
        resolution: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<ConflictRecord> {
        if resolution.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "处置说明不能为空".to_string(),
            ));
        }
        let record =
            self.conflicts
                .find_by_id(conflict_id)?
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: "ConflictRecord".to_string(),
                    id: conflict_id.to_string(),
                })?;
        if record.institution_id != principal.institution_id {
            return Err(RepositoryError::AuthorizationDenied(
                "跨租户操作被拒绝".to_string(),
            ));
        }

        self.conflicts
            .mark_resolved(conflict_id, &principal.user_id, resolution.trim(), now)?;

        let mut entry = AuditLogEntry::new(
            Uuid::new_v4().to_string(),
            record.institution_id.clone(),
            AuditAction::ConflictResolved,
            principal.user_id.clone(),
            now,
        )
        .with_reason(resolution.trim())
        .with_payload(&record);
        if let Some(class_id) = &record.class_id {
            entry = entry.with_class(class_id.clone());
        }
        if let Some(student_id) = &record.student_id {
            entry = entry.with_student(student_id.clone());
        }
        self.audits.insert(&entry)?;

        let mut resolved = record;
        resolved.status = ConflictStatus::Resolved;
        resolved.resolved_by = Some(principal.user_id.clone());
        resolved.resolved_at = Some(now);
        resolved.resolution = Some(resolution.trim().to_string());
        Ok(resolved)
    }

    fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
        cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false)
    }
}
