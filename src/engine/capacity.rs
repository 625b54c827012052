// ==========================================
// 选课准入系统 - 容量与候补管理器
// ==========================================
// 职责: 席位原子分配、候补位次维护、候补晋升与保留窗口
// 红线: 同一班级的 allocate/release/promote 序列必须串行化,
//       任何时刻 enrolled_count + active_holds <= capacity,
//       waitlisted_count <= waitlist_capacity
// 红线: 不同班级之间不共享锁,分配完全独立
// 说明: 并发策略为"每班级互斥锁 + SQLite 事务":
//       锁串行化读-判-写序列,事务保证状态与审计同落或同滚
// ==========================================

use crate::domain::audit::{AuditAction, AuditLogEntry};
use crate::domain::class_config::ClassEnrollmentConfig;
use crate::domain::enrollment::{Enrollment, WaitlistEntry};
use crate::domain::types::EnrollmentStatus;
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, OptionalEventPublisher};
use crate::repository::audit_log_repo::AuditLogRepository;
use crate::repository::enrollment_repo::EnrollmentRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::waitlist_repo::WaitlistRepository;
use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};
use uuid::Uuid;

// ==========================================
// 预估晋升概率
// ==========================================

/// 候补位次 -> 预估晋升概率
///
/// # 规则
/// - clamp(1 - position*0.1, 0.1, 0.9), 随位次单调不增
pub fn estimated_probability(position: i32) -> f64 {
    (1.0 - position as f64 * 0.1).clamp(0.1, 0.9)
}

// ==========================================
// ClassLockRegistry - 班级锁注册表
// ==========================================
// 每个班级一把互斥锁,按需创建; 不同班级互不阻塞
pub struct ClassLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClassLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 获取(或创建)班级锁
    pub fn lock_for(&self, class_id: &str) -> RepositoryResult<Arc<Mutex<()>>> {
        let mut map = self
            .locks
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(map
            .entry(class_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

impl Default for ClassLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// AllocationOutcome - 分配结果
// ==========================================
#[derive(Debug, Clone)]
pub enum AllocationOutcome {
    Enrolled {
        enrollment_id: String,
    },
    Waitlisted {
        enrollment_id: String,
        position: i32,
        estimated_probability: f64,
    },
    Rejected {
        code: String,
        message: String,
    },
}

// ==========================================
// PromotionOutcome - 晋升结果
// ==========================================
#[derive(Debug, Clone)]
pub enum PromotionOutcome {
    /// 已向候选人发出晋升通知,席位保留至 expires_at
    Promoted {
        student_id: String,
        expires_at: NaiveDateTime,
    },
    /// 已有未过期的保留,本次不再晋升
    HoldOutstanding { student_id: String },
    /// 候补队列为空
    NoCandidate,
    /// 无空余席位
    NoSeat,
}

// ==========================================
// CapacityManager - 容量与候补管理器
// ==========================================
pub struct CapacityManager {
    conn: Arc<Mutex<Connection>>,
    locks: ClassLockRegistry,
    events: OptionalEventPublisher,
}

impl CapacityManager {
    pub fn new(conn: Arc<Mutex<Connection>>, events: OptionalEventPublisher) -> Self {
        Self {
            conn,
            locks: ClassLockRegistry::new(),
            events,
        }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 获取班级锁(编排器在同一临界区内组合多步操作时复用)
    pub fn class_lock(&self, class_id: &str) -> RepositoryResult<Arc<Mutex<()>>> {
        self.locks.lock_for(class_id)
    }

    // ==========================================
    // 席位分配
    // ==========================================

    /// 为学生分配席位(独立入口: 自带班级锁与事务)
    #[instrument(skip(self, config), fields(class_id = %config.class_id, student_id = %student_id))]
    pub fn allocate(
        &self,
        config: &ClassEnrollmentConfig,
        student_id: &str,
        enrolled_by: &str,
        priority: i32,
        now: NaiveDateTime,
    ) -> RepositoryResult<AllocationOutcome> {
        let lock = self.class_lock(&config.class_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        Self::expire_overdue_holds_in_tx(&tx, config, now)?;
        let outcome = Self::allocate_in_tx(&tx, config, student_id, enrolled_by, priority, now)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(outcome)
    }

    /// 席位分配核心(事务内使用; 调用方必须已持有班级锁)
    ///
    /// # 算法
    /// 1. effective = enrolled_count + active_holds; effective < capacity
    ///    且没有候补者排在前面 -> 直接入班
    /// 2. 否则 allow_waitlist 且候补未满 -> position = waitlisted + 1 入候补
    /// 3. 否则拒绝 capacity_full
    ///
    /// # 说明
    /// 审计写入包含在同一事务中;
    /// 空出的席位在候补队列非空时归晋升流程,新请求只能排队
    pub fn allocate_in_tx(
        tx: &Connection,
        config: &ClassEnrollmentConfig,
        student_id: &str,
        enrolled_by: &str,
        priority: i32,
        now: NaiveDateTime,
    ) -> RepositoryResult<AllocationOutcome> {
        let enrolled =
            EnrollmentRepository::count_by_status_with(tx, &config.class_id, EnrollmentStatus::Enrolled)?;
        let holds = WaitlistRepository::count_active_holds_with(tx, &config.class_id, now)?;
        let queued = WaitlistRepository::count_with(tx, &config.class_id)?;

        // 规则 1: 直接入班(保留中的席位计入容量口径)
        if enrolled + holds < config.capacity as i64 && queued == 0 {
            let enrollment_id = Uuid::new_v4().to_string();
            let enrollment = Enrollment::new(
                enrollment_id.clone(),
                config.class_id.clone(),
                student_id.to_string(),
                config.institution_id.clone(),
                EnrollmentStatus::Enrolled,
                enrolled_by.to_string(),
                now,
            );
            EnrollmentRepository::insert_with(tx, &enrollment)?;
            Self::audit_in_tx(
                tx,
                config,
                student_id,
                enrolled_by,
                AuditAction::Enrolled,
                None,
                now,
            )?;
            debug!(
                class_id = %config.class_id,
                enrolled = enrolled + 1,
                capacity = config.capacity,
                "直接入班"
            );
            return Ok(AllocationOutcome::Enrolled { enrollment_id });
        }

        // 规则 2: 进入候补
        if config.allow_waitlist {
            if queued < config.effective_waitlist_limit() as i64 {
                let position = (queued + 1) as i32;
                let probability = estimated_probability(position);
                let enrollment_id = Uuid::new_v4().to_string();

                let enrollment = Enrollment::new(
                    enrollment_id.clone(),
                    config.class_id.clone(),
                    student_id.to_string(),
                    config.institution_id.clone(),
                    EnrollmentStatus::Waitlisted,
                    enrolled_by.to_string(),
                    now,
                );
                EnrollmentRepository::insert_with(tx, &enrollment)?;

                let entry = WaitlistEntry {
                    class_id: config.class_id.clone(),
                    student_id: student_id.to_string(),
                    position,
                    priority,
                    estimated_probability: probability,
                    added_at: now,
                    notified_at: None,
                    notification_expires_at: None,
                };
                WaitlistRepository::insert_with(tx, &entry)?;

                Self::audit_in_tx(
                    tx,
                    config,
                    student_id,
                    enrolled_by,
                    AuditAction::Waitlisted,
                    Some(&format!("position={}", position)),
                    now,
                )?;
                return Ok(AllocationOutcome::Waitlisted {
                    enrollment_id,
                    position,
                    estimated_probability: probability,
                });
            }
        }

        // 规则 3: 拒绝
        Self::audit_in_tx(
            tx,
            config,
            student_id,
            enrolled_by,
            AuditAction::CapacityRejected,
            Some("capacity_full"),
            now,
        )?;
        Ok(AllocationOutcome::Rejected {
            code: "capacity_full".to_string(),
            message: "班级与候补均已满".to_string(),
        })
    }

    /// 越权席位分配: 为单个学生突破名义容量一个席位
    ///
    /// # 说明
    /// 仅由已批准的 CAPACITY_OVERRIDE 调用; 仍是班级锁 + 事务内的原子操作,
    /// 若该学生处于候补则原地转正(候补条目移除并重排)
    #[instrument(skip(self, config), fields(class_id = %config.class_id, student_id = %student_id))]
    pub fn grant_capacity_override(
        &self,
        config: &ClassEnrollmentConfig,
        student_id: &str,
        approved_by: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<AllocationOutcome> {
        let lock = self.class_lock(&config.class_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let existing = EnrollmentRepository::find_active_with(&tx, &config.class_id, student_id)?;
        let outcome = match existing {
            Some(e) if e.status == EnrollmentStatus::Enrolled => AllocationOutcome::Rejected {
                code: "duplicate_enrollment".to_string(),
                message: "该学生已在班".to_string(),
            },
            Some(e) => {
                // 候补转正
                WaitlistRepository::remove_with(&tx, &config.class_id, student_id)?;
                EnrollmentRepository::update_status_with(
                    &tx,
                    &e.enrollment_id,
                    EnrollmentStatus::Enrolled,
                    Some("capacity_override"),
                    now,
                )?;
                Self::audit_in_tx(
                    &tx,
                    config,
                    student_id,
                    approved_by,
                    AuditAction::OverrideApproved,
                    Some("capacity_override"),
                    now,
                )?;
                AllocationOutcome::Enrolled {
                    enrollment_id: e.enrollment_id,
                }
            }
            None => {
                let enrollment_id = Uuid::new_v4().to_string();
                let mut enrollment = Enrollment::new(
                    enrollment_id.clone(),
                    config.class_id.clone(),
                    student_id.to_string(),
                    config.institution_id.clone(),
                    EnrollmentStatus::Enrolled,
                    approved_by.to_string(),
                    now,
                );
                enrollment.status_reason = Some("capacity_override".to_string());
                EnrollmentRepository::insert_with(&tx, &enrollment)?;
                Self::audit_in_tx(
                    &tx,
                    config,
                    student_id,
                    approved_by,
                    AuditAction::OverrideApproved,
                    Some("capacity_override"),
                    now,
                )?;
                AllocationOutcome::Enrolled { enrollment_id }
            }
        };

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(outcome)
    }

    // ==========================================
    // 释放与晋升
    // ==========================================

    /// 释放席位: 标记退课并触发晋升
    ///
    /// # 红线
    /// 仅允许从 ENROLLED 释放
    #[instrument(skip(self, config), fields(class_id = %config.class_id, student_id = %student_id))]
    pub fn release(
        &self,
        config: &ClassEnrollmentConfig,
        student_id: &str,
        reason: &str,
        performed_by: &str,
        hold_hours: i64,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        {
            let lock = self.class_lock(&config.class_id)?;
            let _guard = lock
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;

            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

            let enrollment = EnrollmentRepository::find_active_with(&tx, &config.class_id, student_id)?
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: "Enrollment".to_string(),
                    id: format!("{}/{}", config.class_id, student_id),
                })?;
            if enrollment.status != EnrollmentStatus::Enrolled {
                return Err(RepositoryError::InvalidStateTransition {
                    from: enrollment.status.to_db_str().to_string(),
                    to: "DROPPED".to_string(),
                });
            }

            EnrollmentRepository::update_status_with(
                &tx,
                &enrollment.enrollment_id,
                EnrollmentStatus::Dropped,
                Some(reason),
                now,
            )?;
            Self::audit_in_tx(
                &tx,
                config,
                student_id,
                performed_by,
                AuditAction::Dropped,
                Some(reason),
                now,
            )?;
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        } // 班级锁在晋升前释放,promote 自行加锁

        let promotion = self.promote(config, hold_hours, now)?;
        debug!(class_id = %config.class_id, ?promotion, "释放席位后的晋升结果");
        Ok(())
    }

    /// 候补晋升: 为队首候选人保留空出的席位
    ///
    /// # 规则
    /// 1. 先做保留超时的懒惰清理(超时条目出队,对应记录转 DROPPED)
    /// 2. 若仍有未过期保留,不叠加第二个保留
    /// 3. 按 priority DESC, added_at ASC 选队首,设置保留窗口并通知
    #[instrument(skip(self, config), fields(class_id = %config.class_id))]
    pub fn promote(
        &self,
        config: &ClassEnrollmentConfig,
        hold_hours: i64,
        now: NaiveDateTime,
    ) -> RepositoryResult<PromotionOutcome> {
        let lock = self.class_lock(&config.class_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        Self::expire_overdue_holds_in_tx(&tx, config, now)?;

        // 保留即容量的一部分: 有未过期保留时不做第二次晋升
        if let Some(held) = WaitlistRepository::active_hold_with(&tx, &config.class_id, now)? {
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            return Ok(PromotionOutcome::HoldOutstanding {
                student_id: held.student_id,
            });
        }

        let enrolled =
            EnrollmentRepository::count_by_status_with(&tx, &config.class_id, EnrollmentStatus::Enrolled)?;
        if enrolled >= config.capacity as i64 {
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            return Ok(PromotionOutcome::NoSeat);
        }

        let Some(candidate) = WaitlistRepository::head_candidate_with(&tx, &config.class_id)? else {
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            return Ok(PromotionOutcome::NoCandidate);
        };

        let expires_at = now + Duration::hours(hold_hours);
        WaitlistRepository::set_hold_with(&tx, &config.class_id, &candidate.student_id, now, expires_at)?;
        Self::audit_in_tx(
            &tx,
            config,
            &candidate.student_id,
            "system",
            AuditAction::Promoted,
            Some(&format!("hold_expires_at={}", expires_at)),
            now,
        )?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            class_id = %config.class_id,
            student_id = %candidate.student_id,
            %expires_at,
            "候补晋升,席位保留中"
        );
        self.events.publish_quietly(
            EnrollmentEvent::new(
                config.institution_id.clone(),
                config.class_id.clone(),
                candidate.student_id.clone(),
                EnrollmentEventType::WaitlistPromoted,
            )
            .with_detail(format!("接受截止: {}", expires_at)),
        );

        Ok(PromotionOutcome::Promoted {
            student_id: candidate.student_id,
            expires_at,
        })
    }

    /// 接受晋升: 保留窗口内将候补转为入班
    #[instrument(skip(self, config), fields(class_id = %config.class_id, student_id = %student_id))]
    pub fn accept_promotion(
        &self,
        config: &ClassEnrollmentConfig,
        student_id: &str,
        hold_hours: i64,
        now: NaiveDateTime,
    ) -> RepositoryResult<AllocationOutcome> {
        let expired;
        {
            let lock = self.class_lock(&config.class_id)?;
            let _guard = lock
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;

            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

            let entry = WaitlistRepository::find_with(&tx, &config.class_id, student_id)?
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: "WaitlistEntry".to_string(),
                    id: format!("{}/{}", config.class_id, student_id),
                })?;

            if entry.has_active_hold(now) {
                WaitlistRepository::remove_with(&tx, &config.class_id, student_id)?;
                let enrollment =
                    EnrollmentRepository::find_active_with(&tx, &config.class_id, student_id)?
                        .ok_or_else(|| RepositoryError::NotFound {
                            entity: "Enrollment".to_string(),
                            id: format!("{}/{}", config.class_id, student_id),
                        })?;
                EnrollmentRepository::update_status_with(
                    &tx,
                    &enrollment.enrollment_id,
                    EnrollmentStatus::Enrolled,
                    Some("promotion_accepted"),
                    now,
                )?;
                Self::audit_in_tx(
                    &tx,
                    config,
                    student_id,
                    student_id,
                    AuditAction::PromotionAccepted,
                    None,
                    now,
                )?;
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                return Ok(AllocationOutcome::Enrolled {
                    enrollment_id: enrollment.enrollment_id,
                });
            }

            // 无有效保留: 若曾有保留则按超时清理
            expired = entry.notified_at.is_some();
            Self::expire_overdue_holds_in_tx(&tx, config, now)?;
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        }

        if expired {
            // 超时释放的席位立刻转给下一位
            let _ = self.promote(config, hold_hours, now)?;
            return Ok(AllocationOutcome::Rejected {
                code: "promotion_expired".to_string(),
                message: "晋升保留已超时".to_string(),
            });
        }
        Ok(AllocationOutcome::Rejected {
            code: "no_active_hold".to_string(),
            message: "当前没有待接受的晋升".to_string(),
        })
    }

    /// 保留超时的懒惰清理(事务内使用)
    ///
    /// 超时条目出队并重排位次,其选课记录转 DROPPED(promotion_expired),逐条审计
    fn expire_overdue_holds_in_tx(
        tx: &Connection,
        config: &ClassEnrollmentConfig,
        now: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let overdue = WaitlistRepository::expired_holds_with(tx, &config.class_id, now)?;
        let count = overdue.len();
        for entry in overdue {
            WaitlistRepository::remove_with(tx, &config.class_id, &entry.student_id)?;
            if let Some(enrollment) =
                EnrollmentRepository::find_active_with(tx, &config.class_id, &entry.student_id)?
            {
                EnrollmentRepository::update_status_with(
                    tx,
                    &enrollment.enrollment_id,
                    EnrollmentStatus::Dropped,
                    Some("promotion_expired"),
                    now,
                )?;
            }
            Self::audit_in_tx(
                tx,
                config,
                &entry.student_id,
                "system",
                AuditAction::PromotionExpired,
                Some("保留窗口超时未接受"),
                now,
            )?;
        }
        Ok(count)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 查询学生当前候补位次
    pub fn get_waitlist_position(
        &self,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<i32>> {
        let conn = self.get_conn()?;
        let entry = WaitlistRepository::find_with(&conn, class_id, student_id)?;
        Ok(entry.map(|e| e.position))
    }

    /// 查询学生当前预估晋升概率
    pub fn estimate_enrollment_probability(
        &self,
        class_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<f64>> {
        let conn = self.get_conn()?;
        let entry = WaitlistRepository::find_with(&conn, class_id, student_id)?;
        Ok(entry.map(|e| e.estimated_probability))
    }

    /// 审计写入(事务内使用)
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
