// ==========================================
// 选课编排器集成测试
// ==========================================
// 职责: 验证状态机分支、幂等语义、审计落库与权限前置
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use chrono::Duration;
use course_enroll::config::ConfigManager;
use course_enroll::domain::class_config::Prerequisite;
use course_enroll::domain::enrollment::Invitation;
use course_enroll::domain::types::{EnrollmentMode, EnrollmentStatus, InvitationStatus, RuleType};
use course_enroll::engine::{
    CapacityManager, EnrollmentOrchestrator, EnrollmentOutcome, OptionalEventPublisher,
};
use course_enroll::repository::audit_log_repo::AuditLogRepository;
use course_enroll::repository::class_config_repo::ClassConfigRepository;
use course_enroll::repository::enrollment_repo::EnrollmentRepository;
use course_enroll::repository::error::RepositoryError;
use course_enroll::repository::invitation_repo::InvitationRepository;
use course_enroll::repository::waitlist_repo::WaitlistRepository;
use std::sync::Arc;

use crate::test_helpers::{
    create_test_db, open_class, open_shared_conn, registrar_principal, restricted_class,
    student_principal, ts, FixtureFactsProvider,
};

struct Env {
    _temp: tempfile::NamedTempFile,
    orchestrator: EnrollmentOrchestrator<ConfigManager>,
    classes: ClassConfigRepository,
    enrollments: EnrollmentRepository,
    waitlists: WaitlistRepository,
    audits: AuditLogRepository,
    invitations: InvitationRepository,
}

fn setup() -> Env {
    let (temp, db_path) = create_test_db().unwrap();
    let conn = open_shared_conn(&db_path);
    let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
    let capacity = Arc::new(CapacityManager::new(conn.clone(), OptionalEventPublisher::none()));
    let facts = Arc::new(FixtureFactsProvider::new());
    let orchestrator = EnrollmentOrchestrator::new(
        conn.clone(),
        capacity,
        facts,
        config,
        OptionalEventPublisher::none(),
    );
    Env {
        _temp: temp,
        orchestrator,
        classes: ClassConfigRepository::new(conn.clone()),
        enrollments: EnrollmentRepository::new(conn.clone()),
        waitlists: WaitlistRepository::new(conn.clone()),
        audits: AuditLogRepository::new(conn.clone()),
        invitations: InvitationRepository::new(conn),
    }
}

// ==========================================
// 测试 1: OPEN 模式直接入班 + 审计
// ==========================================

#[tokio::test]
async fn test_open_mode_enrolls_and_audits() {
    let env = setup();
    env.classes.upsert(&open_class("CLS001", "INST001", 5, 5)).unwrap();
    let principal = student_principal("S001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS001", None, now)
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Enrolled { .. }));

    let active = env.enrollments.find_active("CLS001", "S001").unwrap().unwrap();
    assert_eq!(active.status, EnrollmentStatus::Enrolled);

    // 每次迁移恰好一条审计
    assert_eq!(env.audits.count_by_action("S001", "CLS001", "Enrolled").unwrap(), 1);
}

// ==========================================
// 测试 2: 幂等重复请求
// ==========================================

#[tokio::test]
async fn test_duplicate_request_is_idempotent_noop() {
    let env = setup();
    env.classes.upsert(&open_class("CLS002", "INST001", 5, 5)).unwrap();
    let principal = student_principal("S001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    let first = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS002", None, now)
        .await
        .unwrap();
    assert!(matches!(first, EnrollmentOutcome::Enrolled { .. }));

    let second = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS002", None, now + Duration::minutes(5))
        .await
        .unwrap();
    match second {
        EnrollmentOutcome::AlreadyActive { status } => {
            assert_eq!(status, EnrollmentStatus::Enrolled)
        }
        other => panic!("重复请求应返回现有状态: {:?}", other),
    }

    // 恰好一条选课记录、一条入班审计
    let all = env.enrollments.list_by_class("CLS002", None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(env.audits.count_by_action("S001", "CLS002", "Enrolled").unwrap(), 1);
}

// ==========================================
// 测试 3: 规则不通过 -> eligibility_failed
// ==========================================

#[tokio::test]
async fn test_strict_prerequisite_blocks_enrollment() {
    let env = setup();
    env.classes.upsert(&open_class("CLS003", "INST001", 5, 5)).unwrap();
    env.classes
        .insert_prerequisite(&Prerequisite {
            class_id: "CLS003".to_string(),
            prereq_type: RuleType::Gpa,
            requirement: "3.9".to_string(),
            strict: true,
        })
        .unwrap();
    let principal = student_principal("S001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS003", None, now)
        .await
        .unwrap();
    match outcome {
        EnrollmentOutcome::EligibilityFailed { reasons } => {
            assert!(!reasons.is_empty());
            assert!(reasons[0].message.contains("GPA"));
        }
        other => panic!("应判定不通过: {:?}", other),
    }

    assert!(env.enrollments.find_active("CLS003", "S001").unwrap().is_none());
    assert_eq!(
        env.audits.count_by_action("S001", "CLS003", "EligibilityFailed").unwrap(),
        1
    );
}

#[tokio::test]
async fn test_enrollment_window_closed_blocks() {
    let env = setup();
    let mut config = open_class("CLS004", "INST001", 5, 5);
    config.enrollment_start = Some(ts(2026, 9, 1, 0, 0));
    config.enrollment_end = Some(ts(2026, 9, 10, 0, 0));
    env.classes.upsert(&config).unwrap();
    let principal = student_principal("S001", "INST001");

    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS004", None, ts(2026, 9, 20, 0, 0))
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::EligibilityFailed { .. }));
}

// ==========================================
// 测试 4: RESTRICTED 模式
// ==========================================

#[tokio::test]
async fn test_restricted_mode_creates_pending_request() {
    let env = setup();
    env.classes
        .upsert(&restricted_class("CLS005", "INST001", 5, true))
        .unwrap();
    let principal = student_principal("S001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    // 必附理由
    let err = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS005", None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ValidationError(_)));

    // 附理由 -> PENDING, 7 天有效期
    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS005", Some("需要该课程毕业"), now)
        .await
        .unwrap();
    let first_request_id = match outcome {
        EnrollmentOutcome::PendingApproval { request_id, expires_at } => {
            assert_eq!(expires_at, now + Duration::days(7));
            request_id
        }
        other => panic!("应进入待审: {:?}", other),
    };
    assert_eq!(
        env.audits.count_by_action("S001", "CLS005", "ApprovalRequested").unwrap(),
        1
    );

    // 幂等: 重复请求返回同一申请
    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS005", Some("重复提交"), now + Duration::hours(1))
        .await
        .unwrap();
    match outcome {
        EnrollmentOutcome::PendingApproval { request_id, .. } => {
            assert_eq!(request_id, first_request_id)
        }
        other => panic!("应命中已有申请: {:?}", other),
    }
}

#[tokio::test]
async fn test_restricted_auto_approve_short_circuits() {
    let env = setup();
    let mut config = restricted_class("CLS006", "INST001", 5, false);
    config.auto_approve = true;
    env.classes.upsert(&config).unwrap();
    let principal = student_principal("S001", "INST001");

    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS006", None, ts(2026, 9, 1, 9, 0))
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Enrolled { .. }));
}

// ==========================================
// 测试 5: INVITATION_ONLY 模式
// ==========================================

#[tokio::test]
async fn test_invitation_only_requires_live_invitation() {
    let env = setup();
    let mut config = open_class("CLS007", "INST001", 5, 5);
    config.enrollment_mode = EnrollmentMode::InvitationOnly;
    env.classes.upsert(&config).unwrap();
    let principal = student_principal("S001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    // 无邀请 -> invitation_required
    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS007", None, now)
        .await
        .unwrap();
    match outcome {
        EnrollmentOutcome::Rejected { code, .. } => assert_eq!(code, "invitation_required"),
        other => panic!("应要求邀请: {:?}", other),
    }

    // 过期邀请同样拒绝
    env.invitations
        .insert(&Invitation {
            invitation_id: "INV001".to_string(),
            class_id: "CLS007".to_string(),
            student_id: "S001".to_string(),
            institution_id: "INST001".to_string(),
            status: InvitationStatus::Pending,
            invited_by: "T001".to_string(),
            invited_at: now - Duration::days(30),
            expires_at: now - Duration::days(1),
        })
        .unwrap();
    let outcome = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS007", None, now)
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Rejected { .. }));

    // 有效邀请 -> 接受并入班
    env.invitations
        .insert(&Invitation {
            invitation_id: "INV002".to_string(),
            class_id: "CLS007".to_string(),
            student_id: "S001".to_string(),
            institution_id: "INST001".to_string(),
            status: InvitationStatus::Pending,
            invited_by: "T001".to_string(),
            invited_at: now,
            expires_at: now + Duration::days(7),
        })
        .unwrap();
    let outcome = env
        .orchestrator
        .accept_invitation(&principal, "S001", "CLS007", now + Duration::hours(1))
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Enrolled { .. }));
    assert_eq!(
        env.audits.count_by_action("S001", "CLS007", "InvitationAccepted").unwrap(),
        1
    );
}

// ==========================================
// 测试 6: 退课与截止时间
// ==========================================

#[tokio::test]
async fn test_drop_student_releases_seat_and_promotes() {
    let env = setup();
    env.classes.upsert(&open_class("CLS008", "INST001", 1, 2)).unwrap();
    let now = ts(2026, 9, 1, 9, 0);

    let x = student_principal("X", "INST001");
    let y = student_principal("Y", "INST001");
    env.orchestrator.request_enrollment(&x, "X", "CLS008", None, now).await.unwrap();
    let outcome = env
        .orchestrator
        .request_enrollment(&y, "Y", "CLS008", None, now)
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Waitlisted { position: 1, .. }));

    env.orchestrator
        .drop_student(&x, "X", "CLS008", "课程冲突", now + Duration::hours(1))
        .await
        .unwrap();

    // X 转 DROPPED, Y 获得晋升保留
    assert!(env.enrollments.find_active("CLS008", "X").unwrap().is_none());
    let entry = env.waitlists.find("CLS008", "Y").unwrap().unwrap();
    assert!(entry.notified_at.is_some());
    assert_eq!(env.audits.count_by_action("Y", "CLS008", "Promoted").unwrap(), 1);
}

#[tokio::test]
async fn test_drop_after_withdraw_deadline_rejected() {
    let env = setup();
    let mut config = open_class("CLS009", "INST001", 5, 0);
    config.drop_deadline = Some(ts(2026, 10, 1, 0, 0));
    config.withdraw_deadline = Some(ts(2026, 11, 1, 0, 0));
    env.classes.upsert(&config).unwrap();
    let principal = student_principal("S001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    env.orchestrator
        .request_enrollment(&principal, "S001", "CLS009", None, now)
        .await
        .unwrap();

    // drop 截止后、withdraw 截止前: 按退选记录
    env.orchestrator
        .drop_student(&principal, "S001", "CLS009", "转专业", ts(2026, 10, 15, 0, 0))
        .await
        .unwrap();
    let record = env.enrollments.list_by_class("CLS009", None).unwrap();
    assert!(record[0].status_reason.as_deref().unwrap().starts_with("withdrawn"));

    // withdraw 截止后: 拒绝
    env.orchestrator
        .request_enrollment(&principal, "S001", "CLS009", None, ts(2026, 10, 20, 0, 0))
        .await
        .unwrap();
    let err = env
        .orchestrator
        .drop_student(&principal, "S001", "CLS009", "太晚了", ts(2026, 11, 2, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::BusinessRuleViolation(_)));
}

// ==========================================
// 测试 7: 批量选课
// ==========================================

#[tokio::test]
async fn test_bulk_enroll_reports_per_student_results() {
    let env = setup();
    env.classes.upsert(&open_class("CLS010", "INST001", 2, 1)).unwrap();
    let registrar = registrar_principal("R001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    let students: Vec<String> =
        ["S001", "S002", "S003", "S004"].iter().map(|s| s.to_string()).collect();
    let report = env
        .orchestrator
        .bulk_enroll(&registrar, &students, "CLS010", now)
        .await
        .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.enrolled, 2);
    assert_eq!(report.waitlisted, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.items.len(), 4);

    // 学生角色不得批量操作
    let student = student_principal("S001", "INST001");
    let err = env
        .orchestrator
        .bulk_enroll(&student, &students, "CLS010", now)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::AuthorizationDenied(_)));
}

// ==========================================
// 测试 8: 权限前置
// ==========================================

#[tokio::test]
async fn test_cross_institution_rejected_before_mutation() {
    let env = setup();
    env.classes.upsert(&open_class("CLS011", "INST001", 5, 5)).unwrap();
    let outsider = student_principal("S001", "INST999");

    let err = env
        .orchestrator
        .request_enrollment(&outsider, "S001", "CLS011", None, ts(2026, 9, 1, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::AuthorizationDenied(_)));
    assert!(env.enrollments.find_active("CLS011", "S001").unwrap().is_none());
}

#[tokio::test]
async fn test_student_cannot_enroll_for_others() {
    let env = setup();
    env.classes.upsert(&open_class("CLS012", "INST001", 5, 5)).unwrap();
    let principal = student_principal("S001", "INST001");

    let err = env
        .orchestrator
        .request_enrollment(&principal, "S002", "CLS012", None, ts(2026, 9, 1, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::AuthorizationDenied(_)));
}

// ==========================================
// 测试 9: 结课
// ==========================================

#[tokio::test]
async fn test_complete_enrollment_staff_only() {
    let env = setup();
    env.classes.upsert(&open_class("CLS013", "INST001", 5, 5)).unwrap();
    let student = student_principal("S001", "INST001");
    let registrar = registrar_principal("R001", "INST001");
    let now = ts(2026, 9, 1, 9, 0);

    env.orchestrator
        .request_enrollment(&student, "S001", "CLS013", None, now)
        .await
        .unwrap();

    let err = env
        .orchestrator
        .complete_enrollment(&student, "S001", "CLS013", ts(2026, 12, 20, 0, 0))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::AuthorizationDenied(_)));

    env.orchestrator
        .complete_enrollment(&registrar, "S001", "CLS013", ts(2026, 12, 20, 0, 0))
        .unwrap();
    let records = env.enrollments.list_by_class("CLS013", None).unwrap();
    assert_eq!(records[0].status, EnrollmentStatus::Completed);
    assert_eq!(env.audits.count_by_action("S001", "CLS013", "Completed").unwrap(), 1);
}

// ==========================================
// 测试 10: 非法配置同步拒绝
// ==========================================

#[tokio::test]
async fn test_invalid_capacity_config_rejected() {
    let env = setup();
    let mut config = open_class("CLS014", "INST001", 1, 0);
    config.capacity = 0; // 非法: capacity 必须 >= 1
    env.classes.upsert(&config).unwrap();
    let principal = student_principal("S001", "INST001");

    let err = env
        .orchestrator
        .request_enrollment(&principal, "S001", "CLS014", None, ts(2026, 9, 1, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ValidationError(_)));
    assert!(env.enrollments.find_active("CLS014", "S001").unwrap().is_none());
}
