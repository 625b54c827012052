// ==========================================
// 审批工作流测试
// ==========================================
// 职责: 验证批准/拒绝/懒惰过期与决策时刻的容量回查
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use chrono::Duration;
use course_enroll::config::ConfigManager;
use course_enroll::domain::types::{EnrollmentStatus, RequestStatus};
use course_enroll::engine::{
    ApprovalEngine, ApprovalOutcome, CapacityManager, EnrollmentOrchestrator, EnrollmentOutcome,
    OptionalEventPublisher,
};
use course_enroll::repository::audit_log_repo::AuditLogRepository;
use course_enroll::repository::class_config_repo::ClassConfigRepository;
use course_enroll::repository::enrollment_repo::EnrollmentRepository;
use course_enroll::repository::error::RepositoryError;
use course_enroll::repository::request_repo::EnrollmentRequestRepository;
use std::sync::Arc;

use crate::test_helpers::{
    create_test_db, open_class, open_shared_conn, registrar_principal, restricted_class,
    student_principal, ts, FixtureFactsProvider,
};

struct Env {
    _temp: tempfile::NamedTempFile,
    orchestrator: EnrollmentOrchestrator<ConfigManager>,
    approval: ApprovalEngine,
    capacity: Arc<CapacityManager>,
    classes: ClassConfigRepository,
    enrollments: EnrollmentRepository,
    requests: EnrollmentRequestRepository,
    audits: AuditLogRepository,
}

fn setup() -> Env {
    let (temp, db_path) = create_test_db().unwrap();
    let conn = open_shared_conn(&db_path);
    let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
    let capacity = Arc::new(CapacityManager::new(conn.clone(), OptionalEventPublisher::none()));
    let orchestrator = EnrollmentOrchestrator::new(
        conn.clone(),
        capacity.clone(),
        Arc::new(FixtureFactsProvider::new()),
        config,
        OptionalEventPublisher::none(),
    );
    let approval = ApprovalEngine::new(conn.clone(), capacity.clone(), OptionalEventPublisher::none());
    Env {
        _temp: temp,
        orchestrator,
        approval,
        capacity,
        classes: ClassConfigRepository::new(conn.clone()),
        enrollments: EnrollmentRepository::new(conn.clone()),
        requests: EnrollmentRequestRepository::new(conn.clone()),
        audits: AuditLogRepository::new(conn),
    }
}

/// 提交一条待审申请,返回 request_id
async fn submit_request(env: &Env, class_id: &str, student_id: &str) -> String {
    let principal = student_principal(student_id, "INST001");
    let outcome = env
        .orchestrator
        .request_enrollment(&principal, student_id, class_id, Some("申请理由"), ts(2026, 9, 1, 9, 0))
        .await
        .unwrap();
    match outcome {
        EnrollmentOutcome::PendingApproval { request_id, .. } => request_id,
        other => panic!("应进入待审: {:?}", other),
    }
}

// ==========================================
// 测试 1: 批准 -> 入班
// ==========================================

#[tokio::test]
async fn test_approve_enrolls_student() {
    let env = setup();
    env.classes.upsert(&restricted_class("CLS001", "INST001", 5, true)).unwrap();
    let request_id = submit_request(&env, "CLS001", "S001").await;

    let approver = registrar_principal("R001", "INST001");
    let outcome = env
        .approval
        .approve(&approver, &request_id, ts(2026, 9, 2, 10, 0))
        .unwrap();
    assert!(matches!(outcome, ApprovalOutcome::ApprovedEnrolled { .. }));

    let request = env.requests.find_by_id(&request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Approved);
    assert_eq!(request.reviewed_by.as_deref(), Some("R001"));

    let active = env.enrollments.find_active("CLS001", "S001").unwrap().unwrap();
    assert_eq!(active.status, EnrollmentStatus::Enrolled);
    assert_eq!(env.audits.count_by_action("S001", "CLS001", "Approved").unwrap(), 1);

    // 终态申请不可再次决策
    let err = env
        .approval
        .approve(&approver, &request_id, ts(2026, 9, 2, 11, 0))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
}

// ==========================================
// 测试 2: 批准时容量已满 -> 自动转候补
// ==========================================

#[tokio::test]
async fn test_approve_when_full_falls_back_to_waitlist() {
    let env = setup();
    let config = restricted_class("CLS002", "INST001", 1, false);
    env.classes.upsert(&config).unwrap();
    let request_id = submit_request(&env, "CLS002", "S001").await;

    // 申请提交后容量被他人占满
    env.capacity
        .allocate(&config, "OCCUPIER", "R001", 0, ts(2026, 9, 1, 12, 0))
        .unwrap();

    let approver = registrar_principal("R001", "INST001");
    let outcome = env
        .approval
        .approve(&approver, &request_id, ts(2026, 9, 2, 10, 0))
        .unwrap();
    match outcome {
        ApprovalOutcome::ApprovedWaitlisted { position, .. } => assert_eq!(position, 1),
        other => panic!("应回落候补: {:?}", other),
    }

    let request = env.requests.find_by_id(&request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Approved);
    let active = env.enrollments.find_active("CLS002", "S001").unwrap().unwrap();
    assert_eq!(active.status, EnrollmentStatus::Waitlisted);
}

// ==========================================
// 测试 3: 拒绝(理由必填) — 规格场景
// ==========================================
// restricted + requiresJustification: 审批人以"材料不足"拒绝
// -> 申请 DENIED, 审计 action=Denied, 入班人数不变

#[tokio::test]
async fn test_deny_with_reason_keeps_enrollment_unchanged() {
    let env = setup();
    env.classes.upsert(&restricted_class("CLS003", "INST001", 5, true)).unwrap();
    let request_id = submit_request(&env, "CLS003", "S001").await;
    let approver = registrar_principal("R001", "INST001");

    // 空理由拒绝被校验拦下
    let err = env
        .approval
        .deny(&approver, &request_id, "  ", ts(2026, 9, 2, 10, 0))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ValidationError(_)));

    let before = env.enrollments.count_by_status("CLS003", EnrollmentStatus::Enrolled).unwrap();
    env.approval
        .deny(&approver, &request_id, "材料不足", ts(2026, 9, 2, 10, 0))
        .unwrap();

    let request = env.requests.find_by_id(&request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Denied);
    assert_eq!(request.review_notes.as_deref(), Some("材料不足"));

    let after = env.enrollments.count_by_status("CLS003", EnrollmentStatus::Enrolled).unwrap();
    assert_eq!(before, after, "拒绝不得改变入班人数");
    assert_eq!(env.audits.count_by_action("S001", "CLS003", "Denied").unwrap(), 1);
}

// ==========================================
// 测试 4: 懒惰过期 — 读到超时 PENDING 即转 EXPIRED,审计恰好一条
// ==========================================

#[tokio::test]
async fn test_lazy_expiry_writes_exactly_one_audit_entry() {
    let env = setup();
    env.classes.upsert(&restricted_class("CLS004", "INST001", 5, true)).unwrap();
    let request_id = submit_request(&env, "CLS004", "S001").await;

    // 7 天有效期之后读取
    let late = ts(2026, 9, 1, 9, 0) + Duration::days(8);
    let request = env.approval.get_request(&request_id, late).unwrap();
    assert_eq!(request.status, RequestStatus::Expired);

    // 重复读取不再追加审计
    let request = env.approval.get_request(&request_id, late + Duration::hours(1)).unwrap();
    assert_eq!(request.status, RequestStatus::Expired);
    let request = env.approval.get_request(&request_id, late + Duration::days(1)).unwrap();
    assert_eq!(request.status, RequestStatus::Expired);

    assert_eq!(
        env.audits.count_by_action("S001", "CLS004", "RequestExpired").unwrap(),
        1,
        "懒惰过期应恰好写一条审计"
    );

    // 过期申请不可批准
    let approver = registrar_principal("R001", "INST001");
    let err = env.approval.approve(&approver, &request_id, late).unwrap_err();
    match err {
        RepositoryError::InvalidStateTransition { from, .. } => assert_eq!(from, "EXPIRED"),
        other => panic!("应为状态转换错误: {:?}", other),
    }
}

// ==========================================
// 测试 5: 批准后候补也满 -> 整体回滚,申请保持 PENDING
// ==========================================

#[tokio::test]
async fn test_approve_rolls_back_when_waitlist_also_full() {
    let env = setup();
    let mut config = restricted_class("CLS005", "INST001", 1, false);
    config.waitlist_capacity = 1;
    env.classes.upsert(&config).unwrap();
    let request_id = submit_request(&env, "CLS005", "S001").await;

    // 容量与候补均被占满
    env.capacity.allocate(&config, "OCC1", "R001", 0, ts(2026, 9, 1, 12, 0)).unwrap();
    env.capacity.allocate(&config, "OCC2", "R001", 0, ts(2026, 9, 1, 12, 5)).unwrap();

    let approver = registrar_principal("R001", "INST001");
    let err = env
        .approval
        .approve(&approver, &request_id, ts(2026, 9, 2, 10, 0))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::BusinessRuleViolation(_)));

    // 事务回滚: 申请仍为 PENDING,学生无活动记录
    let request = env.requests.find_by_id(&request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert!(env.enrollments.find_active("CLS005", "S001").unwrap().is_none());
}

// ==========================================
// 测试 6: OPEN 模式班级没有待审申请可言
// ==========================================

#[tokio::test]
async fn test_get_request_not_found() {
    let env = setup();
    env.classes.upsert(&open_class("CLS006", "INST001", 5, 5)).unwrap();
    let err = env
        .approval
        .get_request("REQ-NOT-EXIST", ts(2026, 9, 1, 9, 0))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
}
