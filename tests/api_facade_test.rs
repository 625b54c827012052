// ==========================================
// API 门面端到端测试
// ==========================================
// 职责: 验证对外操作面、错误码分类与权限前置
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use course_enroll::api::EnrollmentApi;
use course_enroll::config::ConfigManager;
use course_enroll::engine::EnrollmentOutcome;
use course_enroll::repository::class_config_repo::ClassConfigRepository;
use std::sync::Arc;

use crate::test_helpers::{
    create_test_db, open_class, open_shared_conn, registrar_principal, student_principal,
    FixtureFactsProvider,
};

struct Env {
    _temp: tempfile::NamedTempFile,
    api: EnrollmentApi<ConfigManager>,
    classes: ClassConfigRepository,
}

fn setup() -> Env {
    let (temp, db_path) = create_test_db().unwrap();
    let conn = open_shared_conn(&db_path);
    let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
    let api = EnrollmentApi::new(
        conn.clone(),
        config,
        Arc::new(FixtureFactsProvider::new()),
        None,
    );
    Env {
        _temp: temp,
        api,
        classes: ClassConfigRepository::new(conn),
    }
}

// ==========================================
// 测试 1: 主流程 + 候补查询
// ==========================================

#[tokio::test]
async fn test_enroll_waitlist_and_queries() {
    let env = setup();
    env.classes.upsert(&open_class("CLS001", "INST001", 1, 5)).unwrap();

    let s1 = student_principal("S001", "INST001");
    let s2 = student_principal("S002", "INST001");

    let outcome = env.api.request_enrollment(&s1, "S001", "CLS001", None).await.unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Enrolled { .. }));
    assert_eq!(
        env.api.get_waitlist_position(&s1, "CLS001", "S001").unwrap(),
        None
    );

    let outcome = env.api.request_enrollment(&s2, "S002", "CLS001", None).await.unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Waitlisted { position: 1, .. }));
    assert_eq!(
        env.api.get_waitlist_position(&s2, "CLS001", "S002").unwrap(),
        Some(1)
    );
    let probability = env
        .api
        .estimate_enrollment_probability(&s2, "CLS001", "S002")
        .unwrap()
        .unwrap();
    assert!((probability - 0.9).abs() < 1e-9);

    // 审计轨迹: 学生可查本人
    let trail = env.api.list_audit_trail(&s2, "S002", "CLS001").unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "Waitlisted");
}

// ==========================================
// 测试 2: 错误码分类
// ==========================================

#[tokio::test]
async fn test_error_codes_surfaced_to_caller() {
    let env = setup();
    env.classes.upsert(&open_class("CLS001", "INST001", 1, 0)).unwrap();
    let student = student_principal("S001", "INST001");
    let registrar = registrar_principal("R001", "INST001");

    // not_found
    let err = env
        .api
        .request_enrollment(&student, "S001", "CLS-MISSING", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // authorization: 学生不得直接调用教务分配
    let err = env.api.allocate(&student, "CLS001", "S001").unwrap_err();
    assert_eq!(err.code(), "authorization");
    assert!(!err.is_retryable());

    // 教务分配成功
    env.api.allocate(&registrar, "CLS001", "S001").unwrap();

    // validation: 空理由在任何查找/写入之前被拦下
    let err = env.api.deny_request(&registrar, "REQ-NONE", " ").unwrap_err();
    assert_eq!(err.code(), "validation");
}

// ==========================================
// 测试 3: 只读规则判定
// ==========================================

#[tokio::test]
async fn test_evaluate_eligibility_is_side_effect_free() {
    let env = setup();
    env.classes.upsert(&open_class("CLS001", "INST001", 5, 5)).unwrap();
    let student = student_principal("S001", "INST001");

    let result = env.api.evaluate_eligibility(&student, "S001", "CLS001").unwrap();
    assert!(result.eligible);

    // 判定不产生任何选课记录/审计
    let trail = env.api.list_audit_trail(&student, "S001", "CLS001").unwrap();
    assert!(trail.is_empty());
}

// ==========================================
// 测试 4: 跨租户访问拒绝
// ==========================================

#[tokio::test]
async fn test_cross_tenant_queries_denied() {
    let env = setup();
    env.classes.upsert(&open_class("CLS001", "INST001", 5, 5)).unwrap();
    let outsider = student_principal("S001", "INST999");

    let err = env
        .api
        .get_waitlist_position(&outsider, "CLS001", "S001")
        .unwrap_err();
    assert_eq!(err.code(), "authorization");
}
