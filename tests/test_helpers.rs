// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、固定事实提供方、实体构造器
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use course_enroll::db;
use course_enroll::domain::class_config::ClassEnrollmentConfig;
use course_enroll::domain::student::{CompletedCourse, StudentFacts};
use course_enroll::domain::types::{EnrollmentMode, Principal, Role};
use course_enroll::engine::StudentFactsProvider;
use rusqlite::Connection;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = db::open_sqlite_connection(&db_path)?;
    db::initialize_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接(统一 PRAGMA)
pub fn open_shared_conn(db_path: &str) -> Arc<Mutex<Connection>> {
    let conn = db::open_sqlite_connection(db_path).unwrap();
    Arc::new(Mutex::new(conn))
}

/// 固定时刻构造器
pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

/// OPEN 模式班级配置构造器
pub fn open_class(
    class_id: &str,
    institution_id: &str,
    capacity: i32,
    waitlist_capacity: i32,
) -> ClassEnrollmentConfig {
    ClassEnrollmentConfig {
        class_id: class_id.to_string(),
        institution_id: institution_id.to_string(),
        enrollment_mode: EnrollmentMode::Open,
        capacity,
        waitlist_capacity,
        allow_waitlist: waitlist_capacity > 0,
        max_waitlist_position: None,
        enrollment_start: None,
        enrollment_end: None,
        drop_deadline: None,
        withdraw_deadline: None,
        auto_approve: false,
        requires_justification: false,
    }
}

/// RESTRICTED 模式班级配置构造器
pub fn restricted_class(
    class_id: &str,
    institution_id: &str,
    capacity: i32,
    requires_justification: bool,
) -> ClassEnrollmentConfig {
    let mut config = open_class(class_id, institution_id, capacity, 5);
    config.enrollment_mode = EnrollmentMode::Restricted;
    config.requires_justification = requires_justification;
    config
}

/// 学生主体
pub fn student_principal(user_id: &str, institution_id: &str) -> Principal {
    Principal::new(user_id, institution_id, Role::Student)
}

/// 教务主体
pub fn registrar_principal(user_id: &str, institution_id: &str) -> Principal {
    Principal::new(user_id, institution_id, Role::Registrar)
}

/// 默认学业事实(满足常规班级的全部条件)
pub fn default_facts(student_id: &str, institution_id: &str) -> StudentFacts {
    StudentFacts {
        student_id: student_id.to_string(),
        institution_id: institution_id.to_string(),
        gpa: Some(3.2),
        year: Some(2),
        major: Some("CS".to_string()),
        department: Some("ENGINEERING".to_string()),
        completed_courses: vec![CompletedCourse {
            course_code: "MATH101".to_string(),
            grade: Some("B".to_string()),
        }],
    }
}

// ==========================================
// FixtureFactsProvider - 固定事实提供方
// ==========================================
// 未显式注册的学生返回默认事实
pub struct FixtureFactsProvider {
    overrides: Mutex<HashMap<String, StudentFacts>>,
}

impl FixtureFactsProvider {
    pub fn new() -> Self {
        Self {
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_facts(self, facts: StudentFacts) -> Self {
        self.overrides
            .lock()
            .unwrap()
            .insert(facts.student_id.clone(), facts);
        self
    }

    pub fn set_facts(&self, facts: StudentFacts) {
        self.overrides
            .lock()
            .unwrap()
            .insert(facts.student_id.clone(), facts);
    }
}

impl Default for FixtureFactsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StudentFactsProvider for FixtureFactsProvider {
    fn facts(
        &self,
        institution_id: &str,
        student_id: &str,
    ) -> Result<StudentFacts, Box<dyn Error + Send + Sync>> {
        let map = self.overrides.lock().map_err(|e| e.to_string())?;
        Ok(map
            .get(student_id)
            .cloned()
            .unwrap_or_else(|| default_facts(student_id, institution_id)))
    }
}
