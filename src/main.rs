// ==========================================
// 选课准入系统 - 运维主入口
// ==========================================
// 用途: 初始化数据库并执行一次冲突检测扫描
// 用法: course-enroll [db_path] [institution_id]
// ==========================================

use course_enroll::config::ConfigManager;
use course_enroll::engine::ConflictDetector;
use course_enroll::repository::audit_log_repo::AuditLogRepository;
use course_enroll::repository::class_config_repo::ClassConfigRepository;
use course_enroll::repository::conflict_repo::ConflictRepository;
use course_enroll::repository::enrollment_repo::EnrollmentRepository;
use course_enroll::{db, logging};
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} - 冲突检测扫描", course_enroll::APP_NAME);
    tracing::info!("系统版本: {}", course_enroll::VERSION);
    tracing::info!("==================================================");

    let mut args = std::env::args().skip(1);
    let db_path = args.next().unwrap_or_else(|| "enroll.db".to_string());
    let institution_id = args.next().unwrap_or_else(|| "default".to_string());
    tracing::info!("使用数据库: {}", db_path);

    // 打开连接并保证 schema 就绪
    let conn = db::open_sqlite_connection(&db_path)?;
    db::initialize_schema(&conn)?;
    match db::read_schema_version(&conn)? {
        Some(v) if v == db::CURRENT_SCHEMA_VERSION => {
            tracing::info!("schema_version = {}", v);
        }
        Some(v) => {
            tracing::warn!(
                "schema_version = {} 与期望 {} 不一致,请检查迁移状态",
                v,
                db::CURRENT_SCHEMA_VERSION
            );
        }
        None => tracing::warn!("schema_version 表缺失"),
    }

    let conn = Arc::new(Mutex::new(conn));
    let config = Arc::new(ConfigManager::from_connection(conn.clone())?);
    let detector = ConflictDetector::new(
        Arc::new(ClassConfigRepository::new(conn.clone())),
        Arc::new(EnrollmentRepository::new(conn.clone())),
        Arc::new(ConflictRepository::new(conn.clone())),
        Arc::new(AuditLogRepository::new(conn.clone())),
        config,
    );

    let now = chrono::Utc::now().naive_utc();
    let found = detector.detect_conflicts(&institution_id, now, None).await;

    if found.is_empty() {
        tracing::info!(institution_id = %institution_id, "本次扫描未发现新冲突");
    } else {
        for record in &found {
            tracing::warn!(
                conflict_id = %record.conflict_id,
                conflict_type = %record.conflict_type,
                severity = %record.severity,
                "{}",
                record.description
            );
        }
        tracing::info!("本次扫描新建 {} 条冲突记录", found.len());
    }

    Ok(())
}
