// ==========================================
// 选课准入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 多租户教育平台的选课准入与候补引擎
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 租户配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/schema 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ConflictSeverity, ConflictStatus, ConflictType, EnrollmentMode, EnrollmentStatus,
    InvitationStatus, OverrideStatus, OverrideType, Principal, ReasonSeverity, RequestStatus, Role,
    RuleType,
};

// 领域实体
pub use domain::{
    AuditAction, AuditLogEntry, ClassEnrollmentConfig, ConflictRecord, Enrollment,
    EnrollmentRequest, Invitation, OverrideRequest, Prerequisite, Restriction, RoleCapability,
    StudentFacts, WaitlistEntry,
};

// 引擎
pub use engine::{
    AllocationOutcome, ApprovalEngine, ApprovalOutcome, BulkEnrollReport, CapacityManager,
    ConflictDetector, EligibilityEngine, EligibilityResult, EnrollmentOrchestrator,
    EnrollmentOutcome, OverrideEngine, PromotionOutcome, StudentFactsProvider,
};

// API
pub use api::{ApiError, ApiResult, EnrollmentApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "选课准入与候补系统";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";
