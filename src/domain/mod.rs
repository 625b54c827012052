// ==========================================
// 选课准入系统 - 领域层
// ==========================================
// 红线: 领域层不依赖仓储层/引擎层,仅承载实体与类型
// ==========================================

pub mod audit;
pub mod class_config;
pub mod conflict;
pub mod enrollment;
pub mod student;
pub mod types;

// 重导出常用实体
pub use audit::{AuditAction, AuditLogEntry};
pub use class_config::{ClassEnrollmentConfig, ConfigValidationError, Prerequisite, Restriction};
pub use conflict::{ConflictRecord, OverrideRequest, RoleCapability};
pub use enrollment::{Enrollment, EnrollmentRequest, Invitation, WaitlistEntry};
pub use student::{CompletedCourse, StudentFacts};
