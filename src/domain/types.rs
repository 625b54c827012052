// ==========================================
// 选课准入系统 - 领域类型定义
// ==========================================
// 红线: 选课模式与状态机均为封闭枚举,禁止字符串自由值
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 选课模式 (Enrollment Mode)
// ==========================================
// OPEN: 满足规则即可直接分配席位
// RESTRICTED: 需要审批人决策
// INVITATION_ONLY: 仅凭有效邀请入班
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentMode {
    Open,
    Restricted,
    InvitationOnly,
}

impl fmt::Display for EnrollmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentMode::Open => write!(f, "OPEN"),
            EnrollmentMode::Restricted => write!(f, "RESTRICTED"),
            EnrollmentMode::InvitationOnly => write!(f, "INVITATION_ONLY"),
        }
    }
}

impl EnrollmentMode {
    /// 从字符串解析选课模式
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Some(EnrollmentMode::Open),
            "RESTRICTED" => Some(EnrollmentMode::Restricted),
            "INVITATION_ONLY" => Some(EnrollmentMode::InvitationOnly),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EnrollmentMode::Open => "OPEN",
            EnrollmentMode::Restricted => "RESTRICTED",
            EnrollmentMode::InvitationOnly => "INVITATION_ONLY",
        }
    }
}

// ==========================================
// 选课记录状态 (Enrollment Status)
// ==========================================
// 红线: DROPPED/COMPLETED 为终态,只追加不删除(软状态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Enrolled,   // 已入班
    Waitlisted, // 候补中
    Dropped,    // 已退课
    Completed,  // 已结课
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentStatus::Enrolled => write!(f, "ENROLLED"),
            EnrollmentStatus::Waitlisted => write!(f, "WAITLISTED"),
            EnrollmentStatus::Dropped => write!(f, "DROPPED"),
            EnrollmentStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl EnrollmentStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ENROLLED" => Some(EnrollmentStatus::Enrolled),
            "WAITLISTED" => Some(EnrollmentStatus::Waitlisted),
            "DROPPED" => Some(EnrollmentStatus::Dropped),
            "COMPLETED" => Some(EnrollmentStatus::Completed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "ENROLLED",
            EnrollmentStatus::Waitlisted => "WAITLISTED",
            EnrollmentStatus::Dropped => "DROPPED",
            EnrollmentStatus::Completed => "COMPLETED",
        }
    }

    /// 是否为占用活动记录的状态(同一学生同一班级最多一条)
    pub fn is_active(&self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled | EnrollmentStatus::Waitlisted)
    }
}

// ==========================================
// 审批请求状态 (Request Status)
// ==========================================
// PENDING 是唯一非终态;进入终态后记录不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "PENDING"),
            RequestStatus::Approved => write!(f, "APPROVED"),
            RequestStatus::Denied => write!(f, "DENIED"),
            RequestStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl RequestStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(RequestStatus::Pending),
            "APPROVED" => Some(RequestStatus::Approved),
            "DENIED" => Some(RequestStatus::Denied),
            "EXPIRED" => Some(RequestStatus::Expired),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Denied => "DENIED",
            RequestStatus::Expired => "EXPIRED",
        }
    }
}

// ==========================================
// 邀请状态 (Invitation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "PENDING"),
            InvitationStatus::Accepted => write!(f, "ACCEPTED"),
            InvitationStatus::Declined => write!(f, "DECLINED"),
            InvitationStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl InvitationStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(InvitationStatus::Pending),
            "ACCEPTED" => Some(InvitationStatus::Accepted),
            "DECLINED" => Some(InvitationStatus::Declined),
            "EXPIRED" => Some(InvitationStatus::Expired),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "PENDING",
            InvitationStatus::Accepted => "ACCEPTED",
            InvitationStatus::Declined => "DECLINED",
            InvitationStatus::Expired => "EXPIRED",
        }
    }
}

// ==========================================
// 规则类型 (Rule Type)
// ==========================================
// 前置条件与限制条件共用的谓词类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Course,     // 前置课程
    Gpa,        // 最低绩点
    Year,       // 年级要求
    Major,      // 专业要求
    Department, // 院系要求
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Course => write!(f, "COURSE"),
            RuleType::Gpa => write!(f, "GPA"),
            RuleType::Year => write!(f, "YEAR"),
            RuleType::Major => write!(f, "MAJOR"),
            RuleType::Department => write!(f, "DEPARTMENT"),
        }
    }
}

impl RuleType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "COURSE" => Some(RuleType::Course),
            "GPA" => Some(RuleType::Gpa),
            "YEAR" => Some(RuleType::Year),
            "MAJOR" => Some(RuleType::Major),
            "DEPARTMENT" => Some(RuleType::Department),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            RuleType::Course => "COURSE",
            RuleType::Gpa => "GPA",
            RuleType::Year => "YEAR",
            RuleType::Major => "MAJOR",
            RuleType::Department => "DEPARTMENT",
        }
    }
}

// ==========================================
// 规则原因严重级别 (Reason Severity)
// ==========================================
// 红线: WARNING 永不阻断入班
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonSeverity {
    Warning,
    Error,
}

impl fmt::Display for ReasonSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonSeverity::Warning => write!(f, "WARNING"),
            ReasonSeverity::Error => write!(f, "ERROR"),
        }
    }
}

// ==========================================
// 冲突类型 (Conflict Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    CapacityExceeded,      // 实际入班人数超过容量
    SuspiciousActivity,    // 异常选课速率
    PrerequisiteViolation, // 前置条件被绕过
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::CapacityExceeded => write!(f, "CAPACITY_EXCEEDED"),
            ConflictType::SuspiciousActivity => write!(f, "SUSPICIOUS_ACTIVITY"),
            ConflictType::PrerequisiteViolation => write!(f, "PREREQUISITE_VIOLATION"),
        }
    }
}

impl ConflictType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CAPACITY_EXCEEDED" => Some(ConflictType::CapacityExceeded),
            "SUSPICIOUS_ACTIVITY" => Some(ConflictType::SuspiciousActivity),
            "PREREQUISITE_VIOLATION" => Some(ConflictType::PrerequisiteViolation),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictType::CapacityExceeded => "CAPACITY_EXCEEDED",
            ConflictType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            ConflictType::PrerequisiteViolation => "PREREQUISITE_VIOLATION",
        }
    }
}

// ==========================================
// 冲突严重级别 (Conflict Severity)
// ==========================================
// 顺序: Low < Medium < High
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSeverity::Low => write!(f, "LOW"),
            ConflictSeverity::Medium => write!(f, "MEDIUM"),
            ConflictSeverity::High => write!(f, "HIGH"),
        }
    }
}

impl ConflictSeverity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(ConflictSeverity::Low),
            "MEDIUM" => Some(ConflictSeverity::Medium),
            "HIGH" => Some(ConflictSeverity::High),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "LOW",
            ConflictSeverity::Medium => "MEDIUM",
            ConflictSeverity::High => "HIGH",
        }
    }
}

// ==========================================
// 冲突记录状态 (Conflict Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStatus::Open => write!(f, "OPEN"),
            ConflictStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

impl ConflictStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Some(ConflictStatus::Open),
            "RESOLVED" => Some(ConflictStatus::Resolved),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictStatus::Open => "OPEN",
            ConflictStatus::Resolved => "RESOLVED",
        }
    }
}

// ==========================================
// 越权放行类型 (Override Type)
// ==========================================
// CAPACITY_OVERRIDE: 为单个学生突破名义容量一个席位
// PREREQUISITE_OVERRIDE: 绕过规则引擎强制入班
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideType {
    CapacityOverride,
    PrerequisiteOverride,
}

impl fmt::Display for OverrideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideType::CapacityOverride => write!(f, "CAPACITY_OVERRIDE"),
            OverrideType::PrerequisiteOverride => write!(f, "PREREQUISITE_OVERRIDE"),
        }
    }
}

impl OverrideType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CAPACITY_OVERRIDE" => Some(OverrideType::CapacityOverride),
            "PREREQUISITE_OVERRIDE" => Some(OverrideType::PrerequisiteOverride),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            OverrideType::CapacityOverride => "CAPACITY_OVERRIDE",
            OverrideType::PrerequisiteOverride => "PREREQUISITE_OVERRIDE",
        }
    }
}

// ==========================================
// 越权请求状态 (Override Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideStatus {
    Pending,
    Approved,
    Denied,
}

impl fmt::Display for OverrideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideStatus::Pending => write!(f, "PENDING"),
            OverrideStatus::Approved => write!(f, "APPROVED"),
            OverrideStatus::Denied => write!(f, "DENIED"),
        }
    }
}

impl OverrideStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(OverrideStatus::Pending),
            "APPROVED" => Some(OverrideStatus::Approved),
            "DENIED" => Some(OverrideStatus::Denied),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            OverrideStatus::Pending => "PENDING",
            OverrideStatus::Approved => "APPROVED",
            OverrideStatus::Denied => "DENIED",
        }
    }
}

// ==========================================
// 角色 (Role)
// ==========================================
// 由上游鉴权层解析,本核心只做能力判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Instructor,
    Registrar,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "STUDENT"),
            Role::Instructor => write!(f, "INSTRUCTOR"),
            Role::Registrar => write!(f, "REGISTRAR"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "STUDENT" => Some(Role::Student),
            "INSTRUCTOR" => Some(Role::Instructor),
            "REGISTRAR" => Some(Role::Registrar),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Instructor => "INSTRUCTOR",
            Role::Registrar => "REGISTRAR",
            Role::Admin => "ADMIN",
        }
    }

    /// 是否为教务侧角色(可审批/可代办选课)
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Instructor | Role::Registrar | Role::Admin)
    }
}

// ==========================================
// 已鉴权主体 (Principal)
// ==========================================
// 由上游会话层解析后传入,本核心不做认证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub institution_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, institution_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            institution_id: institution_id.into(),
            role,
        }
    }
}
