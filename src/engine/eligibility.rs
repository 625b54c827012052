// ==========================================
// 选课准入系统 - 规则引擎
// ==========================================
// 职责: 对 (学生事实, 班级规则) 做准入判定,输出结构化原因
// 红线: 纯函数,无 I/O、无状态; 相同输入必得相同输出
// 红线: WARNING 永不阻断; 仅"不可越权的 ERROR"使 eligible=false
// ==========================================

use crate::domain::class_config::{ClassEnrollmentConfig, Prerequisite, Restriction};
use crate::domain::student::StudentFacts;
use crate::domain::types::{ReasonSeverity, RuleType};
use crate::engine::eligibility_core::{EligibilityCore, RuleCheck, WindowState};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::error::Error;

// ==========================================
// 学生事实提供方 Trait
// ==========================================
// 说明: Engine 层定义 trait, 外部学籍/成绩系统实现适配器
pub trait StudentFactsProvider: Send + Sync {
    /// 拉取学生学业事实
    fn facts(
        &self,
        institution_id: &str,
        student_id: &str,
    ) -> Result<StudentFacts, Box<dyn Error + Send + Sync>>;
}

// ==========================================
// EligibilityReason - 判定原因
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityReason {
    pub reason_type: String, // 如 "ENROLLMENT_WINDOW" / "PREREQ_COURSE" / "RESTRICTION_MAJOR"
    pub message: String,
    pub severity: ReasonSeverity,
    pub overridable: bool,
}

// ==========================================
// EligibilityResult - 判定结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub eligible: bool,
    pub reasons: Vec<EligibilityReason>,
    pub recommended_actions: Vec<String>,
}

impl EligibilityResult {
    /// 是否存在不可越权的 ERROR 原因
    pub fn has_blocking_reason(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| r.severity == ReasonSeverity::Error && !r.overridable)
    }

    /// 原因拼接(用于审计详情)
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(|r| format!("{}: {}", r.reason_type, r.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ==========================================
// EligibilityEngine - 规则引擎
// ==========================================
pub struct EligibilityEngine;

impl EligibilityEngine {
    pub fn new() -> Self {
        Self
    }

    /// 执行完整准入判定
    ///
    /// # 参数
    /// - facts: 学生学业事实(调用方提供)
    /// - config: 班级选课配置
    /// - prerequisites: 前置条件列表
    /// - restrictions: 限制条件列表
    /// - now: 判定时刻
    ///
    /// # 返回
    /// EligibilityResult; eligible=false 当且仅当存在不可越权的 ERROR
    pub fn evaluate(
        &self,
        facts: &StudentFacts,
        config: &ClassEnrollmentConfig,
        prerequisites: &[Prerequisite],
        restrictions: &[Restriction],
        now: NaiveDateTime,
    ) -> EligibilityResult {
        let mut reasons = Vec::new();
        let mut actions = Vec::new();

        // ===== 选课窗口 (不可越权) =====
        match EligibilityCore::determine_window_state(
            now,
            config.enrollment_start,
            config.enrollment_end,
        ) {
            WindowState::Open => {}
            WindowState::NotYetOpen => {
                reasons.push(EligibilityReason {
                    reason_type: "ENROLLMENT_WINDOW".to_string(),
                    message: "选课窗口尚未开放".to_string(),
                    severity: ReasonSeverity::Error,
                    overridable: false,
                });
            }
            WindowState::Closed => {
                reasons.push(EligibilityReason {
                    reason_type: "ENROLLMENT_WINDOW".to_string(),
                    message: "选课窗口已关闭".to_string(),
                    severity: ReasonSeverity::Error,
                    overridable: false,
                });
            }
        }

        // ===== 前置条件 =====
        for prereq in prerequisites {
            let check = Self::check_prerequisite(facts, prereq);
            Self::push_check(
                &mut reasons,
                &mut actions,
                check,
                &format!("PREREQ_{}", prereq.prereq_type),
                !prereq.strict,
            );
        }

        // ===== 限制条件 =====
        for restriction in restrictions {
            let check = Self::check_restriction(facts, restriction);
            Self::push_check(
                &mut reasons,
                &mut actions,
                check,
                &format!("RESTRICTION_{}", restriction.restriction_type),
                restriction.overridable,
            );
        }

        let eligible = !reasons
            .iter()
            .any(|r| r.severity == ReasonSeverity::Error && !r.overridable);

        EligibilityResult {
            eligible,
            reasons,
            recommended_actions: actions,
        }
    }

    /// 单条前置条件判定
    fn check_prerequisite(facts: &StudentFacts, prereq: &Prerequisite) -> RuleCheck {
        match prereq.prereq_type {
            RuleType::Course => {
                EligibilityCore::check_course_prerequisite(&prereq.requirement, &facts.completed_courses)
            }
            RuleType::Gpa => EligibilityCore::check_gpa(&prereq.requirement, facts.gpa),
            RuleType::Year => EligibilityCore::check_year(&prereq.requirement, facts.year),
            RuleType::Major => {
                EligibilityCore::check_membership(&prereq.requirement, facts.major.as_deref(), "专业")
            }
            RuleType::Department => EligibilityCore::check_membership(
                &prereq.requirement,
                facts.department.as_deref(),
                "院系",
            ),
        }
    }

    /// 单条限制条件判定
    fn check_restriction(facts: &StudentFacts, restriction: &Restriction) -> RuleCheck {
        match restriction.restriction_type {
            RuleType::Course => EligibilityCore::check_course_prerequisite(
                &restriction.condition,
                &facts.completed_courses,
            ),
            RuleType::Gpa => EligibilityCore::check_gpa(&restriction.condition, facts.gpa),
            RuleType::Year => EligibilityCore::check_year(&restriction.condition, facts.year),
            RuleType::Major => EligibilityCore::check_membership(
                &restriction.condition,
                facts.major.as_deref(),
                "专业",
            ),
            RuleType::Department => EligibilityCore::check_membership(
                &restriction.condition,
                facts.department.as_deref(),
                "院系",
            ),
        }
    }

    /// 将单条判定结果折叠进原因/建议列表
    fn push_check(
        reasons: &mut Vec<EligibilityReason>,
        actions: &mut Vec<String>,
        check: RuleCheck,
        reason_type: &str,
        overridable: bool,
    ) {
        match check {
            RuleCheck::Satisfied => {}
            RuleCheck::Violated(message) => {
                if overridable {
                    actions.push("可提交越权申请交由教务审批".to_string());
                } else {
                    actions.push(format!("先满足条件: {}", message));
                }
                reasons.push(EligibilityReason {
                    reason_type: reason_type.to_string(),
                    message,
                    severity: ReasonSeverity::Error,
                    overridable,
                });
            }
            RuleCheck::Indeterminate(message) => {
                // 数据质量问题降级为警告,不阻断
                reasons.push(EligibilityReason {
                    reason_type: format!("{}_DATA", reason_type),
                    message,
                    severity: ReasonSeverity::Warning,
                    overridable: true,
                });
            }
        }
    }
}

impl Default for EligibilityEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::student::CompletedCourse;
    use crate::domain::types::EnrollmentMode;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn config() -> ClassEnrollmentConfig {
        ClassEnrollmentConfig {
            class_id: "CLS001".to_string(),
            institution_id: "INST001".to_string(),
            enrollment_mode: EnrollmentMode::Open,
            capacity: 30,
            waitlist_capacity: 10,
            allow_waitlist: true,
            max_waitlist_position: None,
            enrollment_start: Some(ts(2026, 9, 1)),
            enrollment_end: Some(ts(2026, 9, 30)),
            drop_deadline: None,
            withdraw_deadline: None,
            auto_approve: false,
            requires_justification: false,
        }
    }

    fn facts() -> StudentFacts {
        StudentFacts {
            student_id: "S001".to_string(),
            institution_id: "INST001".to_string(),
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

    fn prereq(prereq_type: RuleType, requirement: &str, strict: bool) -> Prerequisite {
        Prerequisite {
            class_id: "CLS001".to_string(),
            prereq_type,
            requirement: requirement.to_string(),
            strict,
        }
    }

    #[test]
    fn test_evaluate_all_satisfied() {
        let engine = EligibilityEngine::new();
        let result = engine.evaluate(
            &facts(),
            &config(),
            &[prereq(RuleType::Course, "MATH101", true)],
            &[],
            ts(2026, 9, 15),
        );
        assert!(result.eligible);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_evaluate_window_closed_blocks() {
        let engine = EligibilityEngine::new();
        let result = engine.evaluate(&facts(), &config(), &[], &[], ts(2026, 10, 15));
        assert!(!result.eligible);
        assert!(result.has_blocking_reason());
        assert_eq!(result.reasons[0].reason_type, "ENROLLMENT_WINDOW");
        assert!(!result.reasons[0].overridable);
    }

    #[test]
    fn test_evaluate_strict_prereq_blocks() {
        let engine = EligibilityEngine::new();
        let result = engine.evaluate(
            &facts(),
            &config(),
            &[prereq(RuleType::Course, "PHYS201", true)],
            &[],
            ts(2026, 9, 15),
        );
        assert!(!result.eligible);
        assert_eq!(result.reasons.len(), 1);
        assert_eq!(result.reasons[0].severity, ReasonSeverity::Error);
        assert!(!result.reasons[0].overridable);
    }

    #[test]
    fn test_evaluate_non_strict_prereq_records_overridable_error() {
        let engine = EligibilityEngine::new();
        let result = engine.evaluate(
            &facts(),
            &config(),
            &[prereq(RuleType::Gpa, "3.8", false)],
            &[],
            ts(2026, 9, 15),
        );
        // 可越权的 ERROR 不使 eligible=false
        assert!(result.eligible);
        assert_eq!(result.reasons.len(), 1);
        assert!(result.reasons[0].overridable);
        assert!(!result.recommended_actions.is_empty());
    }

    #[test]
    fn test_evaluate_missing_facts_degrade_to_warning() {
        let engine = EligibilityEngine::new();
        let mut f = facts();
        f.gpa = None;
        let result = engine.evaluate(
            &f,
            &config(),
            &[prereq(RuleType::Gpa, "3.0", true)],
            &[],
            ts(2026, 9, 15),
        );
        assert!(result.eligible);
        assert_eq!(result.reasons[0].severity, ReasonSeverity::Warning);
    }

    #[test]
    fn test_evaluate_restriction_violation() {
        let engine = EligibilityEngine::new();
        let restriction = Restriction {
            class_id: "CLS001".to_string(),
            restriction_type: RuleType::Major,
            condition: "EE".to_string(),
            overridable: false,
        };
        let result = engine.evaluate(&facts(), &config(), &[], &[restriction], ts(2026, 9, 15));
        assert!(!result.eligible);
        assert_eq!(result.reasons[0].reason_type, "RESTRICTION_MAJOR");
    }

    #[test]
    fn test_evaluate_deterministic() {
        // 纯函数: 相同输入多次调用结果一致
        let engine = EligibilityEngine::new();
        let prereqs = [prereq(RuleType::Course, "MATH101:A", true)];
        let r1 = engine.evaluate(&facts(), &config(), &prereqs, &[], ts(2026, 9, 15));
        let r2 = engine.evaluate(&facts(), &config(), &prereqs, &[], ts(2026, 9, 15));
        assert_eq!(r1.eligible, r2.eligible);
        assert_eq!(r1.reason_summary(), r2.reason_summary());
    }
}
