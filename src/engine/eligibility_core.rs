// ==========================================
// 选课准入系统 - Eligibility Core 纯函数库
// ==========================================
// 职责: 提供选课窗口判定、前置条件判定、限制条件判定的纯逻辑
// 红线: 无状态、无副作用、无 I/O 操作
// ==========================================

use crate::domain::student::CompletedCourse;
use chrono::NaiveDateTime;

// ==========================================
// WindowState - 选课窗口状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,       // 窗口内
    NotYetOpen, // 尚未开放
    Closed,     // 已关闭
}

// ==========================================
// RuleCheck - 单条规则判定结果
// ==========================================
// Indeterminate: 事实缺失或规则串格式错误,降级为警告,不阻断
#[derive(Debug, Clone, PartialEq)]
pub enum RuleCheck {
    Satisfied,
    Violated(String),
    Indeterminate(String),
}

// ==========================================
// EligibilityCore - 纯函数工具类
// ==========================================
pub struct EligibilityCore;

impl EligibilityCore {
    /// 判定选课窗口状态
    ///
    /// # 规则
    /// - 窗口为半开区间 [start, end)
    /// - start/end 任一缺失则该侧不限制
    pub fn determine_window_state(
        now: NaiveDateTime,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> WindowState {
        if let Some(start) = start {
            if now < start {
                return WindowState::NotYetOpen;
            }
        }
        if let Some(end) = end {
            if now >= end {
                return WindowState::Closed;
            }
        }
        WindowState::Open
    }

    /// 字母等级转绩点
    ///
    /// # 规则
    /// - A=4.0, B=3.0, C=2.0, D=1.0, F=0.0
    /// - 后缀 '+' 加 0.3, '-' 减 0.3 (F 无修饰)
    /// - 无法识别返回 None
    pub fn grade_points(grade: &str) -> Option<f64> {
        let grade = grade.trim().to_uppercase();
        let mut chars = grade.chars();
        let letter = chars.next()?;
        let modifier = chars.next();

        let base = match letter {
            'A' => 4.0,
            'B' => 3.0,
            'C' => 2.0,
            'D' => 1.0,
            'F' => 0.0,
            _ => return None,
        };

        match modifier {
            None => Some(base),
            Some('+') if letter != 'F' => Some(base + 0.3),
            Some('-') if letter != 'F' => Some(base - 0.3),
            _ => None,
        }
    }

    /// 解析课程前置要求串
    ///
    /// # 格式
    /// - "MATH101"    -> 修过即可
    /// - "MATH101:C"  -> 修过且等级不低于 C
    pub fn parse_course_requirement(requirement: &str) -> Option<(String, Option<String>)> {
        let requirement = requirement.trim();
        if requirement.is_empty() {
            return None;
        }
        match requirement.split_once(':') {
            Some((course, grade)) => {
                let course = course.trim();
                let grade = grade.trim();
                if course.is_empty() || grade.is_empty() {
                    return None;
                }
                Some((course.to_string(), Some(grade.to_string())))
            }
            None => Some((requirement.to_string(), None)),
        }
    }

    /// 判定课程前置条件
    ///
    /// # 规则
    /// 1. 要求串格式错误 -> Indeterminate
    /// 2. 未修课程 -> Violated
    /// 3. 要求最低等级且成绩缺失/无法识别 -> Indeterminate
    /// 4. 成绩低于要求 -> Violated
    /// 5. 否则 -> Satisfied
    pub fn check_course_prerequisite(
        requirement: &str,
        completed: &[CompletedCourse],
    ) -> RuleCheck {
        let Some((course_code, min_grade)) = Self::parse_course_requirement(requirement) else {
            return RuleCheck::Indeterminate(format!("课程要求格式错误: {}", requirement));
        };

        let Some(record) = completed
            .iter()
            .find(|c| c.course_code.eq_ignore_ascii_case(&course_code))
        else {
            return RuleCheck::Violated(format!("未修前置课程 {}", course_code));
        };

        let Some(min_grade) = min_grade else {
            return RuleCheck::Satisfied;
        };

        let Some(required_points) = Self::grade_points(&min_grade) else {
            return RuleCheck::Indeterminate(format!("最低等级无法识别: {}", min_grade));
        };

        match record.grade.as_deref().and_then(Self::grade_points) {
            None => RuleCheck::Indeterminate(format!("课程 {} 成绩缺失或无法识别", course_code)),
            Some(actual) if actual < required_points => RuleCheck::Violated(format!(
                "课程 {} 成绩不足: 要求 {} 及以上, 实际 {}",
                course_code,
                min_grade,
                record.grade.as_deref().unwrap_or("?")
            )),
            Some(_) => RuleCheck::Satisfied,
        }
    }

    /// 解析数值要求串 (支持 ">=3.0" 与 "3.0" 两种写法,均按下限处理)
    pub fn parse_numeric_requirement(requirement: &str) -> Option<f64> {
        let requirement = requirement.trim();
        let raw = requirement.strip_prefix(">=").unwrap_or(requirement).trim();
        raw.parse::<f64>().ok()
    }

    /// 判定最低绩点要求
    pub fn check_gpa(requirement: &str, gpa: Option<f64>) -> RuleCheck {
        let Some(min_gpa) = Self::parse_numeric_requirement(requirement) else {
            return RuleCheck::Indeterminate(format!("GPA 要求格式错误: {}", requirement));
        };
        match gpa {
            None => RuleCheck::Indeterminate("GPA 缺失".to_string()),
            Some(actual) if actual < min_gpa => RuleCheck::Violated(format!(
                "GPA 不足: 要求 {:.1} 及以上, 实际 {:.2}",
                min_gpa, actual
            )),
            Some(_) => RuleCheck::Satisfied,
        }
    }

    /// 判定最低年级要求
    pub fn check_year(requirement: &str, year: Option<i32>) -> RuleCheck {
        let Some(min_year) = Self::parse_numeric_requirement(requirement) else {
            return RuleCheck::Indeterminate(format!("年级要求格式错误: {}", requirement));
        };
        let min_year = min_year as i32;
        match year {
            None => RuleCheck::Indeterminate("年级缺失".to_string()),
            Some(actual) if actual < min_year => RuleCheck::Violated(format!(
                "年级不足: 要求 {} 年级及以上, 实际 {} 年级",
                min_year, actual
            )),
            Some(_) => RuleCheck::Satisfied,
        }
    }

    /// 判定取值是否在允许列表内 (逗号分隔, 大小写不敏感; 用于专业/院系限制)
    pub fn check_membership(condition: &str, value: Option<&str>, label: &str) -> RuleCheck {
        let allowed: Vec<&str> = condition
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed.is_empty() {
            return RuleCheck::Indeterminate(format!("{}限制条件为空: {}", label, condition));
        }
        match value {
            None => RuleCheck::Indeterminate(format!("{}缺失", label)),
            Some(actual) => {
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(actual)) {
                    RuleCheck::Satisfied
                } else {
                    RuleCheck::Violated(format!(
                        "{}不在允许范围: 要求 [{}], 实际 {}",
                        label, condition, actual
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn course(code: &str, grade: Option<&str>) -> CompletedCourse {
        CompletedCourse {
            course_code: code.to_string(),
            grade: grade.map(|g| g.to_string()),
        }
    }

    // ==========================================
    // 测试 1: 选课窗口判定
    // ==========================================

    #[test]
    fn test_window_open_inside() {
        let state = EligibilityCore::determine_window_state(
            ts(2026, 9, 5, 12),
            Some(ts(2026, 9, 1, 0)),
            Some(ts(2026, 9, 10, 0)),
        );
        assert_eq!(state, WindowState::Open);
    }

    #[test]
    fn test_window_not_yet_open() {
        let state = EligibilityCore::determine_window_state(
            ts(2026, 8, 30, 12),
            Some(ts(2026, 9, 1, 0)),
            Some(ts(2026, 9, 10, 0)),
        );
        assert_eq!(state, WindowState::NotYetOpen);
    }

    #[test]
    fn test_window_closed_at_end_instant() {
        // 半开区间: now == end 即关闭
        let state = EligibilityCore::determine_window_state(
            ts(2026, 9, 10, 0),
            Some(ts(2026, 9, 1, 0)),
            Some(ts(2026, 9, 10, 0)),
        );
        assert_eq!(state, WindowState::Closed);
    }

    #[test]
    fn test_window_open_at_start_instant() {
        let state = EligibilityCore::determine_window_state(
            ts(2026, 9, 1, 0),
            Some(ts(2026, 9, 1, 0)),
            Some(ts(2026, 9, 10, 0)),
        );
        assert_eq!(state, WindowState::Open);
    }

    #[test]
    fn test_window_unbounded() {
        let state = EligibilityCore::determine_window_state(ts(2026, 9, 5, 0), None, None);
        assert_eq!(state, WindowState::Open);
    }

    // ==========================================
    // 测试 2: 字母等级转绩点
    // ==========================================

    #[test]
    fn test_grade_points_plain() {
        assert_eq!(EligibilityCore::grade_points("A"), Some(4.0));
        assert_eq!(EligibilityCore::grade_points("b"), Some(3.0));
        assert_eq!(EligibilityCore::grade_points("F"), Some(0.0));
    }

    #[test]
    fn test_grade_points_modifiers() {
        assert_eq!(EligibilityCore::grade_points("B+"), Some(3.3));
        assert_eq!(EligibilityCore::grade_points("C-"), Some(1.7));
    }

    #[test]
    fn test_grade_points_invalid() {
        assert_eq!(EligibilityCore::grade_points("X"), None);
        assert_eq!(EligibilityCore::grade_points("F+"), None);
        assert_eq!(EligibilityCore::grade_points(""), None);
    }

    // ==========================================
    // 测试 3: 课程前置条件
    // ==========================================

    #[test]
    fn test_course_prerequisite_satisfied() {
        let completed = vec![course("MATH101", Some("B"))];
        let result = EligibilityCore::check_course_prerequisite("MATH101", &completed);
        assert_eq!(result, RuleCheck::Satisfied);
    }

    #[test]
    fn test_course_prerequisite_missing() {
        let completed = vec![course("PHYS101", Some("A"))];
        let result = EligibilityCore::check_course_prerequisite("MATH101", &completed);
        assert!(matches!(result, RuleCheck::Violated(_)));
    }

    #[test]
    fn test_course_prerequisite_min_grade_met() {
        let completed = vec![course("MATH101", Some("B-"))];
        let result = EligibilityCore::check_course_prerequisite("MATH101:C", &completed);
        assert_eq!(result, RuleCheck::Satisfied);
    }

    #[test]
    fn test_course_prerequisite_grade_too_low() {
        let completed = vec![course("MATH101", Some("D"))];
        let result = EligibilityCore::check_course_prerequisite("MATH101:C", &completed);
        assert!(matches!(result, RuleCheck::Violated(_)));
    }

    #[test]
    fn test_course_prerequisite_grade_missing_is_indeterminate() {
        let completed = vec![course("MATH101", None)];
        let result = EligibilityCore::check_course_prerequisite("MATH101:C", &completed);
        assert!(matches!(result, RuleCheck::Indeterminate(_)));
    }

    #[test]
    fn test_course_prerequisite_malformed() {
        let completed = vec![course("MATH101", Some("A"))];
        let result = EligibilityCore::check_course_prerequisite("  ", &completed);
        assert!(matches!(result, RuleCheck::Indeterminate(_)));
    }

    #[test]
    fn test_course_prerequisite_case_insensitive() {
        let completed = vec![course("math101", Some("A"))];
        let result = EligibilityCore::check_course_prerequisite("MATH101", &completed);
        assert_eq!(result, RuleCheck::Satisfied);
    }

    // ==========================================
    // 测试 4: GPA 要求
    // ==========================================

    #[test]
    fn test_gpa_satisfied() {
        assert_eq!(EligibilityCore::check_gpa("3.0", Some(3.5)), RuleCheck::Satisfied);
        assert_eq!(EligibilityCore::check_gpa(">=3.0", Some(3.0)), RuleCheck::Satisfied);
    }

    #[test]
    fn test_gpa_violated() {
        assert!(matches!(
            EligibilityCore::check_gpa("3.0", Some(2.9)),
            RuleCheck::Violated(_)
        ));
    }

    #[test]
    fn test_gpa_missing_is_indeterminate() {
        assert!(matches!(
            EligibilityCore::check_gpa("3.0", None),
            RuleCheck::Indeterminate(_)
        ));
    }

    #[test]
    fn test_gpa_malformed_requirement() {
        assert!(matches!(
            EligibilityCore::check_gpa("three", Some(3.5)),
            RuleCheck::Indeterminate(_)
        ));
    }

    // ==========================================
    // 测试 5: 年级要求
    // ==========================================

    #[test]
    fn test_year_satisfied() {
        assert_eq!(EligibilityCore::check_year("2", Some(3)), RuleCheck::Satisfied);
        assert_eq!(EligibilityCore::check_year(">=2", Some(2)), RuleCheck::Satisfied);
    }

    #[test]
    fn test_year_violated() {
        assert!(matches!(
            EligibilityCore::check_year("3", Some(1)),
            RuleCheck::Violated(_)
        ));
    }

    // ==========================================
    // 测试 6: 专业/院系限制
    // ==========================================

    #[test]
    fn test_membership_satisfied() {
        let result = EligibilityCore::check_membership("CS, SE", Some("cs"), "专业");
        assert_eq!(result, RuleCheck::Satisfied);
    }

    #[test]
    fn test_membership_violated() {
        let result = EligibilityCore::check_membership("CS,SE", Some("EE"), "专业");
        assert!(matches!(result, RuleCheck::Violated(_)));
    }

    #[test]
    fn test_membership_missing_value() {
        let result = EligibilityCore::check_membership("CS,SE", None, "专业");
        assert!(matches!(result, RuleCheck::Indeterminate(_)));
    }

    #[test]
    fn test_membership_empty_condition() {
        let result = EligibilityCore::check_membership(" , ", Some("CS"), "专业");
        assert!(matches!(result, RuleCheck::Indeterminate(_)));
    }
}
