// ==========================================
// 选课准入系统 - 学生事实领域模型
// ==========================================
// 说明: 学生学业事实由外部事实提供方(成绩/学籍系统)注入,
//       本核心只读消费,规则引擎据此做纯函数判定
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// CompletedCourse - 已修课程
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedCourse {
    pub course_code: String,
    pub grade: Option<String>, // 字母等级, 如 "A" / "B+" / "C-"
}

// ==========================================
// StudentFacts - 学生学业事实
// ==========================================
// 缺失字段按 Option 表达,规则引擎对缺失数据降级为警告而非崩溃
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentFacts {
    pub student_id: String,
    pub institution_id: String,
    pub gpa: Option<f64>,
    pub year: Option<i32>, // 年级 (1=大一)
    pub major: Option<String>,
    pub department: Option<String>,
    pub completed_courses: Vec<CompletedCourse>,
}

impl StudentFacts {
    /// 查找某课程的已修记录
    pub fn completed_course(&self, course_code: &str) -> Option<&CompletedCourse> {
        self.completed_courses
            .iter()
            .find(|c| c.course_code.eq_ignore_ascii_case(course_code))
    }
}
