// ==========================================
// 选课准入系统 - 引擎层事件发布
// ==========================================
// 职责: 定义选课通知事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，外部通知网关(邮件/短信)实现适配器
// 红线: 发布是 fire-and-forget; 发布失败不回滚业务事务
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 选课事件类型
// ==========================================

/// 选课通知事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentEventType {
    /// 审批申请已提交
    RequestSubmitted,
    /// 审批通过
    RequestApproved,
    /// 审批拒绝
    RequestDenied,
    /// 候补晋升(席位保留中)
    WaitlistPromoted,
}

impl EnrollmentEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            EnrollmentEventType::RequestSubmitted => "RequestSubmitted",
            EnrollmentEventType::RequestApproved => "RequestApproved",
            EnrollmentEventType::RequestDenied => "RequestDenied",
            EnrollmentEventType::WaitlistPromoted => "WaitlistPromoted",
        }
    }
}

/// 选课通知事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentEvent {
    pub institution_id: String,
    pub class_id: String,
    pub student_id: String,
    pub event_type: EnrollmentEventType,
    /// 附加说明(如拒绝原因、保留截止时刻)
    pub detail: Option<String>,
}

impl EnrollmentEvent {
    pub fn new(
        institution_id: impl Into<String>,
        class_id: impl Into<String>,
        student_id: impl Into<String>,
        event_type: EnrollmentEventType,
    ) -> Self {
        Self {
            institution_id: institution_id.into(),
            class_id: class_id.into(),
            student_id: student_id.into(),
            event_type,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 选课事件发布者 Trait
///
/// Engine 层定义,通知网关实现
/// 通过 trait 实现依赖倒置,核心不依赖任何投递渠道
pub trait EnrollmentEventPublisher: Send + Sync {
    /// 发布选课事件
    ///
    /// # 返回
    /// - `Ok(task_id)`: 任务 ID(如果支持)或空字符串
    /// - `Err`: 发布失败(调用方只记日志,不回滚)
    fn publish(&self, event: EnrollmentEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要通知的场景(如单元测试)
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl EnrollmentEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: EnrollmentEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - class_id={}, student_id={}, event_type={}",
            event.class_id,
            event.student_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn EnrollmentEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn EnrollmentEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn EnrollmentEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例(不发布事件)
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件(如果有发布者); 失败只记日志
    pub fn publish_quietly(&self, event: EnrollmentEvent) {
        let Some(publisher) = &self.inner else {
            tracing::debug!(
                "OptionalEventPublisher: 未配置发布者，跳过事件 - class_id={}, event_type={}",
                event.class_id,
                event.event_type.as_str()
            );
            return;
        };
        if let Err(e) = publisher.publish(event) {
            tracing::warn!("通知事件发布失败(已忽略): {}", e);
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
