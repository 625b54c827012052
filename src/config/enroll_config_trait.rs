// ==========================================
// 选课准入系统 - 准入配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口(不包含实现)
// 红线: 不包含配置写入、不包含业务逻辑
// 说明: 所有阈值按租户(院校)维度读取, 未配置时回退全局默认
// ==========================================

use async_trait::async_trait;
use std::error::Error;

// ==========================================
// EnrollConfigReader Trait
// ==========================================
// 用途: 引擎层所需的配置读取接口
// 实现者: ConfigManager(从 config_kv 表读取)
#[async_trait]
pub trait EnrollConfigReader: Send + Sync {
    // ===== 异常选课检测阈值 =====

    /// 获取异常选课阈值(滚动窗口内去重班级数)
    ///
    /// # 默认值
    /// - 10
    async fn get_suspicious_threshold(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>>;

    /// 获取异常选课滚动窗口(小时)
    ///
    /// # 默认值
    /// - 24
    async fn get_suspicious_window_hours(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>>;

    /// 获取突发选课阈值(短窗口内选课数)
    ///
    /// # 默认值
    /// - 5
    async fn get_burst_threshold(&self, institution_id: &str) -> Result<i64, Box<dyn Error>>;

    /// 获取突发选课窗口(小时)
    ///
    /// # 默认值
    /// - 1
    async fn get_burst_window_hours(&self, institution_id: &str)
        -> Result<i64, Box<dyn Error>>;

    // ===== 候补晋升配置 =====

    /// 获取晋升保留窗口(小时)
    ///
    /// # 默认值
    /// - 24
    ///
    /// # 用途
    /// - 候补晋升后席位为候选人保留的时长,超时释放并重新晋升
    async fn get_promotion_hold_hours(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>>;

    // ===== 审批配置 =====

    /// 获取审批申请有效期(天)
    ///
    /// # 默认值
    /// - 7
    async fn get_request_expiry_days(
        &self,
        institution_id: &str,
    ) -> Result<i64, Box<dyn Error>>;
}
