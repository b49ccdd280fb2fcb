//! 履约服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化。
//! 数据库侧统一存 lowercase / snake_case 字符串，与迁移脚本的 CHECK 约束对应。

use serde::{Deserialize, Serialize};

/// 库存单元状态
///
/// 状态只能单向推进：available → claimed → delivered。
/// failed 仅由管理端回滚操作进入；claimed → available 仅由管理端 release 进入。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum UnitStatus {
    /// 可领取 - 在池中等待分配
    #[default]
    Available,
    /// 已领取 - 已绑定到某次分配，码不再可被他人领取
    Claimed,
    /// 已送达 - 投递渠道确认发送成功
    Delivered,
    /// 已作废 - 管理端标记不可用
    Failed,
}

impl UnitStatus {
    /// 判断是否允许从当前状态推进到目标状态
    ///
    /// 投递失败不改变单元状态（保持 claimed，可人工恢复），
    /// 所以 claimed → failed 也只发生在管理端回滚。
    pub fn can_transition_to(&self, target: UnitStatus) -> bool {
        matches!(
            (self, target),
            (Self::Available, Self::Claimed)
                | (Self::Claimed, Self::Delivered)
                | (Self::Available, Self::Failed)
                | (Self::Claimed, Self::Failed)
        )
    }
}

/// 分配来源
///
/// 区分本地库存领取与外部供应商实时发卡
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum AssignmentSource {
    /// 本地库存
    #[default]
    Inventory,
    /// 外部供应商实时发卡
    ExternalApi,
}

/// 外部采购状态
///
/// pending 行先于供应商调用落库，崩溃后可对账
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PurchaseStatus {
    /// 待处理 - 已记录意图，供应商调用尚未返回
    #[default]
    Pending,
    /// 已完成 - 供应商成功发卡
    Completed,
    /// 已失败 - 供应商拒绝或重试耗尽
    Failed,
}

/// 投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// 短信
    Sms,
    /// 邮件
    Email,
}

impl DeliveryMethod {
    /// 渠道标识（用于日志和指标标签）
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

/// 投递状态
///
/// deliveries 表同时充当持久化投递队列，pending/failed（未超限）行会被 Worker 轮询
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// 待发送 - 已入队，等待 Worker 处理
    #[default]
    Pending,
    /// 已发送 - 渠道已接收，拿到了 message id
    Sent,
    /// 已送达 - 渠道回执确认（由带外回调更新，本服务不产生）
    Delivered,
    /// 已失败 - 渠道拒绝或发送异常
    Failed,
}

/// 条件完成状态机
///
/// 按 (call_session_id, condition_number) 持久化。
/// delivered 与 delivery_failed 都视为条件已完成——领取才是正确性边界，
/// 投递失败不回退领取。completed 专用于无奖励条件的短路路径。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CompletionState {
    /// 未开始
    #[default]
    NotStarted,
    /// 领取中 - 已进入领取流程
    Claiming,
    /// 已领取 - 分配已落库
    Claimed,
    /// 投递中 - 投递任务已入队
    Delivering,
    /// 已送达 - 投递成功
    Delivered,
    /// 投递失败 - 重试耗尽或无可用联系方式，领取仍然有效
    DeliveryFailed,
    /// 已完成 - 无奖励条件的终态
    Completed,
}

impl CompletionState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::DeliveryFailed | Self::Completed
        )
    }

    /// 状态机只允许单向推进，重复请求不会把状态拉回去
    pub fn can_advance_to(&self, target: CompletionState) -> bool {
        use CompletionState::*;
        match (self, target) {
            // 同状态重入视为允许（幂等重试）
            (a, b) if *a == b => true,
            (NotStarted, Claiming) | (NotStarted, Completed) => true,
            (Claiming, Claimed) => true,
            (Claimed, Delivering) | (Claimed, DeliveryFailed) => true,
            (Delivering, Delivered) | (Delivering, DeliveryFailed) => true,
            _ => false,
        }
    }
}
