//! 统一错误类型定义.
//!
//! 所有 avsync crate 共用的错误类型. 错误分类 (致命 / 可重试 / 流结束)
//! 由 [`SyncError::is_retryable`] 和 [`SyncError::is_terminal`] 判定.

use thiserror::Error;

use crate::media_type::MediaType;

/// avsync 统一错误类型
#[derive(Debug, Error)]
pub enum SyncError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 编解码器错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 容器格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 解码器需要更多输入, 或需先取出已解码帧
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 暂时不可用, 原地重试
    #[error("资源暂时不可用, 请重试")]
    Again,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 未找到指定类型的流
    #[error("未找到{0}流")]
    StreamNotFound(MediaType),

    /// 重采样错误
    #[error("重采样错误: {0}")]
    Resample(String),

    /// 输出设备错误
    #[error("输出设备错误: {0}")]
    Device(String),

    /// 会话已中止
    #[error("会话已中止")]
    Aborted,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl SyncError {
    /// 是否为可原地重试的暂时性错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Again)
    }

    /// 是否为正常结束 (流末尾), 不属于错误
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

/// avsync 统一 Result 类型
pub type SyncResult<T> = Result<T, SyncError>;
