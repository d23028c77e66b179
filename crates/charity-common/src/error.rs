//! 错误处理模块
//!
//! 该模块提供编排系统的统一错误处理机制，覆盖准入校验、集群上下文解析、
//! 清单生成、目标集群 API 调用以及跨集群对等连接等环节，
//! 并提供错误分类函数，供事件处理器决定是否重新投递事件。

use std::io;
use thiserror::Error;

/// 编排系统统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 准入校验失败，拒绝写入
    #[error("校验失败: {0}")]
    ValidationFailed(String),

    /// 找不到逻辑集群对应的上下文
    #[error("集群不存在: {0}")]
    ClusterNotFound(String),

    /// 组件未登记在所属应用的组件列表中
    #[error("组件 {component} 未注册到应用 {application}")]
    NotRegistered {
        /// 组件名称
        component: String,
        /// 应用名称
        application: String,
    },

    /// 所属应用尚不可见（创建竞争），可重试
    #[error("应用尚未就绪: {0}")]
    ApplicationNotReady(String),

    /// 清单生成失败
    #[error("清单生成失败: {0}")]
    ManifestGenerationFailed(String),

    /// 目标集群拒绝了请求
    #[error("API 错误 ({code}): {message}")]
    Api {
        /// HTTP 状态码
        code: u16,
        /// 错误信息
        message: String,
    },

    /// 无法连接目标集群
    #[error("集群连接错误: {0}")]
    Connection(String),

    /// 对等连接或命名空间卸载失败
    #[error("对等连接错误: {0}")]
    Peering(String),

    /// 组件迁移尚未支持
    #[error("组件迁移尚未支持: {0}")]
    MigrationUnsupported(String),

    /// 外部命令执行失败
    #[error("外部命令失败: {0}")]
    Command(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化/反序列化错误
    #[error("序列化/反序列化错误: {0}")]
    Serialization(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 统一结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 构造 API 错误
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            code,
            message: message.into(),
        }
    }

    /// 是否为资源不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { code: 404, .. })
    }

    /// 是否为资源冲突（已存在或 resourceVersion 过期）
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Api { code: 409, .. })
    }

    /// 是否值得重新投递事件
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { code, .. } => *code == 409 || *code == 429 || *code >= 500,
            Error::Connection(_) | Error::ApplicationNotReady(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::api(404, "missing").is_not_found());
        assert!(Error::api(409, "exists").is_conflict());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(Error::ApplicationNotReady("shop".into()).is_retryable());
        assert!(!Error::api(403, "forbidden").is_retryable());
        assert!(!Error::ClusterNotFound("c9".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotRegistered {
            component: "web".into(),
            application: "shop".into(),
        };
        assert_eq!(err.to_string(), "组件 web 未注册到应用 shop");
        assert_eq!(Error::api(409, "conflict").to_string(), "API 错误 (409): conflict");
    }
}
