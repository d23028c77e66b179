//! 组件模型
//!
//! 组件是应用中的一个可部署单元。每个暴露端口上的三个开关决定了
//! 目标集群中需要维护哪些子资源：
//! - `is_peered`：为组件创建 Service，使端口在对等集群间可达
//! - `is_exposing_metrics`：为组件创建 ServiceMonitor
//! - `is_public`：在应用的 Ingress 中登记一个主机条目

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 端口暴露声明
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposePort {
    /// 容器端口
    pub container_port: i32,
    /// 集群内服务端口
    pub cluster_port: i32,
    /// 是否通过 Ingress 公开
    #[serde(default)]
    pub is_public: bool,
    /// 是否创建 Service
    #[serde(default)]
    pub is_peered: bool,
    /// 是否暴露监控指标
    #[serde(default)]
    pub is_exposing_metrics: bool,
}

impl ExposePort {
    /// 创建一个仅声明端口、不开启任何能力的暴露条目
    pub fn new(container_port: i32, cluster_port: i32) -> Self {
        Self {
            container_port,
            cluster_port,
            is_public: false,
            is_peered: false,
            is_exposing_metrics: false,
        }
    }

    /// 开启对等访问
    pub fn peered(mut self) -> Self {
        self.is_peered = true;
        self
    }

    /// 开启公开访问（同时开启对等访问）
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self.is_peered = true;
        self
    }

    /// 开启指标暴露（同时开启对等访问）
    pub fn metrics(mut self) -> Self {
        self.is_exposing_metrics = true;
        self.is_peered = true;
        self
    }
}

/// 容器环境变量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvVar {
    /// 变量名
    pub name: String,
    /// 变量值
    #[serde(default)]
    pub value: String,
}

/// 需要 Service 的端口
pub fn peered_ports(expose: &[ExposePort]) -> Vec<ExposePort> {
    expose.iter().filter(|p| p.is_peered).cloned().collect()
}

/// 需要 ServiceMonitor 的端口
pub fn metrics_ports(expose: &[ExposePort]) -> Vec<ExposePort> {
    expose.iter().filter(|p| p.is_exposing_metrics).cloned().collect()
}

/// 公开端口（至多一个，取第一个）
pub fn public_port(expose: &[ExposePort]) -> Option<&ExposePort> {
    expose.iter().find(|p| p.is_public)
}

/// 校验端口暴露声明的不变量
///
/// - 至多一个端口 `is_public = true`
/// - `is_public = true` 要求 `is_peered = true`
/// - `is_exposing_metrics = true` 要求 `is_peered = true`
pub fn validate_expose(expose: &[ExposePort]) -> Result<()> {
    let public_count = expose.iter().filter(|p| p.is_public).count();
    if public_count > 1 {
        return Err(Error::ValidationFailed(format!(
            "isPublic 只能在一个端口上为 true，当前有 {} 个",
            public_count
        )));
    }

    for port in expose {
        if port.is_public && !port.is_peered {
            return Err(Error::ValidationFailed(format!(
                "端口 {} 设置了 isPublic 但 isPeered 为 false",
                port.cluster_port
            )));
        }
        if port.is_exposing_metrics && !port.is_peered {
            return Err(Error::ValidationFailed(format!(
                "端口 {} 设置了 isExposingMetrics 但 isPeered 为 false",
                port.cluster_port
            )));
        }
    }

    Ok(())
}
