//! ServiceMonitor 协调器
//!
//! 仅在存在 `isExposingMetrics` 端口时需要。更新路径先读取现存对象的
//! resourceVersion 再替换，冲突时重新读取。

use charity_common::{ExposePort, Result};
use charity_controller::{ClusterApi, ClusterContext};
use kube::api::ApiResource;
use std::sync::Arc;
use tracing::info;

use super::templates::{service_monitor_resource, ManifestRenderer, PortsParams};
use super::{create_or_replace, remove_object};

/// ServiceMonitor 协调器
pub struct ServiceMonitorReconciler {
    api: Arc<dyn ClusterApi>,
    renderer: Arc<dyn ManifestRenderer>,
    resource: ApiResource,
}

impl ServiceMonitorReconciler {
    /// 创建新的 ServiceMonitor 协调器
    pub fn new(api: Arc<dyn ClusterApi>, renderer: Arc<dyn ManifestRenderer>) -> Self {
        Self {
            api,
            renderer,
            resource: service_monitor_resource(),
        }
    }

    /// 按已过滤的指标端口应用 ServiceMonitor
    pub async fn apply(
        &self,
        namespace: &str,
        name: &str,
        metrics: &[ExposePort],
        ctx: &ClusterContext,
        update: bool,
    ) -> Result<()> {
        let object = self.renderer.service_monitor(&PortsParams {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ports: metrics.to_vec(),
        })?;
        create_or_replace(self.api.as_ref(), ctx, &self.resource, Some(namespace), &object, update).await?;
        info!(component = %name, namespace = %namespace, "ServiceMonitor 已应用");
        Ok(())
    }

    /// 删除 ServiceMonitor
    pub async fn remove(&self, namespace: &str, name: &str, ctx: &ClusterContext) -> Result<()> {
        remove_object(self.api.as_ref(), ctx, &self.resource, Some(namespace), name).await
    }
}
