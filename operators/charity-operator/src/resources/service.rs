//! Service 协调器
//!
//! 只有存在 `isPeered` 端口时才需要 Service。端口列表变空时，
//! 调用方应改为调用 [`ServiceReconciler::remove`]。

use charity_common::{ExposePort, Result};
use charity_controller::{ClusterApi, ClusterContext};
use k8s_openapi::api::core::v1::Service;
use kube::api::ApiResource;
use std::sync::Arc;
use tracing::info;

use super::templates::{ManifestRenderer, PortsParams};
use super::{create_or_replace, remove_object};

/// Service 协调器
pub struct ServiceReconciler {
    api: Arc<dyn ClusterApi>,
    renderer: Arc<dyn ManifestRenderer>,
    resource: ApiResource,
}

impl ServiceReconciler {
    /// 创建新的 Service 协调器
    pub fn new(api: Arc<dyn ClusterApi>, renderer: Arc<dyn ManifestRenderer>) -> Self {
        Self {
            api,
            renderer,
            resource: ApiResource::erase::<Service>(&()),
        }
    }

    /// 按已过滤的对等端口应用 Service
    pub async fn apply(
        &self,
        namespace: &str,
        name: &str,
        peered: &[ExposePort],
        ctx: &ClusterContext,
        update: bool,
    ) -> Result<()> {
        let object = self.renderer.service(&PortsParams {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ports: peered.to_vec(),
        })?;
        create_or_replace(self.api.as_ref(), ctx, &self.resource, Some(namespace), &object, update).await?;
        info!(component = %name, namespace = %namespace, ports = peered.len(), "Service 已应用");
        Ok(())
    }

    /// 删除 Service
    pub async fn remove(&self, namespace: &str, name: &str, ctx: &ClusterContext) -> Result<()> {
        remove_object(self.api.as_ref(), ctx, &self.resource, Some(namespace), name).await
    }
}
