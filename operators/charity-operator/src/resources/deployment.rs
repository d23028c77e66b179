//! Deployment 协调器
//!
//! 每个组件对应一个同名 Deployment，位于应用命名空间中。
//! 每次规范更新都整体重新应用，不做“未变化”短路。

use charity_common::Result;
use charity_controller::{ClusterApi, ClusterContext};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ApiResource;
use std::sync::Arc;
use tracing::info;

use super::templates::{DeploymentParams, ManifestRenderer};
use super::{create_or_replace, remove_object};

/// Deployment 协调器
pub struct DeploymentReconciler {
    api: Arc<dyn ClusterApi>,
    renderer: Arc<dyn ManifestRenderer>,
    resource: ApiResource,
}

impl DeploymentReconciler {
    /// 创建新的 Deployment 协调器
    pub fn new(api: Arc<dyn ClusterApi>, renderer: Arc<dyn ManifestRenderer>) -> Self {
        Self {
            api,
            renderer,
            resource: ApiResource::erase::<Deployment>(&()),
        }
    }

    /// 应用 Deployment，`update` 为假时创建，为真时按名称替换
    pub async fn apply(&self, params: &DeploymentParams, ctx: &ClusterContext, update: bool) -> Result<()> {
        let object = self.renderer.deployment(params)?;
        create_or_replace(
            self.api.as_ref(),
            ctx,
            &self.resource,
            Some(params.namespace.as_str()),
            &object,
            update,
        )
        .await?;
        info!(
            component = %params.name,
            namespace = %params.namespace,
            cluster = %ctx.cluster,
            update,
            "Deployment 已应用"
        );
        Ok(())
    }

    /// 删除 Deployment
    pub async fn remove(&self, namespace: &str, name: &str, ctx: &ClusterContext) -> Result<()> {
        remove_object(self.api.as_ref(), ctx, &self.resource, Some(namespace), name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::templates::DefaultManifestRenderer;
    use charity_common::ExposePort;
    use charity_controller::InMemoryClusterApi;

    fn params(image: &str) -> DeploymentParams {
        DeploymentParams {
            name: "web".into(),
            namespace: "shop".into(),
            image: image.into(),
            env: vec![],
            expose: vec![ExposePort::new(80, 8080)],
            placement: None,
        }
    }

    #[tokio::test]
    async fn test_apply_then_update() {
        let api = Arc::new(InMemoryClusterApi::new());
        let reconciler = DeploymentReconciler::new(api.clone(), Arc::new(DefaultManifestRenderer));
        let ctx = ClusterContext::new("c1", "ctx-1");
        let resource = ApiResource::erase::<Deployment>(&());

        reconciler.apply(&params("nginx:1.25"), &ctx, false).await.unwrap();
        reconciler.apply(&params("nginx:1.26"), &ctx, true).await.unwrap();

        let live = api.object("c1", &resource, Some("shop"), "web").unwrap();
        assert_eq!(
            live.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "nginx:1.26"
        );
        assert_eq!(api.calls("create", "Deployment"), 1);
        assert_eq!(api.calls("replace", "Deployment"), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_deployment() {
        let api = Arc::new(InMemoryClusterApi::new());
        let reconciler = DeploymentReconciler::new(api, Arc::new(DefaultManifestRenderer));
        reconciler
            .remove("shop", "web", &ClusterContext::new("c1", "ctx-1"))
            .await
            .unwrap();
    }
}
