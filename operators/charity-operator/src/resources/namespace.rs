//! 命名空间协调器

use charity_common::Result;
use charity_controller::{ClusterApi, ClusterContext};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ApiResource;
use std::sync::Arc;
use tracing::{debug, info};

use super::remove_object;
use super::templates::ManifestRenderer;

/// 命名空间协调器
pub struct NamespaceReconciler {
    api: Arc<dyn ClusterApi>,
    renderer: Arc<dyn ManifestRenderer>,
    resource: ApiResource,
}

impl NamespaceReconciler {
    /// 创建新的命名空间协调器
    pub fn new(api: Arc<dyn ClusterApi>, renderer: Arc<dyn ManifestRenderer>) -> Self {
        Self {
            api,
            renderer,
            resource: ApiResource::erase::<Namespace>(&()),
        }
    }

    /// 确保命名空间存在，已存在时不做修改
    pub async fn ensure(&self, name: &str, ctx: &ClusterContext) -> Result<()> {
        let object = self.renderer.namespace(name)?;
        match self.api.create(ctx, &self.resource, None, &object).await {
            Ok(_) => {
                info!(namespace = %name, cluster = %ctx.cluster, "已创建命名空间");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                debug!(namespace = %name, cluster = %ctx.cluster, "命名空间已存在");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 删除命名空间
    pub async fn remove(&self, name: &str, ctx: &ClusterContext) -> Result<()> {
        remove_object(self.api.as_ref(), ctx, &self.resource, None, name).await
    }

    /// 命名空间是否存在
    pub async fn exists(&self, name: &str, ctx: &ClusterContext) -> Result<bool> {
        Ok(self.api.get(ctx, &self.resource, None, name).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::templates::DefaultManifestRenderer;
    use charity_controller::InMemoryClusterApi;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let api = Arc::new(InMemoryClusterApi::new());
        let reconciler = NamespaceReconciler::new(api.clone(), Arc::new(DefaultManifestRenderer));
        let ctx = ClusterContext::new("c1", "ctx-1");

        reconciler.ensure("shop", &ctx).await.unwrap();
        reconciler.ensure("shop", &ctx).await.unwrap();
        assert!(reconciler.exists("shop", &ctx).await.unwrap());

        reconciler.remove("shop", &ctx).await.unwrap();
        reconciler.remove("shop", &ctx).await.unwrap();
        assert!(!reconciler.exists("shop", &ctx).await.unwrap());
    }
}
