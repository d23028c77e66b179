//! 子资源协调模块
//!
//! 每个协调器只操作一个已解析的集群上下文，提供幂等的创建/替换与删除：
//! - 创建遇到 409（已存在）时改为替换
//! - 替换总是先读取现存对象，并把 resourceVersion（Service 还包括
//!   已分配的 clusterIP）带到新对象上，409 冲突时重新读取再试
//! - 删除不存在的对象视为成功

pub mod deployment;
pub mod ingress;
pub mod namespace;
pub mod service;
pub mod service_monitor;
pub mod templates;

pub use deployment::DeploymentReconciler;
pub use ingress::{IngressAggregator, IngressHost, IngressReconciler};
pub use namespace::NamespaceReconciler;
pub use service::ServiceReconciler;
pub use service_monitor::ServiceMonitorReconciler;
pub use templates::{DefaultManifestRenderer, ManifestRenderer};

use charity_common::{Error, Result};
use charity_controller::utils::{retry_on_conflict, DEFAULT_CONFLICT_RETRIES};
use charity_controller::{ClusterApi, ClusterContext};
use kube::api::{ApiResource, DynamicObject};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

/// 把类型化对象转换为动态对象
pub fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// 把动态对象解析为类型化对象
pub fn from_dynamic<K: DeserializeOwned>(object: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn name_of(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::ManifestGenerationFailed(format!("{} 清单缺少名称", object_kind(object))))
}

fn object_kind(object: &DynamicObject) -> &str {
    object
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or("对象")
}

/// 把现存对象中由服务器维护的字段带到期望对象上
fn carry_forward(live: &DynamicObject, desired: &mut DynamicObject) {
    desired.metadata.resource_version = live.metadata.resource_version.clone();

    if object_kind(desired) != "Service" {
        return;
    }
    for field in ["clusterIP", "clusterIPs"] {
        let live_value = live.data.get("spec").and_then(|spec| spec.get(field)).cloned();
        if let (Some(value), Some(spec)) = (
            live_value,
            desired.data.get_mut("spec").and_then(|spec| spec.as_object_mut()),
        ) {
            spec.entry(field).or_insert(value);
        }
    }
}

/// 创建或替换对象
///
/// `update` 为假时先尝试创建，已存在则转为替换；为真时直接读取并替换，
/// 对象不存在则创建。
pub async fn create_or_replace(
    api: &dyn ClusterApi,
    ctx: &ClusterContext,
    resource: &ApiResource,
    namespace: Option<&str>,
    desired: &DynamicObject,
    update: bool,
) -> Result<DynamicObject> {
    let name = name_of(desired)?;

    if !update {
        match api.create(ctx, resource, namespace, desired).await {
            Err(e) if e.is_conflict() => {
                debug!(cluster = %ctx.cluster, kind = %resource.kind, name = %name, "对象已存在，改为替换");
            }
            other => return other,
        }
    }

    retry_on_conflict(DEFAULT_CONFLICT_RETRIES, || async move {
        match api.get(ctx, resource, namespace, name).await? {
            Some(live) => {
                let mut object = desired.clone();
                carry_forward(&live, &mut object);
                api.replace(ctx, resource, namespace, &object).await
            }
            None => api.create(ctx, resource, namespace, desired).await,
        }
    })
    .await
}

/// 删除对象，不存在时视为成功
pub async fn remove_object(
    api: &dyn ClusterApi,
    ctx: &ClusterContext,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
) -> Result<()> {
    if api.delete(ctx, resource, namespace, name).await? {
        info!(cluster = %ctx.cluster, kind = %resource.kind, name = %name, "已删除对象");
    } else {
        debug!(cluster = %ctx.cluster, kind = %resource.kind, name = %name, "对象不存在，跳过删除");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use charity_controller::InMemoryClusterApi;
    use k8s_openapi::api::core::v1::Service;
    use serde_json::json;

    fn service(name: &str, spec: serde_json::Value) -> DynamicObject {
        let resource = ApiResource::erase::<Service>(&());
        DynamicObject::new(name, &resource).data(json!({ "spec": spec }))
    }

    #[tokio::test]
    async fn test_create_falls_back_to_replace() {
        let api = InMemoryClusterApi::new();
        let ctx = ClusterContext::new("c1", "ctx-1");
        let resource = ApiResource::erase::<Service>(&());

        let first = service("web", json!({"ports": [{"port": 80}]}));
        create_or_replace(&api, &ctx, &resource, Some("shop"), &first, false)
            .await
            .unwrap();

        let second = service("web", json!({"ports": [{"port": 8080}]}));
        create_or_replace(&api, &ctx, &resource, Some("shop"), &second, false)
            .await
            .unwrap();

        let live = api.object("c1", &resource, Some("shop"), "web").unwrap();
        assert_eq!(live.data["spec"]["ports"][0]["port"], 8080);
        assert_eq!(api.calls("replace", "Service"), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_cluster_ip() {
        let api = InMemoryClusterApi::new();
        let ctx = ClusterContext::new("c1", "ctx-1");
        let resource = ApiResource::erase::<Service>(&());

        let allocated = service("web", json!({"clusterIP": "10.0.0.12", "ports": [{"port": 80}]}));
        api.create(&ctx, &resource, Some("shop"), &allocated).await.unwrap();

        let desired = service("web", json!({"ports": [{"port": 80}]}));
        create_or_replace(&api, &ctx, &resource, Some("shop"), &desired, true)
            .await
            .unwrap();

        let live = api.object("c1", &resource, Some("shop"), "web").unwrap();
        assert_eq!(live.data["spec"]["clusterIP"], "10.0.0.12");
    }

    #[tokio::test]
    async fn test_update_creates_missing_object() {
        let api = InMemoryClusterApi::new();
        let ctx = ClusterContext::new("c1", "ctx-1");
        let resource = ApiResource::erase::<Service>(&());

        create_or_replace(&api, &ctx, &resource, Some("shop"), &service("web", json!({})), true)
            .await
            .unwrap();
        assert!(api.object("c1", &resource, Some("shop"), "web").is_some());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let api = InMemoryClusterApi::new();
        let ctx = ClusterContext::new("c1", "ctx-1");
        let resource = ApiResource::erase::<Service>(&());
        remove_object(&api, &ctx, &resource, Some("shop"), "web")
            .await
            .unwrap();
    }
}
