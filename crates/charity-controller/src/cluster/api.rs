//! 集群 API 客户端
//!
//! 以 `DynamicObject` + `ApiResource` 的形式提供按组/版本/命名空间/复数名/名称
//! 定位的 CRUD 操作，参数化于 [`ClusterContext`]。kube 的错误在这里统一转换为
//! [`charity_common::Error`]，上层不直接匹配传输层错误。

use async_trait::async_trait;
use charity_common::{Error, Result};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, Preconditions,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::ClusterContext;

/// 目标集群 API 访问接口
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// 读取对象，不存在时返回 `None`
    async fn get(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// 列出对象，`namespace` 为 `None` 时跨所有命名空间
    async fn list(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// 创建对象，已存在时返回 409
    async fn create(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// 按名称整体替换对象，resourceVersion 过期时返回 409
    async fn replace(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// 删除对象，返回对象在删除前是否存在
    async fn delete(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool>;

    /// 仅当对象的 resourceVersion 仍为 `resource_version` 时删除，
    /// 否则返回 409；返回对象在删除前是否存在
    async fn delete_at_version(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<bool>;

    /// 合并更新对象的 status 子资源
    async fn patch_status(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()>;
}

/// 转换 kube 错误
pub fn kube_error(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => Error::api(resp.code, resp.message),
        other => Error::Connection(other.to_string()),
    }
}

fn object_name(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::Serialization("对象缺少 metadata.name".to_string()))
}

/// 基于 kube-rs 的实现，每个上下文缓存一个客户端
pub struct KubeClusterApi {
    /// 自定义 kubeconfig 路径
    kubeconfig: Option<String>,
    /// 上下文名到客户端的缓存，`None` 键对应默认配置
    clients: RwLock<HashMap<Option<String>, Client>>,
}

impl KubeClusterApi {
    /// 创建新的集群 API 客户端
    pub fn new(kubeconfig: Option<String>) -> Self {
        Self {
            kubeconfig,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// 按上下文获取客户端，首次访问时创建并缓存
    pub async fn client(&self, ctx: &ClusterContext) -> Result<Client> {
        if let Some(client) = self.clients.read().await.get(&ctx.context) {
            return Ok(client.clone());
        }

        let config = match &ctx.context {
            None => Config::infer()
                .await
                .map_err(|e| Error::Connection(format!("推断集群配置失败: {}", e)))?,
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                match &self.kubeconfig {
                    Some(path) => {
                        let kubeconfig = Kubeconfig::read_from(path)
                            .map_err(|e| Error::Config(format!("读取 kubeconfig {} 失败: {}", path, e)))?;
                        Config::from_custom_kubeconfig(kubeconfig, &options).await
                    }
                    None => Config::from_kubeconfig(&options).await,
                }
                .map_err(|e| Error::Connection(format!("加载上下文 {} 失败: {}", context, e)))?
            }
        };

        let client = Client::try_from(config).map_err(kube_error)?;
        info!("已为集群 {} 创建客户端", ctx);
        self.clients
            .write()
            .await
            .insert(ctx.context.clone(), client.clone());
        Ok(client)
    }

    async fn api(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let client = self.client(ctx).await?;
        Ok(match namespace {
            Some(ns) => Api::namespaced_with(client, ns, resource),
            None => Api::all_with(client, resource),
        })
    }

    async fn delete_with(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        params: &DeleteParams,
    ) -> Result<bool> {
        let api = self.api(ctx, resource, namespace).await?;
        match api.delete(name, params).await {
            Ok(_) => {
                debug!(cluster = %ctx.cluster, kind = %resource.kind, name = %name, "删除对象");
                Ok(true)
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(kube_error(e)),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.api(ctx, resource, namespace).await?;
        api.get_opt(name).await.map_err(kube_error)
    }

    async fn list(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(ctx, resource, namespace).await?;
        let list = api.list(&ListParams::default()).await.map_err(kube_error)?;
        Ok(list.items)
    }

    async fn create(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let api = self.api(ctx, resource, namespace).await?;
        debug!(cluster = %ctx.cluster, kind = %resource.kind, name = ?object.metadata.name, "创建对象");
        api.create(&PostParams::default(), object)
            .await
            .map_err(kube_error)
    }

    async fn replace(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object_name(object)?;
        let api = self.api(ctx, resource, namespace).await?;
        debug!(cluster = %ctx.cluster, kind = %resource.kind, name = %name, "替换对象");
        api.replace(name, &PostParams::default(), object)
            .await
            .map_err(kube_error)
    }

    async fn delete(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        self.delete_with(ctx, resource, namespace, name, &DeleteParams::default())
            .await
    }

    async fn delete_at_version(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<bool> {
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(resource_version.to_string()),
                uid: None,
            }),
            ..Default::default()
        };
        self.delete_with(ctx, resource, namespace, name, &params).await
    }

    async fn patch_status(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()> {
        let api = self.api(ctx, resource, namespace).await?;
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(kube_error)?;
        Ok(())
    }
}
