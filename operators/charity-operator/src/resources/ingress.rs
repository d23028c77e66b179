//! Ingress 协调与主机聚合
//!
//! 每个应用只有一个 Ingress（`{app}-ingress`），其中每条规则对应一个
//! 公开组件。主机列表从不单独保存，每次都从现存 Ingress 的规则中重建，
//! 修改后整体替换，非组件规则原样保留。读-改-写循环的替换与删除都以
//! 读取时的 resourceVersion 为前提，冲突时重新读取。

use charity_common::{Error, Result};
use charity_controller::utils::{retry_on_conflict, DEFAULT_CONFLICT_RETRIES};
use charity_controller::{ClusterApi, ClusterContext};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::templates::{ingress_name, IngressParams, ManifestRenderer};
use super::remove_object;

/// Ingress 主机条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressHost {
    /// 组件名称（也是后端 Service 名称）
    pub component: String,
    /// 后端 Service 端口
    pub port: i32,
}

impl IngressHost {
    /// 创建新的主机条目
    pub fn new(component: impl Into<String>, port: i32) -> Self {
        Self {
            component: component.into(),
            port,
        }
    }
}

/// 从 Ingress 规则中解析出的内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngressRules {
    /// 由组件登记的主机条目
    pub hosts: Vec<IngressHost>,
    /// 其他规则，改写 Ingress 时原样保留
    pub foreign: Vec<Value>,
}

impl IngressRules {
    /// 是否没有任何规则
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.foreign.is_empty()
    }
}

fn managed_host(rule: &Value, application: &str) -> Option<IngressHost> {
    let service = rule.pointer("/http/paths/0/backend/service")?;
    let name = service.get("name")?.as_str()?;
    let port = i32::try_from(service.pointer("/port/number")?.as_i64()?).ok()?;
    let host = rule.get("host")?.as_str()?;
    host.starts_with(&format!("{}.{}.", name, application))
        .then(|| IngressHost::new(name, port))
}

/// 解析应用 Ingress 的规则
///
/// 主机名为 `{组件}.{应用}.*` 且第一个路径指向同名 Service 端口号的规则
/// 视为组件主机条目，其余规则归入 `foreign`。
pub fn parse_ingress_rules(object: &DynamicObject, application: &str) -> IngressRules {
    let mut rules = IngressRules::default();
    let Some(items) = object.data.pointer("/spec/rules").and_then(|r| r.as_array()) else {
        return rules;
    };

    for rule in items {
        match managed_host(rule, application) {
            Some(host) => rules.hosts.push(host),
            None => rules.foreign.push(rule.clone()),
        }
    }
    rules
}

fn set_rules(object: &mut DynamicObject, rules: Vec<Value>) -> Result<()> {
    let spec = object
        .data
        .get_mut("spec")
        .and_then(|spec| spec.as_object_mut())
        .ok_or_else(|| Error::ManifestGenerationFailed("Ingress 缺少 spec".to_string()))?;
    spec.insert("rules".to_string(), Value::Array(rules));
    Ok(())
}

fn vanished(application: &str, e: Error) -> Error {
    if e.is_not_found() {
        warn!(application = %application, "Ingress 在替换前被删除");
        Error::api(409, "Ingress 在替换前被删除")
    } else {
        e
    }
}

/// Ingress 协调器
pub struct IngressReconciler {
    api: Arc<dyn ClusterApi>,
    renderer: Arc<dyn ManifestRenderer>,
    resource: ApiResource,
    domain: String,
    class: Option<String>,
}

impl IngressReconciler {
    /// 创建新的 Ingress 协调器
    pub fn new(
        api: Arc<dyn ClusterApi>,
        renderer: Arc<dyn ManifestRenderer>,
        domain: impl Into<String>,
        class: Option<String>,
    ) -> Self {
        Self {
            api,
            renderer,
            resource: ApiResource::erase::<Ingress>(&()),
            domain: domain.into(),
            class,
        }
    }

    fn render(&self, application: &str, hosts: Vec<IngressHost>) -> Result<DynamicObject> {
        self.renderer.ingress(&IngressParams {
            application: application.to_string(),
            hosts,
            domain: self.domain.clone(),
            class: self.class.clone(),
        })
    }

    /// 按主机列表写入应用的 Ingress，`foreign` 规则追加在组件规则之后
    ///
    /// `live` 为空时创建，已存在则返回 409；否则携带 `live` 的
    /// resourceVersion 替换，期间被修改或删除同样返回 409。
    pub async fn apply(
        &self,
        application: &str,
        hosts: Vec<IngressHost>,
        foreign: Vec<Value>,
        ctx: &ClusterContext,
        live: Option<&DynamicObject>,
    ) -> Result<()> {
        let mut object = self.render(application, hosts)?;
        if !foreign.is_empty() {
            let mut rules = object
                .data
                .pointer("/spec/rules")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            rules.extend(foreign);
            set_rules(&mut object, rules)?;
        }

        let Some(live) = live else {
            self.api
                .create(ctx, &self.resource, Some(application), &object)
                .await?;
            info!(application = %application, cluster = %ctx.cluster, "已创建 Ingress");
            return Ok(());
        };

        object.metadata.resource_version = live.metadata.resource_version.clone();
        self.api
            .replace(ctx, &self.resource, Some(application), &object)
            .await
            .map_err(|e| vanished(application, e))?;
        info!(application = %application, cluster = %ctx.cluster, "Ingress 主机列表已更新");
        Ok(())
    }

    /// 只保留 `foreign` 规则，其余内容沿用 `live`
    pub async fn retain_foreign(
        &self,
        application: &str,
        foreign: Vec<Value>,
        ctx: &ClusterContext,
        live: &DynamicObject,
    ) -> Result<()> {
        let mut object = live.clone();
        set_rules(&mut object, foreign)?;
        self.api
            .replace(ctx, &self.resource, Some(application), &object)
            .await
            .map_err(|e| vanished(application, e))?;
        info!(application = %application, cluster = %ctx.cluster, "Ingress 已不含组件主机，保留其他规则");
        Ok(())
    }

    /// 在 `live` 之后未被修改的前提下删除 Ingress，否则返回 409
    pub async fn remove_unchanged(&self, application: &str, ctx: &ClusterContext, live: &DynamicObject) -> Result<()> {
        let Some(version) = live.metadata.resource_version.as_deref() else {
            return self.remove(application, ctx).await;
        };
        self.api
            .delete_at_version(ctx, &self.resource, Some(application), &ingress_name(application), version)
            .await?;
        Ok(())
    }

    /// 删除应用的 Ingress
    pub async fn remove(&self, application: &str, ctx: &ClusterContext) -> Result<()> {
        remove_object(
            self.api.as_ref(),
            ctx,
            &self.resource,
            Some(application),
            &ingress_name(application),
        )
        .await
    }

    /// 读取现存 Ingress
    pub async fn get(&self, application: &str, ctx: &ClusterContext) -> Result<Option<DynamicObject>> {
        self.api
            .get(ctx, &self.resource, Some(application), &ingress_name(application))
            .await
    }
}

/// 主机列表的修改动作
enum HostChange<'a> {
    /// 设置组件的端口，条目不存在时追加
    Set(&'a str, i32),
    Remove(&'a str),
}

impl HostChange<'_> {
    fn apply(&self, hosts: &mut Vec<IngressHost>) {
        match *self {
            HostChange::Set(component, port) => match hosts.iter_mut().find(|h| h.component == component) {
                Some(host) => host.port = port,
                None => hosts.push(IngressHost::new(component, port)),
            },
            HostChange::Remove(component) => hosts.retain(|h| h.component != component),
        }
    }
}

/// Ingress 主机聚合器
pub struct IngressAggregator {
    ingress: Arc<IngressReconciler>,
}

impl IngressAggregator {
    /// 创建新的聚合器
    pub fn new(ingress: Arc<IngressReconciler>) -> Self {
        Self { ingress }
    }

    /// 登记组件的主机条目，Ingress 不存在时创建
    pub async fn add_host(&self, application: &str, component: &str, port: i32, ctx: &ClusterContext) -> Result<()> {
        self.modify(application, ctx, HostChange::Set(component, port)).await
    }

    /// 移除组件的主机条目，列表变空时删除整个 Ingress
    pub async fn remove_host(&self, application: &str, component: &str, ctx: &ClusterContext) -> Result<()> {
        self.modify(application, ctx, HostChange::Remove(component)).await
    }

    /// 修改组件主机条目的端口，条目不存在时添加
    pub async fn update_host_port(
        &self,
        application: &str,
        component: &str,
        port: i32,
        ctx: &ClusterContext,
    ) -> Result<()> {
        self.modify(application, ctx, HostChange::Set(component, port)).await
    }

    /// 当前主机列表，Ingress 不存在时为空
    pub async fn hosts(&self, application: &str, ctx: &ClusterContext) -> Result<Vec<IngressHost>> {
        Ok(self
            .ingress
            .get(application, ctx)
            .await?
            .map(|object| parse_ingress_rules(&object, application).hosts)
            .unwrap_or_default())
    }

    async fn modify(&self, application: &str, ctx: &ClusterContext, change: HostChange<'_>) -> Result<()> {
        let ingress = self.ingress.as_ref();
        let change = &change;

        retry_on_conflict(DEFAULT_CONFLICT_RETRIES, || async move {
            let live = ingress.get(application, ctx).await?;

            let IngressRules { hosts: current, foreign } = live
                .as_ref()
                .map(|object| parse_ingress_rules(object, application))
                .unwrap_or_default();
            let mut hosts = current.clone();
            change.apply(&mut hosts);

            if hosts == current {
                debug!(application = %application, "Ingress 主机列表未变化");
                return Ok(());
            }

            match live.as_ref() {
                Some(live) if hosts.is_empty() && foreign.is_empty() => {
                    ingress.remove_unchanged(application, ctx, live).await?;
                    info!(application = %application, "主机列表为空，已删除 Ingress");
                    Ok(())
                }
                Some(live) if hosts.is_empty() => ingress.retain_foreign(application, foreign, ctx, live).await,
                live => ingress.apply(application, hosts, foreign, ctx, live).await,
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::templates::DefaultManifestRenderer;
    use charity_controller::InMemoryClusterApi;

    fn setup() -> (Arc<InMemoryClusterApi>, IngressAggregator, ClusterContext) {
        let api = Arc::new(InMemoryClusterApi::new());
        let reconciler = IngressReconciler::new(api.clone(), Arc::new(DefaultManifestRenderer), "local", None);
        (api, IngressAggregator::new(Arc::new(reconciler)), ClusterContext::new("c1", "ctx-1"))
    }

    #[tokio::test]
    async fn test_add_creates_ingress() {
        let (_, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        assert_eq!(
            aggregator.hosts("shop", &ctx).await.unwrap(),
            vec![IngressHost::new("web", 8080)]
        );
    }

    #[tokio::test]
    async fn test_add_second_host_keeps_first() {
        let (_, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        aggregator.add_host("shop", "api", 9000, &ctx).await.unwrap();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        assert_eq!(
            aggregator.hosts("shop", &ctx).await.unwrap(),
            vec![IngressHost::new("web", 8080), IngressHost::new("api", 9000)]
        );
    }

    #[tokio::test]
    async fn test_remove_last_host_deletes_ingress() {
        let (api, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        aggregator.remove_host("shop", "web", &ctx).await.unwrap();

        let resource = ApiResource::erase::<Ingress>(&());
        assert!(api.object("c1", &resource, Some("shop"), "shop-ingress").is_none());
        assert!(aggregator.hosts("shop", &ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_host_without_ingress_is_noop() {
        let (api, aggregator, ctx) = setup();
        aggregator.remove_host("shop", "web", &ctx).await.unwrap();
        assert_eq!(api.writes(), 0);
    }

    #[tokio::test]
    async fn test_update_port() {
        let (_, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        aggregator.update_host_port("shop", "web", 9090, &ctx).await.unwrap();
        aggregator.update_host_port("shop", "api", 7000, &ctx).await.unwrap();
        assert_eq!(
            aggregator.hosts("shop", &ctx).await.unwrap(),
            vec![IngressHost::new("web", 9090), IngressHost::new("api", 7000)]
        );
    }

    #[tokio::test]
    async fn test_unchanged_list_skips_replace() {
        let (api, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        api.reset_calls();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();
        assert_eq!(api.writes(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_add_survives_last_remove() {
        let (api, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();

        api.on_next_get("Ingress", |object| {
            let api_rule = serde_json::json!({
                "host": "api.shop.local",
                "http": {"paths": [{"path": "/", "pathType": "Prefix",
                    "backend": {"service": {"name": "api", "port": {"number": 9000}}}}]}
            });
            if let Some(rules) = object.data.pointer_mut("/spec/rules").and_then(|r| r.as_array_mut()) {
                rules.push(api_rule);
            }
        });
        aggregator.remove_host("shop", "web", &ctx).await.unwrap();

        assert_eq!(
            aggregator.hosts("shop", &ctx).await.unwrap(),
            vec![IngressHost::new("api", 9000)]
        );
        assert_eq!(api.calls("delete", "Ingress"), 1);
        assert_eq!(api.calls("replace", "Ingress"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_change_retries_replace() {
        let (api, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();

        api.on_next_get("Ingress", |object| {
            object.metadata.annotations = Some([("touched".to_string(), "yes".to_string())].into());
        });
        aggregator.add_host("shop", "api", 9000, &ctx).await.unwrap();

        assert_eq!(api.calls("replace", "Ingress"), 2);
        assert_eq!(
            aggregator.hosts("shop", &ctx).await.unwrap(),
            vec![IngressHost::new("web", 8080), IngressHost::new("api", 9000)]
        );
    }

    #[tokio::test]
    async fn test_foreign_rules_are_preserved() {
        let (api, aggregator, ctx) = setup();
        aggregator.add_host("shop", "web", 8080, &ctx).await.unwrap();

        let resource = ApiResource::erase::<Ingress>(&());
        let mut live = api.object("c1", &resource, Some("shop"), "shop-ingress").unwrap();
        let docs = serde_json::json!({
            "host": "docs.example.org",
            "http": {"paths": [{"path": "/", "pathType": "Prefix",
                "backend": {"resource": {"apiGroup": "k8s.example.org", "kind": "StorageBucket", "name": "docs"}}}]}
        });
        if let Some(rules) = live.data.pointer_mut("/spec/rules").and_then(|r| r.as_array_mut()) {
            rules.push(docs.clone());
        }
        api.replace(&ctx, &resource, Some("shop"), &live).await.unwrap();

        aggregator.add_host("shop", "api", 9000, &ctx).await.unwrap();
        aggregator.remove_host("shop", "web", &ctx).await.unwrap();
        aggregator.remove_host("shop", "api", &ctx).await.unwrap();

        let object = api.object("c1", &resource, Some("shop"), "shop-ingress").unwrap();
        let rules = parse_ingress_rules(&object, "shop");
        assert!(rules.hosts.is_empty());
        assert_eq!(rules.foreign, vec![docs]);
    }

    #[test]
    fn test_parse_separates_foreign_rules() {
        let resource = ApiResource::erase::<Ingress>(&());
        let object = DynamicObject::new("shop-ingress", &resource).data(serde_json::json!({
            "spec": {
                "rules": [
                    {"host": "web.shop.local", "http": {"paths": [{"backend": {"service": {"name": "web", "port": {"number": 8080}}}}]}},
                    {"host": "broken.shop.local"},
                    {"host": "metrics.example.org", "http": {"paths": [{"backend": {"service": {"name": "grafana", "port": {"number": 3000}}}}]}},
                    {"host": "big.shop.local", "http": {"paths": [{"backend": {"service": {"name": "big", "port": {"number": 4294967296u64}}}}]}}
                ]
            }
        }));

        let rules = parse_ingress_rules(&object, "shop");
        assert_eq!(rules.hosts, vec![IngressHost::new("web", 8080)]);
        assert_eq!(rules.foreign.len(), 3);
        assert!(!rules.is_empty());
    }
}
