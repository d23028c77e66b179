//! 内存集群 API
//!
//! 按逻辑集群分别保存对象，模拟 API 服务器的 resourceVersion 递增、
//! 404/409 语义，并统计各类调用次数，供协调器与控制器测试使用。

use async_trait::async_trait;
use charity_common::{Error, Result};
use kube::api::{ApiResource, DynamicObject};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{ClusterApi, ClusterContext};

/// (集群, 组, 复数名, 命名空间, 名称)
type ObjectKey = (String, String, String, Option<String>, String);

fn key(cluster: &str, resource: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        cluster.to_string(),
        resource.group.clone(),
        resource.plural.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

/// 读取之后对存储对象执行一次的修改
type AfterGet = Box<dyn FnOnce(&mut DynamicObject) + Send>;

/// 内存中的多集群对象存储
#[derive(Default)]
pub struct InMemoryClusterApi {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    version: AtomicU64,
    calls: Mutex<HashMap<(String, String), usize>>,
    unreachable: Mutex<HashSet<String>>,
    after_get: Mutex<Vec<(String, AfterGet)>>,
}

impl InMemoryClusterApi {
    /// 创建空的存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取存储中的对象
    pub fn object(
        &self,
        cluster: &str,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(cluster, resource, namespace, name))
            .cloned()
    }

    /// 某集群中某类资源的对象名列表
    pub fn names(&self, cluster: &str, resource: &ApiResource) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, g, p, _, _)| c == cluster && *g == resource.group && *p == resource.plural)
            .map(|(_, _, _, _, name)| name.clone())
            .collect()
    }

    /// 某动词作用于某类资源的调用次数，动词为 get/list/create/replace/delete/patch_status
    pub fn calls(&self, verb: &str, kind: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(verb.to_string(), kind.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// 写操作（create/replace/delete）总次数
    pub fn writes(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|((verb, _), _)| matches!(verb.as_str(), "create" | "replace" | "delete"))
            .map(|(_, count)| count)
            .sum()
    }

    /// 清零调用计数
    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// 让某个集群的所有调用返回连接错误
    pub fn set_unreachable(&self, cluster: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(cluster.to_string());
        } else {
            set.remove(cluster);
        }
    }

    /// 下一次读取某类资源后，按 `mutate` 修改存储中的对象并递增其
    /// resourceVersion；本次读取仍返回修改前的版本，模拟并发写入
    pub fn on_next_get(&self, kind: &str, mutate: impl FnOnce(&mut DynamicObject) + Send + 'static) {
        self.after_get
            .lock()
            .unwrap()
            .push((kind.to_string(), Box::new(mutate)));
    }

    fn take_after_get(&self, kind: &str) -> Option<AfterGet> {
        let mut hooks = self.after_get.lock().unwrap();
        let index = hooks.iter().position(|(k, _)| k == kind)?;
        Some(hooks.remove(index).1)
    }

    fn record(&self, ctx: &ClusterContext, verb: &str, resource: &ApiResource) -> Result<()> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((verb.to_string(), resource.kind.clone()))
            .or_insert(0) += 1;

        if self.unreachable.lock().unwrap().contains(&ctx.cluster) {
            return Err(Error::Connection(format!("集群 {} 不可达", ctx.cluster)));
        }
        Ok(())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

fn name_of(object: &DynamicObject) -> Result<String> {
    object
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::api(422, "metadata.name 不能为空"))
}

#[async_trait]
impl ClusterApi for InMemoryClusterApi {
    async fn get(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.record(ctx, "get", resource)?;
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(&key(&ctx.cluster, resource, namespace, name)) else {
            return Ok(None);
        };

        let found = stored.clone();
        if let Some(mutate) = self.take_after_get(&resource.kind) {
            mutate(stored);
            stored.metadata.resource_version = Some(self.next_version());
        }
        Ok(Some(found))
    }

    async fn list(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        self.record(ctx, "list", resource)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((c, g, p, ns, _), _)| {
                *c == ctx.cluster
                    && *g == resource.group
                    && *p == resource.plural
                    && namespace.map_or(true, |wanted| ns.as_deref() == Some(wanted))
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.record(ctx, "create", resource)?;
        let name = name_of(object)?;
        let key = key(&ctx.cluster, resource, namespace, &name);

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::api(409, format!("{} \"{}\" already exists", resource.plural, name)));
        }

        let mut stored = object.clone();
        stored.metadata.namespace = namespace.map(str::to_string);
        stored.metadata.resource_version = Some(self.next_version());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.record(ctx, "replace", resource)?;
        let name = name_of(object)?;
        let key = key(&ctx.cluster, resource, namespace, &name);

        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::api(404, format!("{} \"{}\" not found", resource.plural, name)))?;

        if let Some(version) = &object.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(version) {
                return Err(Error::api(
                    409,
                    format!("{} \"{}\": the object has been modified", resource.plural, name),
                ));
            }
        }

        let mut stored = object.clone();
        stored.metadata.namespace = namespace.map(str::to_string);
        stored.metadata.resource_version = Some(self.next_version());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        self.record(ctx, "delete", resource)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .remove(&key(&ctx.cluster, resource, namespace, name))
            .is_some())
    }

    async fn delete_at_version(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        resource_version: &str,
    ) -> Result<bool> {
        self.record(ctx, "delete", resource)?;
        let key = key(&ctx.cluster, resource, namespace, name);
        let mut objects = self.objects.lock().unwrap();

        let Some(current) = objects.get(&key) else {
            return Ok(false);
        };
        if current.metadata.resource_version.as_deref() != Some(resource_version) {
            return Err(Error::api(
                409,
                format!("{} \"{}\": precondition failed on resourceVersion", resource.plural, name),
            ));
        }
        objects.remove(&key);
        Ok(true)
    }

    async fn patch_status(
        &self,
        ctx: &ClusterContext,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()> {
        self.record(ctx, "patch_status", resource)?;
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&key(&ctx.cluster, resource, namespace, name))
            .ok_or_else(|| Error::api(404, format!("{} \"{}\" not found", resource.plural, name)))?;

        if object.data.is_null() {
            object.data = serde_json::Value::Object(Default::default());
        }
        let current = object
            .data
            .as_object_mut()
            .ok_or_else(|| Error::Serialization("对象数据不是 JSON 对象".to_string()))?;
        let entry = current
            .entry("status")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        match (entry.as_object_mut(), status.as_object()) {
            (Some(existing), Some(patch)) => {
                for (k, v) in patch {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => *entry = status.clone(),
        }
        Ok(())
    }
}
