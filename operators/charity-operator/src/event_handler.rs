//! 事件处理模块
//!
//! 该模块监听管理集群中的 Application 与 Component 资源，把监听事件与
//! 本地缓存中的上一个版本比较，分类为协调事件，再按应用名串行地交给
//! 协调器处理。可重试的失败按配置的退避时间重新投递。
//!
//! 启用集群创建时还监听 CustomCluster 与 ClusterAPI Cluster，
//! 集群事件按集群名串行。

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{watcher, WatchStreamExt},
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{OperatorConfig, RetryConfig};
use crate::crd::{Application, ClusterApiCluster, Component, CustomCluster};
use crate::reconcile::{ApplicationEvent, ClusterEvent, ComponentEvent, CrEvent, Reconciler};

/// 一次对象变化：变化前与变化后的版本
pub type Change<K> = (Option<K>, Option<K>);

/// 监听缓存，保存每个对象最近一次观察到的版本
pub struct WatchCache<K> {
    objects: BTreeMap<String, K>,
}

fn cache_key<K: Resource>(object: &K) -> String {
    format!("{}/{}", object.namespace().unwrap_or_default(), object.name_any())
}

impl<K: Resource + Clone> WatchCache<K> {
    /// 创建空缓存
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }

    /// 缓存中的对象数
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 应用一个监听事件，返回对象变化列表
    ///
    /// 重新列举时与缓存比较：未见过的对象视为新建，消失的对象视为删除。
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        match event {
            watcher::Event::Applied(object) => {
                let old = self.objects.insert(cache_key(&object), object.clone());
                vec![(old, Some(object))]
            }
            watcher::Event::Deleted(object) => {
                let old = self.objects.remove(&cache_key(&object)).unwrap_or(object);
                vec![(Some(old), None)]
            }
            watcher::Event::Restarted(objects) => {
                let fresh: BTreeMap<String, K> = objects.into_iter().map(|o| (cache_key(&o), o)).collect();
                let mut previous = std::mem::replace(&mut self.objects, fresh.clone());

                let mut changes: Vec<Change<K>> = fresh
                    .into_iter()
                    .map(|(key, object)| (previous.remove(&key), Some(object)))
                    .collect();
                changes.extend(previous.into_values().map(|old| (Some(old), None)));
                changes
            }
        }
    }
}

impl<K: Resource + Clone> Default for WatchCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// 把 Application 的变化分类为协调事件
///
/// 只有组件列表变化才产生更新事件，状态变化不产生事件。
pub fn classify_application(old: Option<&Application>, new: Option<&Application>) -> Vec<CrEvent> {
    let event = match (old, new) {
        (None, Some(new)) => ApplicationEvent::Create(new.clone()),
        (Some(old), None) => ApplicationEvent::Delete(old.clone()),
        (Some(old), Some(new)) if old.spec.components != new.spec.components => ApplicationEvent::UpdateComponents {
            old: old.clone(),
            new: new.clone(),
        },
        _ => return Vec::new(),
    };
    vec![CrEvent::Application(event)]
}

/// 把 Component 的变化分类为协调事件
///
/// 一次更新可能同时产生规范更新与端口更新两个事件。
pub fn classify_component(old: Option<&Component>, new: Option<&Component>) -> Vec<CrEvent> {
    match (old, new) {
        (None, Some(new)) => vec![CrEvent::Component(ComponentEvent::Create(new.clone()))],
        (Some(old), None) => vec![CrEvent::Component(ComponentEvent::Delete(old.clone()))],
        (Some(old), Some(new)) => {
            let mut events = Vec::new();
            if old.spec.differs_outside_expose(&new.spec) {
                events.push(CrEvent::Component(ComponentEvent::UpdateSpec {
                    old: old.clone(),
                    new: new.clone(),
                }));
            }
            if old.spec.expose != new.spec.expose {
                events.push(CrEvent::Component(ComponentEvent::UpdateExpose {
                    old: old.clone(),
                    new: new.clone(),
                }));
            }
            events
        }
        (None, None) => Vec::new(),
    }
}

/// 把 CustomCluster 的变化分类为协调事件
pub fn classify_custom_cluster(old: Option<&CustomCluster>, new: Option<&CustomCluster>) -> Vec<CrEvent> {
    let event = match (old, new) {
        (None, Some(new)) => ClusterEvent::Create(new.clone()),
        (Some(old), None) => ClusterEvent::Delete(old.clone()),
        (Some(old), Some(new)) if old.spec != new.spec => ClusterEvent::Update {
            old: old.clone(),
            new: new.clone(),
        },
        _ => return Vec::new(),
    };
    vec![CrEvent::Cluster(event)]
}

/// 把 ClusterAPI Cluster 的状态变化分类为状态同步事件
///
/// 没有状态或状态未变化时不产生事件，删除也不产生事件。
pub fn classify_cluster_api(old: Option<&ClusterApiCluster>, new: Option<&ClusterApiCluster>) -> Vec<CrEvent> {
    let Some(new) = new else {
        return Vec::new();
    };
    let Some(status) = new.status.as_ref() else {
        return Vec::new();
    };
    if old.and_then(|old| old.status.as_ref()) == Some(status) {
        return Vec::new();
    }
    vec![CrEvent::Cluster(ClusterEvent::Observed {
        name: new.name_any(),
        status: status.clone(),
    })]
}

/// 事件处理函数
pub type EventFn = Arc<dyn Fn(CrEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// 按串行化键分派事件的工作者集合
///
/// 每个键（应用或集群）一个工作者任务，同一键的事件按到达顺序逐个处理，
/// 不同键之间并发。工作者在队列清空时退出并移除自身的登记，
/// 已删除的应用不会留下常驻任务。
pub struct KeyedWorkers {
    workers: Arc<std::sync::Mutex<WorkerMap>>,
    handler: EventFn,
}

type WorkerMap = HashMap<String, mpsc::UnboundedSender<CrEvent>>;

fn lock_workers(workers: &std::sync::Mutex<WorkerMap>) -> std::sync::MutexGuard<'_, WorkerMap> {
    // 持锁期间不会 panic，中毒时沿用内部数据
    workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl KeyedWorkers {
    /// 创建新的工作者集合
    pub fn new(handler: EventFn) -> Self {
        Self {
            workers: Arc::new(std::sync::Mutex::new(HashMap::new())),
            handler,
        }
    }

    /// 分派一个事件
    pub fn dispatch(&self, event: CrEvent) {
        let key = event.key();
        let mut workers = lock_workers(&self.workers);

        let event = match workers.get(&key) {
            Some(worker) => match worker.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel::<CrEvent>();
        debug!(key = %key, "启动事件工作者");
        // 接收端刚刚创建，发送不会失败
        let _ = tx.send(event);
        workers.insert(key.clone(), tx);
        tokio::spawn(run_worker(key, rx, self.workers.clone(), self.handler.clone()));
    }

    /// 工作者数量
    pub fn len(&self) -> usize {
        lock_workers(&self.workers).len()
    }

    /// 是否没有工作者
    pub fn is_empty(&self) -> bool {
        lock_workers(&self.workers).is_empty()
    }
}

/// 逐个处理队列中的事件，队列为空时在锁内注销并退出
async fn run_worker(
    key: String,
    mut rx: mpsc::UnboundedReceiver<CrEvent>,
    workers: Arc<std::sync::Mutex<WorkerMap>>,
    handler: EventFn,
) {
    loop {
        let event = match rx.try_recv() {
            Ok(event) => event,
            Err(_) => {
                let mut workers = lock_workers(&workers);
                // 分派方在同一把锁内发送，这里再次确认队列为空
                match rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => {
                        workers.remove(&key);
                        debug!(key = %key, "事件工作者已退出");
                        return;
                    }
                }
            }
        };
        handler(event).await;
    }
}

/// 处理一个事件，可重试的失败按退避时间重新投递
pub async fn process_with_retry(reconciler: &Reconciler, retry: &RetryConfig, event: CrEvent) {
    let mut attempt = 1;
    loop {
        match reconciler.handle(&event).await {
            Ok(()) => return,
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                warn!(
                    attempt,
                    max_attempts = retry.max_attempts,
                    "{} 将在 {} 秒后重试: {}",
                    event.describe(),
                    retry.backoff_seconds,
                    e
                );
                tokio::time::sleep(retry.backoff()).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} 不再重试: {}", event.describe(), e);
                return;
            }
        }
    }
}

/// 事件处理器结构体
pub struct EventHandler {
    /// 管理集群客户端
    client: Client,
    /// Operator 配置
    config: Arc<OperatorConfig>,
    /// 协调器
    reconciler: Arc<Reconciler>,
    /// 事件通道发送端
    event_tx: mpsc::Sender<CrEvent>,
    /// 事件通道接收端，启动处理循环时取走
    event_rx: Mutex<Option<mpsc::Receiver<CrEvent>>>,
    /// 是否正在运行
    running: Arc<RwLock<bool>>,
    /// 后台任务
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventHandler {
    /// 创建新的事件处理器
    pub fn new(client: Client, config: Arc<OperatorConfig>, reconciler: Arc<Reconciler>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(100);

        Self {
            client,
            config,
            reconciler,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            running: Arc::new(RwLock::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 启动事件处理器
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        self.start_event_processor().await?;

        let applications: Api<Application> =
            Api::namespaced(self.client.clone(), &self.config.management_namespace);
        self.start_watcher("Application", applications, classify_application)
            .await;

        let components: Api<Component> = Api::all(self.client.clone());
        self.start_watcher("Component", components, classify_component)
            .await;

        if self.config.provisioning.enabled {
            let clusters: Api<CustomCluster> =
                Api::namespaced(self.client.clone(), &self.config.management_namespace);
            self.start_watcher("CustomCluster", clusters, classify_custom_cluster)
                .await;

            let provisioned: Api<ClusterApiCluster> = Api::all(self.client.clone());
            self.start_watcher("ClusterAPI Cluster", provisioned, classify_cluster_api)
                .await;
        }

        info!(namespace = %self.config.management_namespace, "事件处理器已启动");
        Ok(())
    }

    /// 停止事件处理器
    pub async fn stop(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        info!("事件处理器已停止");
        Ok(())
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn start_watcher<K>(&self, kind: &'static str, api: Api<K>, classify: fn(Option<&K>, Option<&K>) -> Vec<CrEvent>)
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        let task = tokio::spawn(async move {
            info!("启动 {} 监听器", kind);
            let mut cache = WatchCache::<K>::new();
            let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();

            while let Some(item) = stream.next().await {
                if !*running.read().await {
                    break;
                }

                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("{} 监听器错误: {}", kind, e);
                        continue;
                    }
                };

                for (old, new) in cache.observe(event) {
                    for event in classify(old.as_ref(), new.as_ref()) {
                        if let Err(e) = event_tx.send(event).await {
                            error!("发送 {} 事件失败: {}", kind, e);
                            return;
                        }
                    }
                }
            }
            info!("{} 监听器已退出", kind);
        });

        self.tasks.lock().await.push(task);
    }

    async fn start_event_processor(&self) -> Result<()> {
        let mut event_rx = self
            .event_rx
            .lock()
            .await
            .take()
            .context("事件处理循环已经启动")?;

        let reconciler = self.reconciler.clone();
        let retry = self.config.retry.clone();
        let handler: EventFn = Arc::new(move |event: CrEvent| {
            let reconciler = reconciler.clone();
            let retry = retry.clone();
            async move { process_with_retry(&reconciler, &retry, event).await }.boxed()
        });

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let workers = KeyedWorkers::new(handler);
            info!("启动事件处理循环");

            while let Some(event) = event_rx.recv().await {
                if !*running.read().await {
                    break;
                }
                debug!("收到事件: {}", event.describe());
                workers.dispatch(event);
            }
            info!("事件处理循环已退出");
        });

        self.tasks.lock().await.push(task);
        Ok(())
    }
}
