//! 集群上下文解析器
//!
//! 枚举 kubeconfig 中的所有上下文，按上下文所指向的集群名（而非上下文名）
//! 匹配逻辑集群，避免依赖固定的上下文命名约定。

use charity_common::{Error, Result};
use kube::config::Kubeconfig;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::ClusterContext;

/// 逻辑集群名解析接口
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ContextResolver: Send + Sync {
    /// 解析逻辑集群名，找不到时返回 `ClusterNotFound`
    fn resolve(&self, cluster: &str) -> Result<ClusterContext>;

    /// 所有已知的逻辑集群
    fn clusters(&self) -> Vec<String>;

    /// 管理集群的逻辑名
    fn management_cluster(&self) -> String;

    /// 管理集群的上下文
    fn management(&self) -> Result<ClusterContext>;
}

/// 基于 kubeconfig 的解析器
#[derive(Debug, Clone)]
pub struct KubeconfigResolver {
    /// (上下文名, 集群名)，保持 kubeconfig 中的顺序
    contexts: Vec<(String, String)>,
    /// 管理集群逻辑名
    management: String,
}

impl KubeconfigResolver {
    /// 从已加载的 kubeconfig 构建解析器
    pub fn from_kubeconfig(kubeconfig: &Kubeconfig, management: impl Into<String>) -> Self {
        let contexts = kubeconfig
            .contexts
            .iter()
            .filter_map(|named| {
                named
                    .context
                    .as_ref()
                    .map(|ctx| (named.name.clone(), ctx.cluster.clone()))
            })
            .collect();

        Self {
            contexts,
            management: management.into(),
        }
    }

    /// 加载 kubeconfig：指定路径时读取该文件，否则按默认规则查找
    ///
    /// 在集群内运行且没有 kubeconfig 时，解析器只认识管理集群。
    pub fn load(path: Option<&str>, management: impl Into<String>) -> Result<Self> {
        let management = management.into();
        let kubeconfig = match path {
            Some(path) => Kubeconfig::read_from(path)
                .map_err(|e| Error::Config(format!("读取 kubeconfig {} 失败: {}", path, e)))?,
            None => match Kubeconfig::read() {
                Ok(kubeconfig) => kubeconfig,
                Err(e) => {
                    warn!("未找到 kubeconfig，仅使用集群内配置: {}", e);
                    return Ok(Self {
                        contexts: Vec::new(),
                        management,
                    });
                }
            },
        };

        Ok(Self::from_kubeconfig(&kubeconfig, management))
    }
}

impl ContextResolver for KubeconfigResolver {
    fn resolve(&self, cluster: &str) -> Result<ClusterContext> {
        if let Some((context, _)) = self.contexts.iter().find(|(_, c)| c == cluster) {
            debug!(cluster = %cluster, context = %context, "集群上下文解析成功");
            return Ok(ClusterContext::new(cluster, context.clone()));
        }

        if cluster == self.management {
            return Ok(ClusterContext::inferred(cluster));
        }

        Err(Error::ClusterNotFound(cluster.to_string()))
    }

    fn clusters(&self) -> Vec<String> {
        let mut clusters: BTreeSet<String> = self.contexts.iter().map(|(_, c)| c.clone()).collect();
        clusters.insert(self.management.clone());
        clusters.into_iter().collect()
    }

    fn management_cluster(&self) -> String {
        self.management.clone()
    }

    fn management(&self) -> Result<ClusterContext> {
        self.resolve(&self.management)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: c1
    cluster:
      server: https://c1.example:6443
  - name: c2
    cluster:
      server: https://c2.example:6443
users:
  - name: admin
    user:
      token: abc
contexts:
  - name: kind-workload-1
    context:
      cluster: c1
      user: admin
  - name: kind-workload-2
    context:
      cluster: c2
      user: admin
current-context: kind-workload-1
"#;

    fn resolver() -> KubeconfigResolver {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        KubeconfigResolver::from_kubeconfig(&kubeconfig, "mgmt")
    }

    #[test]
    fn test_resolve_matches_cluster_not_context_name() {
        let ctx = resolver().resolve("c2").unwrap();
        assert_eq!(ctx, ClusterContext::new("c2", "kind-workload-2"));
        assert!(resolver().resolve("kind-workload-2").is_err());
    }

    #[test]
    fn test_resolve_unknown_cluster() {
        let err = resolver().resolve("c9").unwrap_err();
        assert!(matches!(err, Error::ClusterNotFound(name) if name == "c9"));
    }

    #[test]
    fn test_management_falls_back_to_inferred_config() {
        let ctx = resolver().management().unwrap();
        assert_eq!(ctx, ClusterContext::inferred("mgmt"));
    }

    #[test]
    fn test_clusters_include_management() {
        assert_eq!(resolver().clusters(), vec!["c1", "c2", "mgmt"]);
    }
}
