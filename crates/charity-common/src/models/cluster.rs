//! 集群模型
//!
//! 由编排系统按需创建的工作负载集群的辅助校验。

use once_cell::sync::Lazy;
use regex::Regex;

/// `v主.次.补丁`，可带预发布或构建后缀
static KUBERNETES_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d+\.\d+\.\d+([+-].*)?$").expect("静态正则"));

/// 检查是否为 clusterctl 接受的 Kubernetes 版本写法，例如 `v1.26.3`
pub fn is_kubernetes_version(version: &str) -> bool {
    KUBERNETES_VERSION.is_match(version)
}
