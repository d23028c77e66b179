//! 应用模型
//!
//! 应用是部署的顶层单元：它拥有一个宿主集群（应用命名空间所在的集群），
//! 并通过组件引用列表浅层记录每个组件的放置集群，用于差异计算。

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// DNS 标签字符集与首尾约束
static DNS_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").expect("静态正则"));

/// 组件引用：应用规范中对组件的浅层视图
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct ComponentRef {
    /// 组件名称
    pub name: String,
    /// 组件放置的逻辑集群
    pub cluster: String,
}

impl ComponentRef {
    /// 创建新的组件引用
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.cluster)
    }
}

/// 检查名称是否为合法的 DNS 标签
///
/// 名称会被用作命名空间名和 Ingress 主机名的一段，因此要求 1~63 个字母、
/// 数字或连字符，不能以连字符开头或结尾，也不能全部由数字组成。
pub fn is_dns_label(name: &str) -> bool {
    DNS_LABEL.is_match(name) && !name.chars().all(|c| c.is_ascii_digit())
}

/// 校验 DNS 标签，失败时返回带有字段说明的校验错误
pub fn validate_dns_label(field: &str, name: &str) -> Result<()> {
    if is_dns_label(name) {
        Ok(())
    } else {
        Err(Error::ValidationFailed(format!(
            "{} 必须是合法的 DNS 标签: {:?}",
            field, name
        )))
    }
}

/// 组件引用中出现的所有不同集群（有序）
pub fn distinct_clusters(components: &[ComponentRef]) -> BTreeSet<String> {
    components.iter().map(|c| c.cluster.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("shop", true)]
    #[case("web-frontend", true)]
    #[case("a1", true)]
    #[case("A", true)]
    #[case("-web", false)]
    #[case("web-", false)]
    #[case("12345", false)]
    #[case("web_frontend", false)]
    #[case("", false)]
    fn test_is_dns_label(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_dns_label(name), expected);
    }

    #[test]
    fn test_dns_label_length_limit() {
        let ok = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(is_dns_label(&ok));
        assert!(!is_dns_label(&too_long));
    }

    #[test]
    fn test_validate_dns_label_message() {
        let err = validate_dns_label("应用名称", "bad_name").unwrap_err();
        assert!(err.to_string().contains("应用名称"));
    }

    #[test]
    fn test_distinct_clusters() {
        let components = vec![
            ComponentRef::new("web", "c1"),
            ComponentRef::new("db", "c2"),
            ComponentRef::new("cache", "c1"),
        ];
        let clusters: Vec<_> = distinct_clusters(&components).into_iter().collect();
        assert_eq!(clusters, vec!["c1".to_string(), "c2".to_string()]);
    }
}
