//! 组件列表差异计算
//!
//! 比较应用组件列表的新旧两个版本，得出新增、移除和迁移（换集群）的组件。
//! 同名但集群不同的组件只出现在迁移集合中，不会同时出现在新增或移除集合里。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::models::application::ComponentRef;

/// 迁移的组件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigratedComponent {
    /// 组件名称
    pub name: String,
    /// 原集群
    pub old_cluster: String,
    /// 新集群
    pub new_cluster: String,
}

/// 差异结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentDiff {
    /// 新增的组件
    pub added: Vec<ComponentRef>,
    /// 移除的组件
    pub removed: Vec<ComponentRef>,
    /// 更换集群的组件
    pub migrated: Vec<MigratedComponent>,
}

impl ComponentDiff {
    /// 没有任何变化
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.migrated.is_empty()
    }
}

/// 计算组件列表差异
///
/// `old` 为空表示全部新增，`new` 为空表示全部移除。否则按完整记录
/// （名称 + 集群）判断新增与移除，再把同名换集群的条目重新归类为迁移。
pub fn diff_components(old: Option<&[ComponentRef]>, new: Option<&[ComponentRef]>) -> ComponentDiff {
    let (old, new) = match (old, new) {
        (None, None) => return ComponentDiff::default(),
        (None, Some(new)) => {
            return ComponentDiff {
                added: new.to_vec(),
                ..Default::default()
            }
        }
        (Some(old), None) => {
            return ComponentDiff {
                removed: old.to_vec(),
                ..Default::default()
            }
        }
        (Some(old), Some(new)) => (old, new),
    };

    let old_clusters: HashMap<&str, &str> =
        old.iter().map(|c| (c.name.as_str(), c.cluster.as_str())).collect();

    let migrated: Vec<MigratedComponent> = new
        .iter()
        .filter_map(|c| {
            let old_cluster = old_clusters.get(c.name.as_str())?;
            (*old_cluster != c.cluster).then(|| MigratedComponent {
                name: c.name.clone(),
                old_cluster: old_cluster.to_string(),
                new_cluster: c.cluster.clone(),
            })
        })
        .collect();

    let is_migrated = |name: &str| migrated.iter().any(|m| m.name == name);

    let added = new
        .iter()
        .filter(|c| !old.contains(c) && !is_migrated(&c.name))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|c| !new.contains(c) && !is_migrated(&c.name))
        .cloned()
        .collect();

    let diff = ComponentDiff {
        added,
        removed,
        migrated,
    };
    debug!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        migrated = diff.migrated.len(),
        "组件差异计算完成"
    );
    diff
}
