//! 控制平面工具函数
//!
//! 目前只有乐观并发冲突重试。

use charity_common::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 乐观并发冲突的默认重试次数
pub const DEFAULT_CONFLICT_RETRIES: usize = 5;

/// 在 409 冲突时重新执行读-改-写操作
///
/// `op` 每次执行都必须重新读取最新对象。非冲突错误立即返回，
/// 冲突错误在 `attempts` 次之后原样返回。
pub async fn retry_on_conflict<F, Fut, T>(attempts: usize, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Err(e) if e.is_conflict() && attempt < attempts => {
                warn!("尝试 {} 遇到冲突，重新读取后重试: {}", attempt, e);
                tokio::time::sleep(Duration::from_millis(20 * attempt as u64)).await;
            }
            other => return other,
        }
    }
}
