//! 磁盘缓存模块
//!
//! # 设计思路
//!
//! 以“键 → 文件”的方式持久化远程图片，键由调用方给出（通常是 URL 摘要），
//! 缓存自身不关心键的来历，只负责按键读写与目录管理。
//!
//! # 实现思路
//!
//! - 打开时自动 `create_dir_all`，避免上层判断目录是否存在。
//! - 写入先落临时文件再 `rename`，读者永远看不到写了一半的条目；
//!   同键并发写入为“最后写入者获胜”。
//! - 读取失败（除 NotFound 外）只记日志并按未命中处理。
//! - 清理（`sweep`）由外部按需调用，检索热路径从不触发。

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::util::close_quietly;

const TEMP_SUFFIX: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 磁盘缓存错误。
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 键为空或包含路径分隔符。
    #[error("非法缓存键：{0:?}")]
    InvalidKey(String),

    /// 缓存目录或条目读写失败。
    #[error("缓存 I/O 错误（{path}）：{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 缓存目录占用信息。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_bytes: u64,
}

/// 清理策略。两个条件都为 `None` 时不删除任何条目。
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepPolicy {
    /// 超过该时长未修改的条目会被删除。
    pub max_age: Option<Duration>,
    /// 总占用超过该值时，从最旧的条目开始删除直到不超过。
    pub max_total_bytes: Option<u64>,
}

/// 一次清理的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_entries: u64,
    pub removed_bytes: u64,
    pub remaining: CacheStats,
}

/// 内容寻址磁盘缓存。
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

struct EntryInfo {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

impl DiskCache {
    /// 打开（必要时创建）缓存目录。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_retriever::cache::DiskCache;
    ///
    /// let cache = DiskCache::open("/tmp/image-cache")?;
    /// cache.store("ABC", b"bytes")?;
    /// assert_eq!(cache.lookup("ABC").as_deref(), Some(&b"bytes"[..]));
    /// # Ok::<(), image_retriever::cache::CacheError>(())
    /// ```
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 键对应的条目路径；非法键返回 `None`。
    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        Self::is_valid_key(key).then(|| self.root.join(key))
    }

    /// 读取条目；不存在或不可读时返回 `None`，不会创建文件。
    pub fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key)?;

        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                log::warn!("⚠️ 读取缓存条目失败，按未命中处理 - {}: {}", path.display(), err);
                None
            }
        }
    }

    /// 写入条目，覆盖已有内容。
    pub fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self
            .path_for(key)
            .ok_or_else(|| CacheError::InvalidKey(key.to_string()))?;

        let temp_path = self.root.join(format!(
            "{}.{}.{}{}",
            key,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            TEMP_SUFFIX
        ));

        if let Err(source) = Self::write_file(&temp_path, bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(CacheError::Io { path: temp_path, source });
        }

        fs::rename(&temp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            CacheError::Io { path: path.clone(), source }
        })?;

        log::debug!("💾 已写入缓存条目 - {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    /// 统计缓存目录中的条目数与总占用（忽略临时文件）。
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.collect_entries()?;
        Ok(CacheStats {
            entry_count: entries.len() as u64,
            total_bytes: entries.iter().map(|entry| entry.len).sum(),
        })
    }

    /// 按策略清理条目。
    pub fn sweep(&self, policy: SweepPolicy) -> Result<SweepReport, CacheError> {
        let mut entries = self.collect_entries()?;
        entries.sort_by_key(|entry| entry.modified);

        let now = SystemTime::now();
        let mut report = SweepReport::default();
        let mut total: u64 = entries.iter().map(|entry| entry.len).sum();
        let mut kept = 0u64;

        for entry in entries {
            let too_old = policy.max_age.is_some_and(|max_age| {
                now.duration_since(entry.modified)
                    .map(|age| age > max_age)
                    .unwrap_or(false)
            });
            let over_budget = policy.max_total_bytes.is_some_and(|budget| total > budget);

            if !too_old && !over_budget {
                kept += 1;
                continue;
            }

            match fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CacheError::Io {
                        path: entry.path,
                        source,
                    });
                }
            }

            total = total.saturating_sub(entry.len);
            report.removed_entries += 1;
            report.removed_bytes += entry.len;
        }

        report.remaining = CacheStats {
            entry_count: kept,
            total_bytes: total,
        };

        log::info!(
            "🧹 缓存清理完成 - 删除 {} 个条目（{} bytes），剩余 {} 个（{} bytes）",
            report.removed_entries,
            report.removed_bytes,
            report.remaining.entry_count,
            report.remaining.total_bytes
        );

        Ok(report)
    }

    fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        if let Err(err) = file.write_all(bytes) {
            close_quietly(Some(file));
            return Err(err);
        }
        file.flush()?;
        file.sync_all()
    }

    fn collect_entries(&self) -> Result<Vec<EntryInfo>, CacheError> {
        let read_dir = fs::read_dir(&self.root).map_err(|source| CacheError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_none_or(|name| name.ends_with(TEMP_SUFFIX));
            if is_temp {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            entries.push(EntryInfo {
                path,
                len: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(entries)
    }

    fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key != "."
            && key != ".."
            && !key.ends_with(TEMP_SUFFIX)
            && !key.contains(['/', '\\', '\0'])
    }
}
