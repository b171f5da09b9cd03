//! 本地持久化
//!
//! 最近的日志条目以JSON数组形式保存在一个固定键下，进程重启后仍然可读。
//! 存储出错时只在控制台报告，日志继续保存在内存里。

use crate::common::{AppError, LogEntry, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 持久化的键值存储接口
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// 基于目录的存储：每个键对应一个 `<key>.json` 文件
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid || key.starts_with('.') {
            return Err(AppError::StorageError(format!("非法的存储键: {}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        // 先写临时文件再重命名，避免写到一半留下损坏的数组
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }
}

/// 有界的本地日志
pub struct LocalLogStore {
    storage: std::sync::Arc<dyn KeyValueStorage>,
    key: String,
    cap: usize,
    // 内存副本；存储正常时与存储内容一致，存储失败时作为降级数据源
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LocalLogStore {
    /// 创建并从存储中加载已有日志
    pub fn open(storage: std::sync::Arc<dyn KeyValueStorage>, key: impl Into<String>, cap: usize) -> Self {
        let key = key.into();
        let cap = cap.max(1);
        let mut entries = load_entries(storage.as_ref(), &key);
        while entries.len() > cap {
            entries.pop_front();
        }
        Self {
            storage,
            key,
            cap,
            entries: Mutex::new(entries),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// 追加一条日志，超出上限时从头部淘汰
    ///
    /// 内存副本总是更新；返回值只反映落盘是否成功。
    pub fn append(&self, entry: LogEntry) -> Result<()> {
        let snapshot: Vec<LogEntry> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.push_back(entry);
            while entries.len() > self.cap {
                entries.pop_front();
            }
            entries.iter().cloned().collect()
        };
        let json = serde_json::to_string(&snapshot)?;
        self.storage.set(&self.key, &json)
    }

    /// 全部日志，按时间从旧到新
    pub fn all(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空并删除存储键本身
    pub fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.storage.remove(&self.key)
    }
}

/// 读取已有日志；缺失或损坏的数据一律视为空
fn load_entries(storage: &dyn KeyValueStorage, key: &str) -> VecDeque<LogEntry> {
    match storage.get(key) {
        Ok(Some(raw)) => match serde_json::from_str::<Vec<LogEntry>>(&raw) {
            Ok(entries) => entries.into(),
            Err(e) => {
                eprintln!("[Local Log] 本地日志已损坏，忽略 ({}): {}", key, e);
                VecDeque::new()
            }
        },
        Ok(None) => VecDeque::new(),
        Err(e) => {
            eprintln!("[Local Log] 读取本地日志失败 ({}): {}", key, e);
            VecDeque::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Category, ContextMap, Severity};
    use std::sync::Arc;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            source: "client".to_string(),
            severity: Severity::Error,
            category: Category::Unknown,
            message: message.to_string(),
            stack: None,
            context: ContextMap::new(),
            fingerprint: message.to_string(),
            occurrences: 1,
        }
    }

    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::StorageError("read failed".to_string()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(AppError::StorageError("quota exceeded".to_string()))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(AppError::StorageError("remove failed".to_string()))
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let store = LocalLogStore::open(storage.clone(), "error_logs", 3);
        for i in 0..5 {
            store.append(entry(&format!("e{}", i))).unwrap();
        }
        let messages: Vec<String> = store.all().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);

        // 存储中的数组与内存副本一致
        let raw = storage.get("error_logs").unwrap().unwrap();
        let persisted: Vec<LogEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.len(), 3);
        assert_eq!(persisted[0].message, "e2");
    }

    #[test]
    fn test_survives_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let store = LocalLogStore::open(storage.clone(), "error_logs", 10);
            store.append(entry("before restart")).unwrap();
        }
        let reopened = LocalLogStore::open(storage, "error_logs", 10);
        assert_eq!(reopened.all()[0].message, "before restart");
    }

    #[test]
    fn test_corrupt_data_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("error_logs", "{not json").unwrap();
        let store = LocalLogStore::open(storage, "error_logs", 10);
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_removes_key() {
        let storage = Arc::new(MemoryStorage::new());
        let store = LocalLogStore::open(storage.clone(), "error_logs", 10);
        store.append(entry("x")).unwrap();
        assert!(storage.contains_key("error_logs"));
        store.clear().unwrap();
        assert!(!storage.contains_key("error_logs"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_storage_failure_degrades_to_memory() {
        let store = LocalLogStore::open(Arc::new(BrokenStorage), "error_logs", 2);
        assert!(store.append(entry("a")).is_err());
        assert!(store.append(entry("b")).is_err());
        assert!(store.append(entry("c")).is_err());
        let messages: Vec<String> = store.all().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn test_file_storage_roundtrip_and_remove() {
        let dir = std::env::temp_dir().join(format!("pt_store_{}", std::process::id()));
        let storage = FileStorage::new(&dir).unwrap();
        assert_eq!(storage.get("error_logs").unwrap(), None);
        storage.set("error_logs", "[]").unwrap();
        assert_eq!(storage.get("error_logs").unwrap().as_deref(), Some("[]"));
        storage.remove("error_logs").unwrap();
        assert_eq!(storage.get("error_logs").unwrap(), None);
        // 删除不存在的键不算错误
        storage.remove("error_logs").unwrap();
        assert!(storage.set("../escape", "x").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
