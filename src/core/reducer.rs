//! 按键 upsert 的列表合并器
//!
//! 已有键原位替换，新键追加到末尾；同一批次内重复的键以后到者为准。
//! 合并结果与并行 worker 的返回顺序无关（键集合与每个键的最终值一致）。

use std::collections::HashMap;
use std::hash::Hash;

use crate::core::state::Section;

/// 将 `incoming` 按 `key` 合并进 `existing`，保持原有元素的相对顺序
pub fn upsert_by_key<T, K, F>(existing: &mut Vec<T>, incoming: impl IntoIterator<Item = T>, key: F)
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item), i))
        .collect();

    for item in incoming {
        let k = key(&item);
        match index.get(&k) {
            Some(&i) => existing[i] = item,
            None => {
                index.insert(k, existing.len());
                existing.push(item);
            }
        }
    }
}

/// Section 以 title 为身份键
pub fn merge_sections(existing: &mut Vec<Section>, incoming: Vec<Section>) {
    upsert_by_key(existing, incoming, |s| s.title.clone());
}
