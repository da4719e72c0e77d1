use chrono::{DateTime, Duration, Utc};
use sentinel_types::QueryKey;
use std::collections::HashMap;

/// 单个查询的平均耗时基线
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineEntry {
    pub key: QueryKey,
    /// 平均耗时的 EMA（毫秒）
    pub ema_ms: f64,
    pub samples: u32,
    /// 连续超出基线的周期数
    pub streak: u32,
    /// 最近一次超出基线的检测周期序号
    pub last_breach_cycle: Option<u64>,
    pub last_seen: DateTime<Utc>,
    touched: u64,
}

impl BaselineEntry {
    fn new(key: QueryKey, now: DateTime<Utc>, touched: u64) -> Self {
        Self {
            key,
            ema_ms: 0.0,
            samples: 0,
            streak: 0,
            last_breach_cycle: None,
            last_seen: now,
            touched,
        }
    }

    /// 将一个样本计入 EMA
    pub fn feed(&mut self, value: f64, alpha: f64) {
        if self.samples == 0 {
            self.ema_ms = value;
        } else {
            self.ema_ms = alpha * value + (1.0 - alpha) * self.ema_ms;
        }
        self.samples = self.samples.saturating_add(1);
    }

    /// 记录一次超出基线，只有紧接上一周期的超出才延续计数
    pub fn record_breach(&mut self, cycle: u64) -> u32 {
        let continues = cycle > 0 && self.last_breach_cycle == Some(cycle - 1);
        self.streak = if continues {
            self.streak.saturating_add(1)
        } else {
            1
        };
        self.last_breach_cycle = Some(cycle);
        self.streak
    }

    pub fn clear_streak(&mut self) {
        self.streak = 0;
        self.last_breach_cycle = None;
    }
}

/// 有界的基线表
///
/// 槽位数组加指纹索引，空闲槽位复用；闲置超过 TTL 的条目被清除，
/// 容量满时淘汰最久未访问的条目。
#[derive(Debug)]
pub struct BaselineTable {
    slots: Vec<Option<BaselineEntry>>,
    index: HashMap<QueryKey, usize>,
    free: Vec<usize>,
    capacity: usize,
    ttl: Duration,
    clock: u64,
}

impl BaselineTable {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            capacity: capacity.max(1),
            ttl,
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&BaselineEntry> {
        self.index
            .get(key)
            .and_then(|&slot| self.slots.get(slot))
            .and_then(|entry| entry.as_ref())
    }

    pub fn get_mut(&mut self, key: &QueryKey) -> Option<&mut BaselineEntry> {
        let slot = *self.index.get(key)?;
        self.clock += 1;
        let clock = self.clock;
        let entry = self.slots.get_mut(slot)?.as_mut()?;
        entry.touched = clock;
        Some(entry)
    }

    /// 取出或创建条目并刷新访问时间
    pub fn entry(&mut self, key: &QueryKey, now: DateTime<Utc>) -> &mut BaselineEntry {
        self.clock += 1;
        let clock = self.clock;

        let existing = self.index.get(key).copied();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                if self.index.len() >= self.capacity {
                    self.evict_least_recent();
                }
                let slot = match self.free.pop() {
                    Some(slot) => slot,
                    None => {
                        self.slots.push(None);
                        self.slots.len() - 1
                    }
                };
                self.slots[slot] = Some(BaselineEntry::new(key.clone(), now, clock));
                self.index.insert(key.clone(), slot);
                slot
            }
        };

        let entry = self.slots[slot].get_or_insert_with(|| BaselineEntry::new(key.clone(), now, clock));
        entry.touched = clock;
        entry.last_seen = now;
        entry
    }

    pub fn remove(&mut self, key: &QueryKey) -> Option<BaselineEntry> {
        let slot = self.index.remove(key)?;
        let entry = self.slots.get_mut(slot)?.take();
        self.free.push(slot);
        entry
    }

    /// 清除闲置超过 TTL 的条目，返回清除数量
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<QueryKey> = self
            .slots
            .iter()
            .flatten()
            .filter(|entry| now - entry.last_seen > self.ttl)
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .slots
            .iter()
            .flatten()
            .min_by_key(|entry| entry.touched)
            .map(|entry| entry.key.clone());

        if let Some(key) = oldest {
            tracing::debug!(query = %key, "Baseline evicted at capacity");
            self.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> QueryKey {
        QueryKey::new(s)
    }

    #[test]
    fn test_ema_feed() {
        let mut entry = BaselineEntry::new(key("q"), Utc::now(), 0);
        entry.feed(100.0, 0.5);
        assert_eq!(entry.ema_ms, 100.0);
        entry.feed(200.0, 0.5);
        assert_eq!(entry.ema_ms, 150.0);
        assert_eq!(entry.samples, 2);
    }

    #[test]
    fn test_breach_streak_requires_adjacent_cycles() {
        let mut entry = BaselineEntry::new(key("q"), Utc::now(), 0);
        assert_eq!(entry.record_breach(4), 1);
        assert_eq!(entry.record_breach(5), 2);
        assert_eq!(entry.record_breach(7), 1);
        entry.clear_streak();
        assert_eq!(entry.record_breach(8), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let now = Utc::now();
        let mut table = BaselineTable::new(2, Duration::hours(1));
        table.entry(&key("a"), now);
        table.entry(&key("b"), now);
        // 访问 a，使 b 成为最久未访问
        table.entry(&key("a"), now);
        table.entry(&key("c"), now);

        assert_eq!(table.len(), 2);
        assert!(table.get(&key("a")).is_some());
        assert!(table.get(&key("b")).is_none());
        assert!(table.get(&key("c")).is_some());
    }

    #[test]
    fn test_ttl_eviction_and_slot_reuse() {
        let start = Utc::now();
        let mut table = BaselineTable::new(10, Duration::minutes(30));
        table.entry(&key("old"), start);
        table.entry(&key("fresh"), start + Duration::minutes(25));

        let removed = table.evict_expired(start + Duration::minutes(40));
        assert_eq!(removed, 1);
        assert!(table.get(&key("old")).is_none());
        assert!(table.get(&key("fresh")).is_some());

        table.entry(&key("new"), start + Duration::minutes(41));
        assert_eq!(table.slots.len(), 2);
    }
}
