// In-process counter store
// Implements the counter store primitives over a local map with the same
// list, hash and scan semantics as Redis. Used for tests and local runs.
//
// Numan Thabit 2025 Nov

use super::{Batch, ConnectionState, CounterStore, StoreOp};
use crate::errors::{StoreResult, TelemetryError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    Hash(HashMap<String, i64>),
    List(VecDeque<String>),
}

/// Store kept entirely in memory. Every call takes one short lock, and a
/// batch is applied under a single lock so it is atomic like `MULTI`.
#[derive(Debug)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn key_count(&self) -> usize {
        self.data().len()
    }

    fn data(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TelemetryError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

fn wrong_type(key: &str) -> TelemetryError {
    TelemetryError::Command(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

/// Resolve Redis-style inclusive `[start, stop]` indices against `len`.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Glob match supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

fn incr(data: &mut BTreeMap<String, Value>, key: &str) -> StoreResult<i64> {
    let entry = data
        .entry(key.to_string())
        .or_insert(Value::Counter(0));
    match entry {
        Value::Counter(n) => {
            *n += 1;
            Ok(*n)
        }
        _ => Err(wrong_type(key)),
    }
}

fn hash_incr(
    data: &mut BTreeMap<String, Value>,
    key: &str,
    field: &str,
    amount: i64,
) -> StoreResult<i64> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Value::Hash(HashMap::new()));
    match entry {
        Value::Hash(h) => {
            let v = h.entry(field.to_string()).or_insert(0);
            *v += amount;
            Ok(*v)
        }
        _ => Err(wrong_type(key)),
    }
}

fn list_push(data: &mut BTreeMap<String, Value>, key: &str, value: &str) -> StoreResult<usize> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Value::List(VecDeque::new()));
    match entry {
        Value::List(l) => {
            l.push_front(value.to_string());
            Ok(l.len())
        }
        _ => Err(wrong_type(key)),
    }
}

fn list_trim(
    data: &mut BTreeMap<String, Value>,
    key: &str,
    start: isize,
    stop: isize,
) -> StoreResult<()> {
    let list = match data.get_mut(key) {
        None => return Ok(()),
        Some(Value::List(l)) => l,
        Some(_) => return Err(wrong_type(key)),
    };
    match resolve_range(list.len(), start, stop) {
        Some((s, e)) => {
            list.truncate(e + 1);
            list.drain(..s);
        }
        None => list.clear(),
    }
    if list.is_empty() {
        data.remove(key);
    }
    Ok(())
}

/// Key type as a batch will find it; lists carry their length so a trim
/// that empties one is seen as deleting the key.
#[derive(Debug, Clone, Copy)]
enum Shape {
    Counter,
    Hash,
    List(usize),
}

impl Shape {
    fn of(value: &Value) -> Self {
        match value {
            Value::Counter(_) => Shape::Counter,
            Value::Hash(_) => Shape::Hash,
            Value::List(l) => Shape::List(l.len()),
        }
    }
}

/// Walk the batch against key shapes only, failing on the first op that
/// would hit the wrong type. Nothing is written.
fn check_batch(data: &BTreeMap<String, Value>, batch: &Batch) -> StoreResult<()> {
    let mut shapes: HashMap<&str, Option<Shape>> = HashMap::new();
    for op in batch.ops() {
        let (key, next) = match op {
            StoreOp::Incr { key } => {
                (key, expect_shape(&shapes, data, key, Shape::Counter)?)
            }
            StoreOp::HashIncr { key, .. } => {
                (key, expect_shape(&shapes, data, key, Shape::Hash)?)
            }
            StoreOp::ListPush { key, .. } => match current(&shapes, data, key) {
                None => (key, Some(Shape::List(1))),
                Some(Shape::List(n)) => (key, Some(Shape::List(n + 1))),
                Some(_) => return Err(wrong_type(key)),
            },
            StoreOp::ListTrim { key, start, stop } => match current(&shapes, data, key) {
                None => (key, None),
                Some(Shape::List(n)) => {
                    let kept = resolve_range(n, *start, *stop).map_or(0, |(s, e)| e - s + 1);
                    (key, (kept > 0).then_some(Shape::List(kept)))
                }
                Some(_) => return Err(wrong_type(key)),
            },
        };
        shapes.insert(key.as_str(), next);
    }
    Ok(())
}

fn current(
    shapes: &HashMap<&str, Option<Shape>>,
    data: &BTreeMap<String, Value>,
    key: &str,
) -> Option<Shape> {
    match shapes.get(key) {
        Some(shape) => *shape,
        None => data.get(key).map(Shape::of),
    }
}

fn expect_shape(
    shapes: &HashMap<&str, Option<Shape>>,
    data: &BTreeMap<String, Value>,
    key: &str,
    want: Shape,
) -> StoreResult<Option<Shape>> {
    match current(shapes, data, key) {
        None => Ok(Some(want)),
        Some(found) if std::mem::discriminant(&found) == std::mem::discriminant(&want) => {
            Ok(Some(found))
        }
        Some(_) => Err(wrong_type(key)),
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.check()?;
        incr(&mut self.data(), key)
    }

    async fn hash_increment(&self, key: &str, field: &str, amount: i64) -> StoreResult<i64> {
        self.check()?;
        hash_incr(&mut self.data(), key, field, amount)
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.check()?;
        list_push(&mut self.data(), key, value)
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        self.check()?;
        list_trim(&mut self.data(), key, start, stop)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.check()?;
        match self.data().get(key) {
            None => Ok(Vec::new()),
            Some(Value::List(l)) => Ok(match resolve_range(l.len(), start, stop) {
                Some((s, e)) => l.range(s..=e).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        self.check()?;
        match self.data().get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn get_counters(&self, keys: &[String]) -> StoreResult<Vec<i64>> {
        self.check()?;
        let data = self.data();
        keys.iter()
            .map(|key| match data.get(key) {
                None => Ok(0),
                Some(Value::Counter(n)) => Ok(*n),
                Some(_) => Err(wrong_type(key)),
            })
            .collect()
    }

    async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.check()?;
        let data = self.data();
        let start = cursor as usize;
        let count = count.max(1);
        let page: Vec<String> = data
            .keys()
            .skip(start)
            .take(count)
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        let next = if start + count >= data.len() {
            0
        } else {
            (start + count) as u64
        };
        Ok((next, page))
    }

    async fn delete_keys(&self, keys: &[String]) -> StoreResult<usize> {
        self.check()?;
        let mut data = self.data();
        Ok(keys.iter().filter(|k| data.remove(*k).is_some()).count())
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        self.check()?;
        let mut data = self.data();
        // Type errors are the only way an op can fail, so once the batch
        // checks out it is applied in place under the same lock.
        check_batch(&data, &batch)?;
        for op in batch.ops() {
            match op {
                StoreOp::Incr { key } => {
                    incr(&mut data, key)?;
                }
                StoreOp::HashIncr { key, field, amount } => {
                    hash_incr(&mut data, key, field, *amount)?;
                }
                StoreOp::ListPush { key, value } => {
                    list_push(&mut data, key, value)?;
                }
                StoreOp::ListTrim { key, start, stop } => {
                    list_trim(&mut data, key, *start, *stop)?;
                }
            }
        }
        Ok(())
    }

    fn connection_state(&self) -> super::ConnectionState {
        if self.available.load(Ordering::SeqCst) {
            ConnectionState::Ready
        } else {
            ConnectionState::Disconnected
        }
    }
}
