use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use crate::error::{DomainError, DomainResult};
use crate::metrics::MATCHMAKING_QUEUE_SIZE;
use crate::models::UserId;

const QUEUE_KEY: &str = "duel:queue";
const JOINED_KEY: &str = "duel:queue:joined";

/// MMR window by time waited; `None` once any opponent is acceptable.
pub fn mmr_window(waited_ms: i64) -> Option<i32> {
    match waited_ms {
        w if w < 5_000 => Some(50),
        w if w < 10_000 => Some(100),
        w if w < 15_000 => Some(200),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub player_id: UserId,
    pub mmr: i32,
    pub joined_at_ms: i64,
}

impl QueueEntry {
    pub fn new(player_id: UserId, mmr: i32, joined_at_ms: i64) -> Self {
        Self {
            player_id,
            mmr,
            joined_at_ms,
        }
    }
}

/// Two waiting players can meet when their MMR gap fits the window of whoever waited longer.
pub fn can_pair(a: &QueueEntry, b: &QueueEntry, now_ms: i64) -> bool {
    if a.player_id == b.player_id {
        return false;
    }
    let waited = now_ms - a.joined_at_ms.min(b.joined_at_ms);
    match mmr_window(waited) {
        Some(window) => (a.mmr - b.mmr).abs() <= window,
        None => true,
    }
}

/// Oldest waiter first, paired with the closest MMR it may meet.
fn pick_pair(entries: &[QueueEntry], now_ms: i64) -> Option<(usize, usize)> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        entries[a]
            .joined_at_ms
            .cmp(&entries[b].joined_at_ms)
            .then_with(|| entries[a].player_id.cmp(&entries[b].player_id))
    });

    for &i in &order {
        let partner = order
            .iter()
            .copied()
            .filter(|&j| j != i && can_pair(&entries[i], &entries[j], now_ms))
            .min_by_key(|&j| (entries[i].mmr - entries[j].mmr).abs());
        if let Some(j) = partner {
            return Some((i, j));
        }
    }
    None
}

#[async_trait]
pub trait MatchmakingQueue: Send + Sync {
    /// Adds the player; `false` when already waiting.
    async fn join(&self, entry: QueueEntry) -> DomainResult<bool>;
    /// Removes the player; `false` when not waiting.
    async fn leave(&self, player_id: &UserId) -> DomainResult<bool>;
    async fn contains(&self, player_id: &UserId) -> DomainResult<bool>;
    /// Takes the next compatible pair out of the queue.
    async fn find_pair(&self, now_ms: i64) -> DomainResult<Option<(QueueEntry, QueueEntry)>>;
    async fn size(&self) -> DomainResult<usize>;
}

#[derive(Default)]
pub struct InMemoryQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchmakingQueue for InMemoryQueue {
    async fn join(&self, entry: QueueEntry) -> DomainResult<bool> {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.player_id == entry.player_id) {
            return Ok(false);
        }
        entries.push(entry);
        MATCHMAKING_QUEUE_SIZE.set(entries.len() as i64);
        Ok(true)
    }

    async fn leave(&self, player_id: &UserId) -> DomainResult<bool> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| &e.player_id != player_id);
        MATCHMAKING_QUEUE_SIZE.set(entries.len() as i64);
        Ok(entries.len() < before)
    }

    async fn contains(&self, player_id: &UserId) -> DomainResult<bool> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .any(|e| &e.player_id == player_id))
    }

    async fn find_pair(&self, now_ms: i64) -> DomainResult<Option<(QueueEntry, QueueEntry)>> {
        let mut entries = self.entries.lock().await;
        let Some((i, j)) = pick_pair(&entries, now_ms) else {
            return Ok(None);
        };
        let first = entries[i].clone();
        let second = entries[j].clone();
        entries.retain(|e| e.player_id != first.player_id && e.player_id != second.player_id);
        MATCHMAKING_QUEUE_SIZE.set(entries.len() as i64);
        Ok(Some((first, second)))
    }

    async fn size(&self) -> DomainResult<usize> {
        Ok(self.entries.lock().await.len())
    }
}

/// Sorted set scored by MMR plus a hash of join times; pairing runs as one Lua script.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

const JOIN_SCRIPT: &str = r#"
    if redis.call('ZADD', KEYS[1], 'NX', ARGV[2], ARGV[1]) == 1 then
        redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
        return 1
    end
    return 0
"#;

const PAIR_SCRIPT: &str = r#"
    local now = tonumber(ARGV[1])
    local members = redis.call('ZRANGE', KEYS[1], 0, -1, 'WITHSCORES')
    local entries = {}
    for i = 1, #members, 2 do
        local id = members[i]
        local joined = tonumber(redis.call('HGET', KEYS[2], id) or now)
        table.insert(entries, {id = id, mmr = tonumber(members[i + 1]), joined = joined})
    end
    table.sort(entries, function(a, b)
        if a.joined == b.joined then return a.id < b.id end
        return a.joined < b.joined
    end)

    local function window(waited)
        if waited < 5000 then return 50 end
        if waited < 10000 then return 100 end
        if waited < 15000 then return 200 end
        return -1
    end

    for i = 1, #entries do
        local a = entries[i]
        local best = nil
        local best_diff = nil
        for j = 1, #entries do
            if j ~= i then
                local b = entries[j]
                local diff = math.abs(a.mmr - b.mmr)
                local w = window(now - math.min(a.joined, b.joined))
                if (w < 0 or diff <= w) and (best_diff == nil or diff < best_diff) then
                    best = b
                    best_diff = diff
                end
            end
        end
        if best then
            redis.call('ZREM', KEYS[1], a.id, best.id)
            redis.call('HDEL', KEYS[2], a.id, best.id)
            return {a.id, tostring(a.mmr), tostring(a.joined), best.id, tostring(best.mmr), tostring(best.joined)}
        end
    end
    return {}
"#;

fn parse_number(raw: &str) -> DomainResult<i64> {
    raw.parse::<i64>()
        .or_else(|_| raw.parse::<f64>().map(|v| v as i64))
        .map_err(|_| DomainError::internal(format!("bad number '{}' in matchmaking queue", raw)))
}

fn parse_entry(fields: &[String]) -> DomainResult<QueueEntry> {
    let [id, mmr, joined] = fields else {
        return Err(DomainError::internal("malformed matchmaking pair"));
    };
    Ok(QueueEntry {
        player_id: UserId::parse(id)?,
        mmr: parse_number(mmr)? as i32,
        joined_at_ms: parse_number(joined)?,
    })
}

#[async_trait]
impl MatchmakingQueue for RedisQueue {
    async fn join(&self, entry: QueueEntry) -> DomainResult<bool> {
        let mut conn = self.conn.clone();
        let added: u32 = redis::Script::new(JOIN_SCRIPT)
            .key(QUEUE_KEY)
            .key(JOINED_KEY)
            .arg(entry.player_id.as_str())
            .arg(entry.mmr)
            .arg(entry.joined_at_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn leave(&self, player_id: &UserId) -> DomainResult<bool> {
        let mut conn = self.conn.clone();
        let (removed, _): (u32, u32) = redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(QUEUE_KEY)
            .arg(player_id.as_str())
            .cmd("HDEL")
            .arg(JOINED_KEY)
            .arg(player_id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn contains(&self, player_id: &UserId) -> DomainResult<bool> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(QUEUE_KEY)
            .arg(player_id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(score.is_some())
    }

    async fn find_pair(&self, now_ms: i64) -> DomainResult<Option<(QueueEntry, QueueEntry)>> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = redis::Script::new(PAIR_SCRIPT)
            .key(QUEUE_KEY)
            .key(JOINED_KEY)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        if fields.len() != 6 {
            return Ok(None);
        }
        Ok(Some((parse_entry(&fields[..3])?, parse_entry(&fields[3..])?)))
    }

    async fn size(&self) -> DomainResult<usize> {
        let mut conn = self.conn.clone();
        let size: usize = redis::cmd("ZCARD")
            .arg(QUEUE_KEY)
            .query_async(&mut conn)
            .await?;
        MATCHMAKING_QUEUE_SIZE.set(size as i64);
        Ok(size)
    }
}
