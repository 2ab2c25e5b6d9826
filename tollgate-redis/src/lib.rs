//! Redis shared store for `tollgate` (companion crate).
//!
//! Each identity owns two keys: `<prefix><identity>` holds the token count and
//! `<prefix><identity>:ts` the last-update timestamp in seconds. Refill and charge run as one
//! server-side Lua script, so concurrent processes never read the same pre-refill state.
//!
//! Keys expire once the bucket would have refilled to capacity (plus one second of slack), so
//! idle identities cost nothing. A budget that never refills keeps its keys.
//!
//! ```rust,no_run
//! use tollgate::{BudgetPolicy, IdentityRegistry, RateLimiter};
//! use tollgate_redis::RedisStore;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = IdentityRegistry::new()
//!     .with("iot-node-satoshi", BudgetPolicy::new(100.0, 100.0)?);
//! let store = RedisStore::open("redis://127.0.0.1:6379", "rl:")?;
//! let _limiter = RateLimiter::builder(registry).shared_store(store).build().await?;
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, Script};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tollgate::{
    BudgetPolicy, Charge, Identity, LimiterConfig, SharedStore, StoreError, TokenBucketState,
};

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "rl:";

// KEYS: tokens, ts. ARGV: rate per second, capacity, now.
// Returns {admitted, tokens}.
const CHARGE_SCRIPT: &str = r#"
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local tokens = tonumber(redis.call('GET', KEYS[1]))
local last = tonumber(redis.call('GET', KEYS[2]))
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

local elapsed = now - last
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * rate)

local admitted = 0
if tokens >= 1 then
  tokens = tokens - 1
  admitted = 1
end

local encoded = string.format('%.17g', tokens)
local stamp = string.format('%.17g', now)
if rate > 0 then
  local ttl = math.min(math.ceil((capacity - tokens) / rate * 1000) + 1000, 2147483647)
  redis.call('SET', KEYS[1], encoded, 'PX', ttl)
  redis.call('SET', KEYS[2], stamp, 'PX', ttl)
else
  redis.call('SET', KEYS[1], encoded)
  redis.call('SET', KEYS[2], stamp)
end
return {admitted, encoded}
"#;

// KEYS: tokens, ts. ARGV: rate per second, capacity, now, local tokens, local last update.
// Lowers the shared count to the local one, both refilled to `now`.
const RECONCILE_SCRIPT: &str = r#"
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local local_tokens = tonumber(ARGV[4])
local local_last = tonumber(ARGV[5])

local function refill(tokens, last)
  local elapsed = now - last
  if elapsed < 0 then elapsed = 0 end
  return math.min(capacity, tokens + elapsed * rate)
end

local tokens = tonumber(redis.call('GET', KEYS[1]))
local last = tonumber(redis.call('GET', KEYS[2]))
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

tokens = math.min(refill(tokens, last), refill(local_tokens, local_last))

local encoded = string.format('%.17g', tokens)
local stamp = string.format('%.17g', now)
if rate > 0 then
  local ttl = math.min(math.ceil((capacity - tokens) / rate * 1000) + 1000, 2147483647)
  redis.call('SET', KEYS[1], encoded, 'PX', ttl)
  redis.call('SET', KEYS[2], stamp, 'PX', ttl)
else
  redis.call('SET', KEYS[1], encoded)
  redis.call('SET', KEYS[2], stamp)
end
return 1
"#;

/// Token buckets kept in Redis.
///
/// The connection is established lazily on first use and re-established by the connection
/// manager after drops, so a store opened while Redis is down starts working once Redis is back.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    prefix: String,
    charge: Script,
    reconcile: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisStore {
    /// Create a store for `url`. Only the URL is validated here; no connection is made.
    pub fn open(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            prefix: prefix.into(),
            charge: Script::new(CHARGE_SCRIPT),
            reconcile: Script::new(RECONCILE_SCRIPT),
        })
    }

    /// Store described by `config`, or `None` when no endpoint is configured.
    pub fn from_config(config: &LimiterConfig) -> Result<Option<Self>, StoreError> {
        config.store_url.as_deref().map(|url| Self::open(url, config.key_prefix.clone())).transpose()
    }

    /// Key prefix in use.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key holding the token count for `identity`.
    pub fn tokens_key(&self, identity: &Identity) -> String {
        format!("{}{}", self.prefix, identity)
    }

    /// Key holding the last-update timestamp for `identity`.
    pub fn timestamp_key(&self, identity: &Identity) -> String {
        format!("{}{}:ts", self.prefix, identity)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .conn
            .get_or_try_init(|| async {
                tracing::debug!(prefix = %self.prefix, "connecting to redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(map_redis_error)?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn charge_one(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        now: f64,
    ) -> Result<Charge, StoreError> {
        let mut conn = self.connection().await?;
        let reply: (i64, String) = self
            .charge
            .key(self.tokens_key(identity))
            .key(self.timestamp_key(identity))
            .arg(policy.rate_per_second())
            .arg(policy.capacity())
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        parse_charge(reply)
    }

    async fn reconcile(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        local: TokenBucketState,
        now: f64,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .reconcile
            .key(self.tokens_key(identity))
            .key(self.timestamp_key(identity))
            .arg(policy.rate_per_second())
            .arg(policy.capacity())
            .arg(now)
            .arg(local.tokens)
            .arg(local.last_updated)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(map_redis_error)?;
        if pong != "PONG" {
            return Err(StoreError::Protocol(format!("PING answered {pong:?}")));
        }
        Ok(())
    }
}

fn parse_charge((admitted, tokens): (i64, String)) -> Result<Charge, StoreError> {
    let tokens: f64 = tokens
        .parse()
        .map_err(|_| StoreError::Protocol(format!("token count {tokens:?} is not a number")))?;
    match admitted {
        1 => Ok(Charge::Admitted { remaining: tokens }),
        0 => Ok(Charge::Denied { available: tokens }),
        other => Err(StoreError::Protocol(format!("admission flag {other} is not 0 or 1"))),
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    match err.kind() {
        ErrorKind::TypeError => StoreError::Protocol(err.to_string()),
        ErrorKind::ResponseError | ErrorKind::NoScriptError | ErrorKind::ExtensionError => {
            StoreError::Script(err.to_string())
        }
        _ => StoreError::Connection(err.to_string()),
    }
}
