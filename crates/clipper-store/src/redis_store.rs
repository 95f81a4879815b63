//! Redis-backed job store.
//!
//! Each job is a hash at `{prefix}:job:{id}`; a set per state
//! (`{prefix}:jobs:{State}`) indexes IDs for the sweeper. Every transition
//! runs as a Lua script so the state check and the write are one atomic step
//! on that job's key, without locking any other job.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use clipper_models::{ClipRange, Job, JobId, JobState};

use crate::error::{StoreError, StoreResult};
use crate::store::JobStore;

// Shared helper: updated_at_us must strictly increase.
const BUMP: &str = r#"
local function bump(key, now)
  local prev = tonumber(redis.call('HGET', key, 'updated_at_us')) or 0
  local nxt = tonumber(now)
  if nxt <= prev then nxt = prev + 1 end
  return string.format('%.0f', nxt)
end
"#;

// KEYS: job, pending set. ARGV: id, source, start, end, now_us
const CREATE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return {'exists'} end
redis.call('HSET', KEYS[1],
  'id', ARGV[1], 'source_locator', ARGV[2],
  'start_offset', ARGV[3], 'end_offset', ARGV[4],
  'state', 'Pending', 'progress', '0',
  'created_at_us', ARGV[5], 'updated_at_us', ARGV[5])
redis.call('SADD', KEYS[2], ARGV[1])
return {'ok'}
"#;

// KEYS: job, pending set, running set. ARGV: id, now_us
const CLAIM: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {'not_found'} end
local state = redis.call('HGET', KEYS[1], 'state') or ''
if state ~= 'Pending' then return {'invalid_state', state} end
redis.call('HSET', KEYS[1], 'state', 'Running', 'progress', '0',
  'updated_at_us', bump(KEYS[1], ARGV[2]))
redis.call('SMOVE', KEYS[2], KEYS[3], ARGV[1])
return {'ok'}
"#;

// KEYS: job. ARGV: percent, now_us
const PROGRESS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {'not_found'} end
local state = redis.call('HGET', KEYS[1], 'state') or ''
if state ~= 'Running' then return {'invalid_state', state} end
local current = tonumber(redis.call('HGET', KEYS[1], 'progress')) or 0
local requested = tonumber(ARGV[1])
if requested == nil or requested < 0 or requested > 100 or requested < current then
  return {'invalid_progress', tostring(current)}
end
redis.call('HSET', KEYS[1], 'progress', ARGV[1],
  'updated_at_us', bump(KEYS[1], ARGV[2]))
return {'ok'}
"#;

// KEYS: job, running set, succeeded set. ARGV: id, locator, now_us
const COMPLETE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {'not_found'} end
local state = redis.call('HGET', KEYS[1], 'state') or ''
if state ~= 'Running' then return {'invalid_state', state} end
redis.call('HSET', KEYS[1], 'state', 'Succeeded', 'progress', '100',
  'result_locator', ARGV[2], 'updated_at_us', bump(KEYS[1], ARGV[3]))
redis.call('HDEL', KEYS[1], 'error_detail')
redis.call('SMOVE', KEYS[2], KEYS[3], ARGV[1])
return {'ok'}
"#;

// KEYS: job, running set, failed set. ARGV: id, detail, now_us, cutoff_us (optional)
const FAIL: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {'not_found'} end
local state = redis.call('HGET', KEYS[1], 'state') or ''
if state ~= 'Running' then return {'invalid_state', state} end
if ARGV[4] then
  local updated = tonumber(redis.call('HGET', KEYS[1], 'updated_at_us')) or 0
  if updated >= tonumber(ARGV[4]) then return {'skipped'} end
end
redis.call('HSET', KEYS[1], 'state', 'Failed', 'error_detail', ARGV[2],
  'updated_at_us', bump(KEYS[1], ARGV[3]))
redis.call('HDEL', KEYS[1], 'result_locator')
redis.call('SMOVE', KEYS[2], KEYS[3], ARGV[1])
return {'ok'}
"#;

// KEYS: job, succeeded set, failed set. ARGV: id, cutoff_us
const PURGE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {'skipped'} end
local state = redis.call('HGET', KEYS[1], 'state') or ''
if state ~= 'Succeeded' and state ~= 'Failed' then return {'skipped'} end
local updated = tonumber(redis.call('HGET', KEYS[1], 'updated_at_us')) or 0
if updated >= tonumber(ARGV[2]) then return {'skipped'} end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
return {'ok'}
"#;

struct Scripts {
    create: Script,
    claim: Script,
    progress: Script,
    complete: Script,
    fail: Script,
    purge: Script,
}

impl Scripts {
    fn load() -> Self {
        let with_bump = |body: &str| Script::new(&format!("{BUMP}{body}"));
        Self {
            create: Script::new(CREATE),
            claim: with_bump(CLAIM),
            progress: with_bump(PROGRESS),
            complete: with_bump(COMPLETE),
            fail: with_bump(FAIL),
            purge: Script::new(PURGE),
        }
    }
}

/// Outcome reported by a transition script.
#[derive(Debug, PartialEq)]
enum Outcome {
    Ok,
    Skipped,
    Exists,
    NotFound,
    InvalidState(JobState),
    InvalidProgress(u8),
}

impl Outcome {
    fn parse(id: &JobId, reply: Vec<String>) -> StoreResult<Self> {
        let detail = reply.get(1).map(String::as_str).unwrap_or_default();
        match reply.first().map(String::as_str) {
            Some("ok") => Ok(Outcome::Ok),
            Some("skipped") => Ok(Outcome::Skipped),
            Some("exists") => Ok(Outcome::Exists),
            Some("not_found") => Ok(Outcome::NotFound),
            Some("invalid_state") => detail
                .parse()
                .map(Outcome::InvalidState)
                .map_err(|e| StoreError::corrupt(id, e)),
            Some("invalid_progress") => detail
                .parse()
                .map(Outcome::InvalidProgress)
                .map_err(|_| StoreError::corrupt(id, format!("bad progress {detail}"))),
            other => Err(StoreError::corrupt(id, format!("unexpected script reply {other:?}"))),
        }
    }

    /// Map the outcome of a plain transition to the store contract.
    fn into_result(self, id: &JobId, requested: i64) -> StoreResult<()> {
        match self {
            Outcome::Ok => Ok(()),
            Outcome::NotFound => Err(StoreError::NotFound(id.clone())),
            Outcome::InvalidState(state) => Err(StoreError::InvalidState {
                id: id.clone(),
                state,
            }),
            Outcome::InvalidProgress(current) => Err(StoreError::InvalidProgress {
                id: id.clone(),
                current,
                requested,
            }),
            Outcome::Skipped | Outcome::Exists => {
                Err(StoreError::corrupt(id, format!("unexpected outcome {self:?}")))
            }
        }
    }
}

pub struct RedisJobStore {
    conn: MultiplexedConnection,
    prefix: String,
    scripts: Scripts,
}

impl RedisJobStore {
    /// Connect to Redis and prepare the transition scripts.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let prefix = prefix.into();
        info!("Connected Redis job store (prefix: {})", prefix);

        Ok(Self {
            conn,
            prefix,
            scripts: Scripts::load(),
        })
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn state_key(&self, state: JobState) -> String {
        format!("{}:jobs:{}", self.prefix, state)
    }

    async fn load(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_job(id, &fields).map(Some)
    }

    async fn require(&self, id: &JobId) -> StoreResult<Job> {
        self.load(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

fn now_us() -> String {
    Utc::now().timestamp_micros().to_string()
}

fn timestamp(id: &JobId, fields: &HashMap<String, String>, name: &str) -> StoreResult<DateTime<Utc>> {
    fields
        .get(name)
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| StoreError::corrupt(id, format!("missing or invalid {name}")))
}

fn decode_job(id: &JobId, fields: &HashMap<String, String>) -> StoreResult<Job> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| StoreError::corrupt(id, format!("missing {name}")))
    };
    let number = |name: &str| -> StoreResult<f64> {
        field(name)?
            .parse()
            .map_err(|_| StoreError::corrupt(id, format!("invalid {name}")))
    };

    Ok(Job {
        id: JobId::from_string(field("id")?.clone()),
        source_locator: field("source_locator")?.clone(),
        start_offset: number("start_offset")?,
        end_offset: number("end_offset")?,
        state: field("state")?
            .parse()
            .map_err(|e: String| StoreError::corrupt(id, e))?,
        progress_percent: field("progress")?
            .parse()
            .map_err(|_| StoreError::corrupt(id, "invalid progress"))?,
        result_locator: fields.get("result_locator").cloned(),
        error_detail: fields.get("error_detail").cloned(),
        created_at: timestamp(id, fields, "created_at_us")?,
        updated_at: timestamp(id, fields, "updated_at_us")?,
    })
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(
        &self,
        source_locator: &str,
        start_offset: f64,
        end_offset: f64,
    ) -> StoreResult<JobId> {
        let range = ClipRange::new(start_offset, end_offset)?;
        let mut conn = self.conn.clone();

        loop {
            let job = Job::new(source_locator, range);
            let reply: Vec<String> = self
                .scripts
                .create
                .key(self.job_key(&job.id))
                .key(self.state_key(JobState::Pending))
                .arg(job.id.as_str())
                .arg(&job.source_locator)
                .arg(job.start_offset)
                .arg(job.end_offset)
                .arg(job.created_at.timestamp_micros())
                .invoke_async(&mut conn)
                .await?;

            match Outcome::parse(&job.id, reply)? {
                Outcome::Ok => {
                    debug!(job_id = %job.id, "Created job");
                    return Ok(job.id);
                }
                // UUID collision; draw another.
                Outcome::Exists => continue,
                other => {
                    return Err(StoreError::corrupt(&job.id, format!("create returned {other:?}")))
                }
            }
        }
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.require(id).await
    }

    async fn claim_for_execution(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .claim
            .key(self.job_key(id))
            .key(self.state_key(JobState::Pending))
            .key(self.state_key(JobState::Running))
            .arg(id.as_str())
            .arg(now_us())
            .invoke_async(&mut conn)
            .await?;

        match Outcome::parse(id, reply)? {
            Outcome::Ok => self.require(id).await,
            Outcome::InvalidState(_) => Err(StoreError::AlreadyClaimed(id.clone())),
            Outcome::NotFound => Err(StoreError::NotFound(id.clone())),
            other => Err(StoreError::corrupt(id, format!("claim returned {other:?}"))),
        }
    }

    async fn update_progress(&self, id: &JobId, percent: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .progress
            .key(self.job_key(id))
            .arg(percent)
            .arg(now_us())
            .invoke_async(&mut conn)
            .await?;

        Outcome::parse(id, reply)?.into_result(id, percent)
    }

    async fn complete(&self, id: &JobId, result_locator: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .complete
            .key(self.job_key(id))
            .key(self.state_key(JobState::Running))
            .key(self.state_key(JobState::Succeeded))
            .arg(id.as_str())
            .arg(result_locator)
            .arg(now_us())
            .invoke_async(&mut conn)
            .await?;

        Outcome::parse(id, reply)?.into_result(id, 100)
    }

    async fn fail(&self, id: &JobId, error_detail: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .fail
            .key(self.job_key(id))
            .key(self.state_key(JobState::Running))
            .key(self.state_key(JobState::Failed))
            .arg(id.as_str())
            .arg(error_detail)
            .arg(now_us())
            .invoke_async(&mut conn)
            .await?;

        Outcome::parse(id, reply)?.into_result(id, 0)
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(self.state_key(state)).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids.into_iter().map(JobId::from) {
            // Purged between SMEMBERS and HGETALL.
            if let Some(job) = self.load(&id).await? {
                if job.state == state {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn fail_if_stale(
        &self,
        id: &JobId,
        cutoff: DateTime<Utc>,
        error_detail: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .fail
            .key(self.job_key(id))
            .key(self.state_key(JobState::Running))
            .key(self.state_key(JobState::Failed))
            .arg(id.as_str())
            .arg(error_detail)
            .arg(now_us())
            .arg(cutoff.timestamp_micros())
            .invoke_async(&mut conn)
            .await?;

        match Outcome::parse(id, reply)? {
            Outcome::Ok => Ok(true),
            Outcome::Skipped | Outcome::InvalidState(_) => Ok(false),
            other => other.into_result(id, 0).map(|_| false),
        }
    }

    async fn purge_terminal(&self, id: &JobId, cutoff: DateTime<Utc>) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .purge
            .key(self.job_key(id))
            .key(self.state_key(JobState::Succeeded))
            .key(self.state_key(JobState::Failed))
            .arg(id.as_str())
            .arg(cutoff.timestamp_micros())
            .invoke_async(&mut conn)
            .await?;

        Ok(Outcome::parse(id, reply)? == Outcome::Ok)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
