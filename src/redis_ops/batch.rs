use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::MultiplexedConnection;
use redis::Value;
use tracing::debug;

use crate::config::DumpPlan;
use crate::dump::DumpError;

use super::commands::{
    append_expire_command, hash_commands, list_commands, set_commands, string_command,
    zset_commands, Command,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyDumpOptions {
    pub(crate) preserve_ttl: bool,
    pub(crate) batch_size: usize,
}

impl From<&DumpPlan> for KeyDumpOptions {
    fn from(plan: &DumpPlan) -> Self {
        Self {
            preserve_ttl: plan.preserve_ttl,
            batch_size: plan.batch_size,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct KeyMetadata {
    pub(crate) key: Vec<u8>,
    pub(crate) key_type: String,
    pub(crate) ttl: Option<i64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

pub(crate) async fn fetch_key_metadata(
    connection: &mut MultiplexedConnection,
    keys: &[Vec<u8>],
) -> Result<Vec<KeyMetadata>, DumpError> {
    let mut pipe = redis::pipe();
    for key in keys {
        pipe.cmd("TYPE").arg(key).cmd("TTL").arg(key);
    }
    let results: Vec<(String, i64)> = pipe.query_async(connection).await?;

    let metadata = keys
        .iter()
        .zip(results)
        .map(|(key, (key_type, ttl))| KeyMetadata {
            key: key.clone(),
            key_type,
            ttl: if ttl > 0 { Some(ttl) } else { None },
        })
        .collect();

    Ok(metadata)
}

pub(crate) fn partition_keys_by_type(
    metadata: Vec<KeyMetadata>,
) -> (Vec<KeyMetadata>, Vec<KeyMetadata>) {
    metadata.into_iter().partition(|m| m.key_type == "string")
}

fn ttl_of(meta: &KeyMetadata, options: &KeyDumpOptions) -> Option<i64> {
    if options.preserve_ttl {
        meta.ttl
    } else {
        None
    }
}

/// `SET` commands from the reply to a pipeline of one `GET` per key.
pub(crate) fn string_commands(
    string_keys: &[KeyMetadata],
    reply: &Value,
    options: &KeyDumpOptions,
    now: u64,
) -> Result<Vec<Command>, DumpError> {
    let values: Vec<Option<Vec<u8>>> = redis::from_redis_value(reply)?;

    let mut commands = Vec::with_capacity(string_keys.len());
    for (meta, value) in string_keys.iter().zip(values) {
        // Expired between TYPE and GET.
        let Some(value) = value else {
            continue;
        };
        commands.push(string_command(&meta.key, &value));
        append_expire_command(&mut commands, &meta.key, ttl_of(meta, options), now);
    }
    Ok(commands)
}

pub(crate) async fn process_string_keys_batch(
    connection: &mut MultiplexedConnection,
    string_keys: &[KeyMetadata],
    options: &KeyDumpOptions,
    now: u64,
) -> Result<Vec<Command>, DumpError> {
    let mut pipe = redis::pipe();
    for meta in string_keys {
        pipe.get(&meta.key);
    }
    let reply: Value = pipe.query_async(connection).await?;
    string_commands(string_keys, &reply, options, now)
}

/// Command reading the whole value of a non-string key, or `None` for types
/// that are not dumped.
pub(crate) fn value_query(meta: &KeyMetadata) -> Option<redis::Cmd> {
    let key = meta.key.as_slice();
    let query = match meta.key_type.as_str() {
        "list" => {
            let mut cmd = redis::cmd("LRANGE");
            cmd.arg(key).arg(0).arg(-1);
            cmd
        }
        "set" => {
            let mut cmd = redis::cmd("SMEMBERS");
            cmd.arg(key);
            cmd
        }
        "zset" => {
            let mut cmd = redis::cmd("ZRANGE");
            cmd.arg(key).arg(0).arg(-1).arg("WITHSCORES");
            cmd
        }
        "hash" => {
            let mut cmd = redis::cmd("HGETALL");
            cmd.arg(key);
            cmd
        }
        "none" => {
            debug!(key = %String::from_utf8_lossy(key), "key disappeared before it could be dumped");
            return None;
        }
        other => {
            // Kept below the default filter: a log line would cut through
            // the live progress line on stderr.
            debug!(
                key = %String::from_utf8_lossy(key),
                key_type = other,
                "skipping key of unsupported type"
            );
            return None;
        }
    };
    Some(query)
}

/// Restore commands for a non-string key from the reply to its [`value_query`].
pub(crate) fn non_string_commands(
    meta: &KeyMetadata,
    reply: &Value,
    options: &KeyDumpOptions,
    now: u64,
) -> Result<Vec<Command>, DumpError> {
    let key = meta.key.as_slice();
    let mut commands = match meta.key_type.as_str() {
        "list" => {
            let items: Vec<Vec<u8>> = redis::from_redis_value(reply)?;
            list_commands(key, &items, options.batch_size)
        }
        "set" => {
            let members: Vec<Vec<u8>> = redis::from_redis_value(reply)?;
            set_commands(key, &members, options.batch_size)
        }
        "zset" => {
            let members: Vec<(Vec<u8>, Vec<u8>)> = redis::from_redis_value(reply)?;
            zset_commands(key, &members, options.batch_size)
        }
        "hash" => {
            let fields: Vec<(Vec<u8>, Vec<u8>)> = redis::from_redis_value(reply)?;
            hash_commands(key, &fields, options.batch_size)
        }
        _ => Vec::new(),
    };

    if !commands.is_empty() {
        append_expire_command(&mut commands, key, ttl_of(meta, options), now);
    }
    Ok(commands)
}

pub(crate) async fn process_non_string_key(
    connection: &mut MultiplexedConnection,
    meta: &KeyMetadata,
    options: &KeyDumpOptions,
    now: u64,
) -> Result<Vec<Command>, DumpError> {
    let Some(query) = value_query(meta) else {
        return Ok(Vec::new());
    };
    let reply: Value = query.query_async(connection).await?;
    non_string_commands(meta, &reply, options, now)
}

/// Commands restoring every key of `keys`, string keys first.
pub(crate) async fn dump_key_batch(
    connection: &mut MultiplexedConnection,
    keys: &[Vec<u8>],
    options: &KeyDumpOptions,
) -> Result<Vec<Command>, DumpError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let now = unix_now();
    let mut all_commands = Vec::with_capacity(keys.len() * 2);
    let metadata = fetch_key_metadata(connection, keys).await?;
    let (string_keys, other_keys) = partition_keys_by_type(metadata);

    if !string_keys.is_empty() {
        let string_commands =
            process_string_keys_batch(connection, &string_keys, options, now).await?;
        all_commands.extend(string_commands);
    }

    for key_meta in &other_keys {
        let commands = process_non_string_key(connection, key_meta, options, now).await?;
        all_commands.extend(commands);
    }

    Ok(all_commands)
}
