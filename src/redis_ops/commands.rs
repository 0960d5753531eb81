/// Argument vector for one Redis command: name first, then its arguments,
/// all as raw bytes.
pub(crate) type Command = Vec<Vec<u8>>;

pub(crate) fn string_command(key: &[u8], value: &[u8]) -> Command {
    vec![b"SET".to_vec(), key.to_vec(), value.to_vec()]
}

/// Split `elements` over as many `name key ...` commands as needed so that
/// none carries more than `batch_size` elements.
fn batched_commands<T, F>(
    name: &str,
    key: &[u8],
    elements: &[T],
    batch_size: usize,
    push: F,
) -> Vec<Command>
where
    F: Fn(&mut Command, &T),
{
    elements
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let mut command = Vec::with_capacity(2 + chunk.len() * 2);
            command.push(name.as_bytes().to_vec());
            command.push(key.to_vec());
            for element in chunk {
                push(&mut command, element);
            }
            command
        })
        .collect()
}

pub(crate) fn list_commands(key: &[u8], items: &[Vec<u8>], batch_size: usize) -> Vec<Command> {
    batched_commands("RPUSH", key, items, batch_size, |cmd, item| {
        cmd.push(item.clone())
    })
}

pub(crate) fn set_commands(key: &[u8], members: &[Vec<u8>], batch_size: usize) -> Vec<Command> {
    batched_commands("SADD", key, members, batch_size, |cmd, member| {
        cmd.push(member.clone())
    })
}

/// `members` are `(member, score)` pairs as returned by `ZRANGE ... WITHSCORES`.
pub(crate) fn zset_commands(
    key: &[u8],
    members: &[(Vec<u8>, Vec<u8>)],
    batch_size: usize,
) -> Vec<Command> {
    batched_commands("ZADD", key, members, batch_size, |cmd, (member, score)| {
        cmd.push(score.clone());
        cmd.push(member.clone());
    })
}

pub(crate) fn hash_commands(
    key: &[u8],
    fields: &[(Vec<u8>, Vec<u8>)],
    batch_size: usize,
) -> Vec<Command> {
    batched_commands("HSET", key, fields, batch_size, |cmd, (field, value)| {
        cmd.push(field.clone());
        cmd.push(value.clone());
    })
}

pub(crate) fn append_expire_command(
    commands: &mut Vec<Command>,
    key: &[u8],
    ttl: Option<i64>,
    now_unix: u64,
) {
    if let Some(ttl) = ttl.filter(|ttl| *ttl > 0) {
        let expire_at = now_unix.saturating_add(ttl.unsigned_abs());
        commands.push(vec![
            b"EXPIREAT".to_vec(),
            key.to_vec(),
            expire_at.to_string().into_bytes(),
        ]);
    }
}
