//! Redis storage backend.
//!
//! Records are plain string keys, the index is a Redis set, and atomic batches
//! run as a single Lua script so Redis executes them without interleaving
//! other clients' commands.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry, TransactionOp};
use async_trait::async_trait;
use orders_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, ScanPage, Schema, ValidationError,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, RedisError, SetOptions};
use tokio::sync::OnceCell;

/// Checks every precondition first, then applies every write.
///
/// KEYS[i] is the target of operation i; ARGV[2i-1] names the operation and
/// ARGV[2i] carries its value or set member. Set operations are type-checked
/// up front so the write phase cannot fail halfway.
const COMMIT_SCRIPT: &str = r#"
local pending = {}
local function present(key)
	if pending[key] ~= nil then
		return pending[key]
	end
	return redis.call('EXISTS', key) == 1
end

for i, key in ipairs(KEYS) do
	local op = ARGV[2 * i - 1]
	if op == 'insert' then
		if present(key) then
			return {'exists', key}
		end
		pending[key] = true
	elseif op == 'delete' then
		if not present(key) then
			return {'missing', key}
		end
		pending[key] = false
	elseif op == 'sadd' or op == 'srem' then
		local kind = redis.call('TYPE', key)['ok']
		if kind ~= 'set' and kind ~= 'none' then
			return {'wrongtype', key}
		end
	else
		return {'badop', key}
	end
end

for i, key in ipairs(KEYS) do
	local op = ARGV[2 * i - 1]
	local arg = ARGV[2 * i]
	if op == 'insert' then
		redis.call('SET', key, arg)
	elseif op == 'delete' then
		redis.call('DEL', key)
	elseif op == 'sadd' then
		redis.call('SADD', key, arg)
	elseif op == 'srem' then
		redis.call('SREM', key, arg)
	end
end

return {'ok'}
"#;

/// Redis-backed storage.
///
/// The connection is opened lazily on first use and then shared by every
/// caller; `ConnectionManager` multiplexes requests and reconnects on failure.
pub struct RedisStorage {
	client: redis::Client,
	connection: OnceCell<ConnectionManager>,
	commit_script: redis::Script,
}

impl RedisStorage {
	/// Creates a backend for the given `redis://` URL without connecting.
	pub fn new(url: &str) -> Result<Self, StorageError> {
		let client =
			redis::Client::open(url).map_err(|e| StorageError::Configuration(e.to_string()))?;
		Ok(Self {
			client,
			connection: OnceCell::new(),
			commit_script: redis::Script::new(COMMIT_SCRIPT),
		})
	}

	async fn connection(&self) -> Result<ConnectionManager, StorageError> {
		self.connection
			.get_or_try_init(|| async {
				tracing::debug!("Opening redis connection");
				self.client
					.get_connection_manager()
					.await
					.map_err(map_redis_error)
			})
			.await
			.cloned()
	}
}

/// Splits an operation into (script op name, key, argument).
fn script_parts(op: &TransactionOp) -> (&'static str, &str, &[u8]) {
	match op {
		TransactionOp::Insert { key, value } => ("insert", key.as_str(), value.as_slice()),
		TransactionOp::Delete { key } => ("delete", key.as_str(), &[]),
		TransactionOp::SetAdd { set, member } => ("sadd", set.as_str(), member.as_bytes()),
		TransactionOp::SetRemove { set, member } => ("srem", set.as_str(), member.as_bytes()),
	}
}

/// Maps the script's reply onto the storage error taxonomy.
fn interpret_commit_reply(reply: &[String]) -> Result<(), StorageError> {
	match reply {
		[status] if status == "ok" => Ok(()),
		[status, key] if status == "exists" => Err(StorageError::AlreadyExists(key.clone())),
		[status, key] if status == "missing" => Err(StorageError::NotFound(key.clone())),
		[status, key] if status == "wrongtype" => Err(StorageError::Backend(format!(
			"key {} holds a value of the wrong type",
			key
		))),
		other => Err(StorageError::Backend(format!(
			"unexpected commit script reply: {:?}",
			other
		))),
	}
}

fn map_redis_error(e: RedisError) -> StorageError {
	if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
	{
		StorageError::Unavailable(e.to_string())
	} else {
		StorageError::Backend(e.to_string())
	}
}

#[async_trait]
impl StorageInterface for RedisStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let mut conn = self.connection().await?;
		let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
		value.ok_or_else(|| StorageError::NotFound(key.to_string()))
	}

	async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
		let mut conn = self.connection().await?;
		// Explicit MGET: the typed helper switches to GET for a single key,
		// which changes the reply shape.
		let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
			.arg(keys)
			.query_async(&mut conn)
			.await
			.map_err(map_redis_error)?;
		Ok(values)
	}

	async fn replace_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let mut conn = self.connection().await?;
		let options = SetOptions::default().conditional_set(ExistenceCheck::XX);
		let reply: Option<String> = conn
			.set_options(key, value, options)
			.await
			.map_err(map_redis_error)?;
		match reply {
			Some(_) => Ok(()),
			None => Err(StorageError::NotFound(key.to_string())),
		}
	}

	async fn scan_set(&self, set: &str, cursor: u64, count: u64) -> Result<ScanPage, StorageError> {
		let mut conn = self.connection().await?;
		let (cursor, members): (u64, Vec<String>) = redis::cmd("SSCAN")
			.arg(set)
			.arg(cursor)
			.arg("COUNT")
			.arg(count.max(1))
			.query_async(&mut conn)
			.await
			.map_err(map_redis_error)?;
		Ok(ScanPage { members, cursor })
	}

	async fn commit(&self, ops: Vec<TransactionOp>) -> Result<(), StorageError> {
		if ops.is_empty() {
			return Ok(());
		}

		let mut conn = self.connection().await?;
		let mut invocation = self.commit_script.prepare_invoke();
		for op in &ops {
			let (name, key, arg) = script_parts(op);
			invocation.key(key);
			invocation.arg(name).arg(arg);
		}

		let reply: Vec<String> = invocation
			.invoke_async(&mut conn)
			.await
			.map_err(map_redis_error)?;
		interpret_commit_reply(&reply)
	}

	async fn ping(&self) -> Result<(), StorageError> {
		let mut conn = self.connection().await?;
		let _: String = redis::cmd("PING")
			.query_async(&mut conn)
			.await
			.map_err(map_redis_error)?;
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(RedisStorageSchema)
	}
}

/// Configuration schema for RedisStorage.
pub struct RedisStorageSchema;

impl ConfigSchema for RedisStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
						Ok(())
					},
					_ => Err("must be a redis:// or rediss:// URL".to_string()),
				}
			})],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create a Redis storage backend from configuration.
///
/// Configuration parameters:
/// - `url`: connection URL, e.g. `redis://127.0.0.1:6379/0`
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	RedisStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("missing url".into()))?;

	Ok(Box::new(RedisStorage::new(url)?))
}

/// Registry for the Redis storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "redis";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
