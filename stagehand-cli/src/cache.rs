//! Redis connector for the clear-cache command

use async_trait::async_trait;

use stagehand_core::clear_cache::{CacheConnection, CacheConnector, CacheError};

/// Turn a `host:port[,password=..][,ssl=true]` connection string into a
/// `redis://` URL. URLs pass through unchanged.
pub fn redis_url(connection_string: &str) -> Result<String, CacheError> {
    let trimmed = connection_string.trim();
    if trimmed.starts_with("redis://") || trimmed.starts_with("rediss://") {
        return Ok(trimmed.to_string());
    }

    let mut parts = trimmed.split(',').map(str::trim);
    let address = parts
        .next()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| CacheError::Connect("empty connection string".into()))?;

    let mut password = None;
    let mut tls = false;
    for option in parts {
        match option.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("password") => {
                password = Some(value.to_string())
            }
            Some((key, value)) if key.eq_ignore_ascii_case("ssl") => {
                tls = value.eq_ignore_ascii_case("true")
            }
            _ => {}
        }
    }

    let scheme = if tls { "rediss" } else { "redis" };
    Ok(match password {
        Some(password) => format!("{}://:{}@{}", scheme, password, address),
        None => format!("{}://{}", scheme, address),
    })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RedisConnector;

#[async_trait]
impl CacheConnector for RedisConnector {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn CacheConnection>, CacheError> {
        let url = redis_url(connection_string)?;
        let client = redis::Client::open(url).map_err(|e| CacheError::Connect(e.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CacheError::Connect(e.to_string()))?;
        Ok(Box::new(RedisConnection { connection }))
    }
}

struct RedisConnection {
    connection: redis::aio::MultiplexedConnection,
}

#[async_trait]
impl CacheConnection for RedisConnection {
    async fn flush_all(&mut self) -> Result<(), CacheError> {
        redis::cmd("FLUSHALL")
            .query_async::<_, ()>(&mut self.connection)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_url() {
        assert_eq!(redis_url("localhost:6379").unwrap(), "redis://localhost:6379");
        assert_eq!(
            redis_url("localhost:6379,password=s3cret").unwrap(),
            "redis://:s3cret@localhost:6379"
        );
        assert_eq!(
            redis_url("cache.example:6380, ssl=True, password=x").unwrap(),
            "rediss://:x@cache.example:6380"
        );
        assert_eq!(
            redis_url("redis://localhost:6379/0").unwrap(),
            "redis://localhost:6379/0"
        );
        assert!(redis_url("  ").is_err());
    }
}
