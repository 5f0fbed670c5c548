//! Log capture strategies.

use crate::container::{ContainerError, ContainerHandle, LogConsumer, Result};
use crate::engine::LogChunk;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

pub const STRING: &str = "string";

/// Attaches log capture to a started handle.
pub trait LogStrategy: Send + Sync {
    /// Check options when the record is configured, before any container exists.
    fn validate(&self, _options: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    /// Attach capture; `None` means logs stay unavailable for this container.
    fn attach(
        &self,
        options: &Map<String, Value>,
        handle: &mut ContainerHandle,
    ) -> Result<Option<LogAccessor>>;
}

/// Returns everything captured so far on each call.
#[derive(Clone)]
pub struct LogAccessor {
    read: Arc<dyn Fn() -> String + Send + Sync>,
}

impl LogAccessor {
    pub fn new<F>(read: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
        }
    }

    pub fn get(&self) -> String {
        (self.read)()
    }
}

impl std::fmt::Debug for LogAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogAccessor")
    }
}

/// Appends stdout and stderr to one shared string.
#[derive(Debug, Default)]
pub struct StringLogConsumer {
    buffer: Mutex<String>,
}

impl StringLogConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }
}

impl LogConsumer for StringLogConsumer {
    fn accept(&self, chunk: &LogChunk) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push_str(&chunk.text);
        }
    }
}

/// The `string` strategy: capture into memory, read with blank lines collapsed.
pub struct StringLogStrategy;

impl LogStrategy for StringLogStrategy {
    fn validate(&self, options: &Map<String, Value>) -> Result<()> {
        if !options.is_empty() {
            return Err(ContainerError::ConfigError(format!(
                "The '{}' log strategy takes no options",
                STRING
            )));
        }
        Ok(())
    }

    fn attach(
        &self,
        options: &Map<String, Value>,
        handle: &mut ContainerHandle,
    ) -> Result<Option<LogAccessor>> {
        self.validate(options)?;

        let newline_runs = Regex::new(r"\n{2,}")
            .map_err(|e| ContainerError::Other(format!("Invalid newline pattern: {}", e)))?;
        let consumer = Arc::new(StringLogConsumer::new());
        handle.attach_log_consumer(consumer.clone());

        Ok(Some(LogAccessor::new(move || {
            newline_runs.replace_all(&consumer.contents(), "\n").into_owned()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::engine::{ImageSource, LogSource};
    use crate::strategy::{LogSpec, Resolvers};
    use std::time::Duration;

    async fn eventually(accessor: &LogAccessor, expected: &str) {
        for _ in 0..50 {
            if accessor.get() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(accessor.get(), expected);
    }

    #[test]
    fn test_consumer_appends_both_streams() {
        let consumer = StringLogConsumer::new();
        consumer.accept(&LogChunk {
            source: LogSource::StdOut,
            text: "out\n".to_string(),
        });
        consumer.accept(&LogChunk {
            source: LogSource::StdErr,
            text: "err\n".to_string(),
        });
        assert_eq!(consumer.contents(), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_string_accessor_reflects_later_output() {
        let engine = Arc::new(MemoryEngine::new());
        let mut handle = ContainerHandle::new(engine.clone(), ImageSource::image("alpine:3"));
        handle.start().await.unwrap();
        let id = handle.container_id().unwrap().to_string();

        engine.emit_log(&id, LogSource::StdOut, "first\n\n\n");
        let accessor = Resolvers::with_builtins()
            .resolve_logs(&LogSpec::string(), &mut handle)
            .unwrap()
            .expect("string strategy yields an accessor");
        eventually(&accessor, "first\n").await;

        engine.emit_log(&id, LogSource::StdErr, "second\n\nthird\n");
        eventually(&accessor, "first\nsecond\nthird\n").await;
    }

    #[test]
    fn test_string_strategy_rejects_options() {
        let engine = Arc::new(MemoryEngine::new());
        let mut handle = ContainerHandle::new(engine, ImageSource::image("alpine:3"));
        let spec = LogSpec::string().with_option("max_bytes", 10);

        let resolvers = Resolvers::with_builtins();
        assert!(matches!(
            resolvers.validate_logs(&spec),
            Err(ContainerError::ConfigError(_))
        ));
        let result = resolvers.resolve_logs(&spec, &mut handle);
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_unregistered_log_tag_validates() {
        let resolvers = Resolvers::with_builtins();
        let syslog = LogSpec::custom("syslog").with_option("facility", "local0");
        assert!(resolvers.validate_logs(&syslog).is_ok());
        assert!(resolvers.validate_logs(&LogSpec::none()).is_ok());
    }
}
