//! Server-sent event decoding for provider streams

use std::pin::Pin;

use agent_core::error::{AgentError, Result};
use futures::{Stream, StreamExt};

pub type DataStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Yield the payload of every `data:` line, in order.
///
/// Lines may be split across network chunks; partial lines are buffered.
pub fn data_lines<S, B, E>(bytes: S) -> DataStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(lines(bytes))
}

fn lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| AgentError::Provider(format!("stream interrupted: {e}")))?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(data) = payload(&decode(line)?) {
                    yield data;
                }
            }
        }

        if !buffer.is_empty() {
            if let Some(data) = payload(&decode(buffer)?) {
                yield data;
            }
        }
    }
}

/// Lines are decoded whole so a character split across chunks survives.
fn decode(line: Vec<u8>) -> Result<String> {
    String::from_utf8(line).map_err(|e| AgentError::Provider(format!("stream is not valid UTF-8: {e}")))
}

fn payload(line: &str) -> Option<String> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data).to_string())
}
