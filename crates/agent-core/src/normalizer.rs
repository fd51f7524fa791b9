//! Response Normalizer
//!
//! Turns an orchestration outcome into the one external contract: either a
//! complete `{ "result": ... }` value or an ordered stream of text fragments.
//!
//! Streaming outcomes are pumped by a producer task into a bounded channel of
//! capacity one. Non-text units are dropped. The channel closing is the only
//! end-of-stream signal. When the consumer goes away the producer stops and
//! drops the upstream, which releases whatever the upstream holds.

use std::pin::Pin;
use std::str::FromStr;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{AgentError, Result};

/// One quantum of orchestration output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseUnit {
    /// A fragment of the answer text
    Text(String),
    /// The agent is calling a tool
    ToolUse { name: String },
    /// Any other progress/control event
    Status(String),
}

pub type UnitStream = Pin<Box<dyn Stream<Item = Result<ResponseUnit>> + Send>>;

/// Raw outcome of an orchestration call
pub enum OrchestrationOutput {
    Single(String),
    Stream(UnitStream),
}

/// How the gateway drives the orchestration call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Single,
    Stream,
}

impl FromStr for ResponseMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "stream" | "streaming" => Ok(Self::Stream),
            other => Err(AgentError::Config(format!("unknown response mode '{other}'"))),
        }
    }
}

/// Single-shot response body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub result: String,
}

/// Ordered text fragments; ends when the producer completes
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The external invocation contract
pub enum InvocationResponse {
    Complete(CompleteResponse),
    Stream(FragmentStream),
}

impl InvocationResponse {
    /// Drain a streaming response into its single-shot equivalent
    pub async fn into_complete(self) -> Result<CompleteResponse> {
        match self {
            Self::Complete(response) => Ok(response),
            Self::Stream(stream) => Ok(CompleteResponse { result: collect(stream).await? }),
        }
    }
}

impl std::fmt::Debug for InvocationResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Concatenate every fragment of a stream
pub async fn collect(mut stream: FragmentStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

/// Normalize an orchestration outcome.
///
/// Must be called from within a tokio runtime when the outcome streams.
pub fn normalize(output: OrchestrationOutput) -> InvocationResponse {
    match output {
        OrchestrationOutput::Single(result) => InvocationResponse::Complete(CompleteResponse { result }),
        OrchestrationOutput::Stream(units) => InvocationResponse::Stream(Box::pin(forward(units))),
    }
}

fn forward(mut units: UnitStream) -> ReceiverStream<Result<String>> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                () = tx.closed() => {
                    tracing::debug!("Stream consumer went away; stopping producer");
                    break;
                }
                next = units.next() => next,
            };

            match next {
                None => break,
                Some(Ok(ResponseUnit::Text(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    if tx.send(Ok(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(unit)) => tracing::trace!(?unit, "Filtered non-text unit"),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Streaming invocation failed");
                    let _ = tx.send(Err(e.into_invocation())).await;
                    break;
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn units(items: Vec<Result<ResponseUnit>>) -> UnitStream {
        Box::pin(futures::stream::iter(items))
    }

    fn text(s: &str) -> Result<ResponseUnit> {
        Ok(ResponseUnit::Text(s.into()))
    }

    #[tokio::test]
    async fn single_shot_wraps_result() {
        let response = normalize(OrchestrationOutput::Single("Hello".into()));
        assert!(matches!(response, InvocationResponse::Complete(ref r) if r.result == "Hello"));
        assert_eq!(serde_json::to_value(response.into_complete().await.unwrap()).unwrap(), serde_json::json!({"result": "Hello"}));
    }

    #[tokio::test]
    async fn stream_preserves_order_and_filters_status() {
        let response = normalize(OrchestrationOutput::Stream(units(vec![
            Ok(ResponseUnit::Status("start".into())),
            text("Hel"),
            Ok(ResponseUnit::ToolUse { name: "add_numbers".into() }),
            text(""),
            text("lo"),
        ])));

        let InvocationResponse::Stream(stream) = response else {
            panic!("expected a stream");
        };
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn streamed_fragments_concatenate_to_single_shot_result() {
        let streamed = normalize(OrchestrationOutput::Stream(units(vec![text("Hel"), text("lo")])))
            .into_complete()
            .await
            .unwrap();
        let single = normalize(OrchestrationOutput::Single("Hello".into())).into_complete().await.unwrap();
        assert_eq!(streamed, single);
    }

    #[tokio::test]
    async fn upstream_error_ends_stream_with_invocation_error() {
        let response = normalize(OrchestrationOutput::Stream(units(vec![
            text("partial"),
            Err(AgentError::Provider("connection reset".into())),
            text("never"),
        ])));
        let InvocationResponse::Stream(mut stream) = response else {
            panic!("expected a stream");
        };

        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(matches!(stream.next().await, Some(Err(AgentError::Invocation(_)))));
        assert!(stream.next().await.is_none());
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_consumer_stops_producer() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let upstream: UnitStream = Box::pin(async_stream::stream! {
            let _flag = flag;
            yield text("first");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                yield text("later");
            }
        });

        let InvocationResponse::Stream(mut stream) = normalize(OrchestrationOutput::Stream(upstream)) else {
            panic!("expected a stream");
        };
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        drop(stream);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("producer should release the upstream");
    }

    #[test]
    fn parses_response_modes() {
        assert_eq!("stream".parse::<ResponseMode>().unwrap(), ResponseMode::Stream);
        assert_eq!("Single".parse::<ResponseMode>().unwrap(), ResponseMode::Single);
        assert!("batch".parse::<ResponseMode>().is_err());
    }
}
