//! LanguageModel trait definition

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use exchangestore::{ResponsePart, UserRequest};

use super::ModelError;

/// A live asynchronous sequence of response fragments.
///
/// The stream ends after yielding an `Err`; a well-behaved producer never
/// resumes after a failure.
pub type ResponseStream = BoxStream<'static, Result<ResponsePart, ModelError>>;

/// The result of one model call: either a direct value or a live stream
pub enum ModelResponse {
    /// Direct, non-streamed text response
    Text(String),
    /// Streamed response; fragments arrive as the model generates them
    Stream(ResponseStream),
}

impl ModelResponse {
    pub fn is_stream(&self) -> bool {
        matches!(self, ModelResponse::Stream(_))
    }
}

impl std::fmt::Debug for ModelResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelResponse::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ModelResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A language model endpoint
///
/// Implementations own transport, authentication and provider quirks. The
/// cancellation token travels with every call; honoring it means ending
/// the response (or stream) early, which callers observe as termination.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stable identifier recorded alongside every exchange request
    fn id(&self) -> &str;

    /// Issue one request and return the (possibly streaming) response
    async fn request(&self, request: &UserRequest, cancel: CancellationToken) -> Result<ModelResponse, ModelError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted response for the mock model
    pub enum MockResponse {
        Text(String),
        /// Fragments yielded one by one, then end of stream
        Parts(Vec<ResponsePart>),
        /// Fragments yielded one by one, then the given failure
        PartsThenError(Vec<ResponsePart>, String),
        Error(ModelError),
    }

    /// Mock language model for unit tests
    pub struct MockModel {
        id: String,
        responses: Mutex<Vec<MockResponse>>,
        call_count: AtomicUsize,
    }

    impl MockModel {
        pub fn new(responses: Vec<MockResponse>) -> Self {
            Self {
                id: "mock-model".to_string(),
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for MockModel {
        fn id(&self) -> &str {
            &self.id
        }

        async fn request(&self, _request: &UserRequest, _cancel: CancellationToken) -> Result<ModelResponse, ModelError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().expect("mock responses poisoned");
            if responses.is_empty() {
                return Err(ModelError::InvalidResponse("No more mock responses".to_string()));
            }
            match responses.remove(0) {
                MockResponse::Text(text) => Ok(ModelResponse::Text(text)),
                MockResponse::Parts(parts) => {
                    let items: Vec<Result<ResponsePart, ModelError>> = parts.into_iter().map(Ok).collect();
                    Ok(ModelResponse::Stream(Box::pin(futures::stream::iter(items))))
                }
                MockResponse::PartsThenError(parts, message) => {
                    let mut items: Vec<Result<ResponsePart, ModelError>> = parts.into_iter().map(Ok).collect();
                    items.push(Err(ModelError::InvalidResponse(message)));
                    Ok(ModelResponse::Stream(Box::pin(futures::stream::iter(items))))
                }
                MockResponse::Error(err) => Err(err),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use futures::StreamExt;

        #[tokio::test]
        async fn test_mock_model_scripted_responses() {
            let model = MockModel::new(vec![
                MockResponse::Text("one".to_string()),
                MockResponse::Parts(vec![ResponsePart::text("a"), ResponsePart::text("b")]),
            ]);
            let request = UserRequest::new("s", "r", "agent");

            let first = model.request(&request, CancellationToken::new()).await.unwrap();
            assert!(!first.is_stream());
            assert!(matches!(first, ModelResponse::Text(ref t) if t == "one"));

            let second = model.request(&request, CancellationToken::new()).await.unwrap();
            assert!(second.is_stream());
            match second {
                ModelResponse::Stream(stream) => {
                    let parts: Vec<_> = stream.collect().await;
                    assert_eq!(parts.len(), 2);
                    assert!(parts.iter().all(|p| p.is_ok()));
                }
                other => panic!("expected stream, got {other:?}"),
            }

            assert_eq!(model.call_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_model_errors_when_exhausted() {
            let model = MockModel::new(vec![]);
            let request = UserRequest::new("s", "r", "agent");
            let result = model.request(&request, CancellationToken::new()).await;
            assert!(result.is_err());
        }
    }
}
