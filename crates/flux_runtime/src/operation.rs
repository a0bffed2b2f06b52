//! The inner operation contract.
//!
//! A flux processor wraps anything that turns one input into one output and
//! may fail. [`from_fn`] adapts an async closure.

use async_trait::async_trait;
use flux_core::OperationError;
use std::future::Future;
use std::marker::PhantomData;

/// A single-input, single-output async capability
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Accepted input
    type Input: Send + 'static;
    /// Produced output
    type Output: Send + 'static;

    /// Name used in logs, signals and errors
    fn name(&self) -> &str;

    /// Transform one input
    ///
    /// # Errors
    ///
    /// Any failure of the underlying work
    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, OperationError>;
}

/// Operation backed by an async closure
pub struct FnOperation<F, I, O> {
    name: String,
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

/// Build an [`Operation`] from a name and an async closure
pub fn from_fn<F, Fut, I, O>(name: impl Into<String>, f: F) -> FnOperation<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, OperationError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    FnOperation {
        name: name.into(),
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Operation for FnOperation<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, OperationError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: I) -> Result<O, OperationError> {
        (self.f)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_fn_invokes_closure() {
        let double = from_fn("double", |x: i64| async move { Ok(x * 2) });
        assert_eq!(double.name(), "double");
        assert_eq!(double.invoke(21).await, Ok(42));
    }

    #[tokio::test]
    async fn test_from_fn_propagates_errors() {
        let strict = from_fn("strict", |x: i64| async move {
            if x < 0 {
                Err(OperationError::new(format!("negative input {x}")))
            } else {
                Ok(x)
            }
        });
        assert_eq!(strict.invoke(-1).await.unwrap_err().message(), "negative input -1");
    }
}
