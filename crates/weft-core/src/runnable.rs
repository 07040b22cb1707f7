use async_trait::async_trait;

use crate::config::RunnableConfig;
use crate::error::Result;

/// Core abstraction for async units of work.
///
/// Graph nodes, compiled graphs and sub-graph adapters all implement this
/// trait, so the scheduler dispatches them through one interface.
#[async_trait]
pub trait Runnable: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Process a single input and return a result.
    async fn invoke(&self, input: Self::Input, config: &RunnableConfig) -> Result<Self::Output>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOne;

    #[async_trait]
    impl Runnable for AddOne {
        type Input = i32;
        type Output = i32;

        async fn invoke(&self, input: i32, _config: &RunnableConfig) -> Result<i32> {
            Ok(input + 1)
        }
    }

    #[tokio::test]
    async fn invoke_single() {
        let config = RunnableConfig::default();
        assert_eq!(AddOne.invoke(41, &config).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn invoke_through_trait_object() {
        let runnable: std::sync::Arc<dyn Runnable<Input = i32, Output = i32>> =
            std::sync::Arc::new(AddOne);
        assert_eq!(runnable.invoke(1, &RunnableConfig::default()).await.unwrap(), 2);
    }
}
