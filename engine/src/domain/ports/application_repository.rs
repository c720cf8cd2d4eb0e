//! ApplicationRepository port

use async_trait::async_trait;

use crate::domain::entities::Application;
use crate::domain::error::Result;

/// Storage for resolved application descriptors.
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn save(&self, application: Application) -> Result<()>;

    /// Fetch one application; `ApplicationNotFound` when absent.
    async fn get(&self, id: &str) -> Result<Application>;

    /// All applications in dependency start order.
    async fn list(&self) -> Result<Vec<Application>>;

    async fn contains(&self, id: &str) -> Result<bool>;

    /// Drop every stored application, for a configuration swap.
    async fn clear(&self) -> Result<()>;
}
