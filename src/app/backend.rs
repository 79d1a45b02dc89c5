use std::future::Future;
use std::pin::Pin;

use super::{
    errors::AppError,
    messages::{Message, Reply},
};

pub type AppFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Something that answers message actions: the in-process application or a
/// running daemon reached over HTTP.
pub trait AppBackend: Send + Sync {
    fn handle(&self, message: Message) -> AppFuture<'_, Reply>;
}
