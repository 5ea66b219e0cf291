use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod activity;
pub mod boards;
pub mod directory;
pub mod events;
pub mod items;
pub mod loyalty;
pub mod notify;
pub mod pricing;
