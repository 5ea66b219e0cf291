mod impls;

pub use impls::{InMemoryActivityLogStore, InMemoryBoardHierarchy, InMemoryItemRepository};
