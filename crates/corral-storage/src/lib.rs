pub mod cache;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use cache::{
    CacheError, ChannelCache, InMemoryChannelCache, InMemoryPolicyCache, InMemoryThingCache,
    PolicyCache, ThingCache,
};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    ClientRepository, GroupRepository, PolicyReader, PolicyWriter, StorageError, Store,
};
