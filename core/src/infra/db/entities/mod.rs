//! SeaORM entities
//!
//! Catalog tables (`item`, masters and link tables) are owned by the surrounding
//! application and only read here. `sync_task` and `search_index` belong to the sync
//! pipeline.

pub mod category;
pub mod file;
pub mod item;
pub mod item_category;
pub mod item_subcomponent;
pub mod item_tag;
pub mod owner;
pub mod search_index;
pub mod subcomponent;
pub mod sync_task;
pub mod tag;

pub use category::Entity as Category;
pub use file::Entity as File;
pub use item::Entity as Item;
pub use item_category::Entity as ItemCategory;
pub use item_subcomponent::Entity as ItemSubcomponent;
pub use item_tag::Entity as ItemTag;
pub use owner::Entity as Owner;
pub use search_index::Entity as SearchIndex;
pub use subcomponent::Entity as Subcomponent;
pub use sync_task::Entity as SyncTask;
pub use tag::Entity as Tag;
