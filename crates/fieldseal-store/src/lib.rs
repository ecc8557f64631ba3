pub mod error;
pub mod owners;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use owners::{EncryptedColumn, EncryptedFieldOwner, FieldCodec, SqliteColumnOwner};
pub use sqlite::SqliteKeyStore;
pub use traits::{DekStore, MetadataStore};
pub use types::{DekRecord, EncryptionMetadata};
