pub mod error;
pub mod field;
pub mod units;
pub mod codec;
pub mod cache;

pub use error::{FieldError, Result};
pub use field::{FieldData, FieldQuantity};
pub use units::{UnitConverter, Units};
pub use codec::{FieldCodec, FileType, read, write};
pub use cache::{FieldCache, FieldParser};
