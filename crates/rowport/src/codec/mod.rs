//! XML row codec.
//!
//! A data document is a root element holding one element per row:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <data>
//!   <author id="1" name="Herbert"/>
//!   <book id="10" author_id="1"><blurb><![CDATA[Long text...]]></blurb></book>
//!   <table table-name="order line" qty="4"/>
//! </data>
//! ```
//!
//! Column placement and body escaping live in [`text`]; [`DataWriter`]
//! encodes rows and [`DataReader`] decodes them in a single pass.

pub mod reader;
pub mod text;
pub mod writer;

pub use reader::DataReader;
pub use text::{ColumnPlacement, MAX_ATTRIBUTE_LENGTH};
pub use writer::DataWriter;
