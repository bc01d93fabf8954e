//! Placement and escaping rules shared by the data writer and reader.

use crate::core::identifier::is_xml_name;

/// String values longer than this are written as sub-elements instead of attributes.
pub const MAX_ATTRIBUTE_LENGTH: usize = 255;

/// Name of the document root written by the writer (ignored by the reader).
pub const ROOT_ELEMENT: &str = "data";
/// Generic row element used when the table name cannot be a tag.
pub const TABLE_ELEMENT: &str = "table";
/// Attribute or sub-element carrying the table name of a generic row element.
pub const TABLE_NAME: &str = "table-name";
/// Generic column sub-element.
pub const COLUMN_ELEMENT: &str = "column";
/// Attribute or sub-element carrying the column name of a generic column.
pub const COLUMN_NAME: &str = "column-name";
/// Sub-element carrying the value of a generic column.
pub const COLUMN_VALUE: &str = "column-value";
/// Marker attribute for base64-encoded bodies.
pub const BASE64_ATTR: &str = "base64";

/// Where a column value goes inside its row element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPlacement {
    /// `<row name="value"/>`
    Attribute,
    /// `<row><name>body</name></row>`
    Element,
    /// `<row><column column-name="name">body</column></row>`
    NamedColumn,
    /// `<row><column><column-name>body</column-name><column-value>body</column-value></column></row>`
    EncodedColumn,
}

/// Decide how a column is written, in order of preference.
pub fn classify_column(name: &str, text: &str) -> ColumnPlacement {
    let attribute_name = is_xml_name(name) && name != TABLE_NAME && name != BASE64_ATTR;
    if attribute_name && is_attribute_text(text) {
        ColumnPlacement::Attribute
    } else if attribute_name && name != COLUMN_ELEMENT {
        ColumnPlacement::Element
    } else if is_attribute_text(name) {
        ColumnPlacement::NamedColumn
    } else {
        ColumnPlacement::EncodedColumn
    }
}

/// Whether a table name can be the row element's tag.
pub fn is_table_tag(name: &str) -> bool {
    is_xml_name(name) && name != TABLE_ELEMENT
}

/// Whether text can be written verbatim as an attribute value.
///
/// Tab, CR and LF are excluded as well, since attribute value normalization
/// would turn them into spaces.
pub fn is_attribute_text(text: &str) -> bool {
    text.chars().count() <= MAX_ATTRIBUTE_LENGTH && !text.chars().any(is_control_or_invalid)
}

/// Whether text contains a character that cannot appear in XML character data.
pub fn needs_base64(text: &str) -> bool {
    text.chars()
        .any(|c| is_control_or_invalid(c) && !matches!(c, '\t' | '\n' | '\r'))
}

fn is_control_or_invalid(c: char) -> bool {
    c < ' ' || matches!(c, '\u{FFFE}' | '\u{FFFF}')
}

/// Split text into CDATA section contents so that no section contains `]]>`.
///
/// Consecutive `]` are counted up to two. When a `>` follows such a run, the
/// current section ends before the last `]`, which starts the next section.
/// Concatenating the sections yields the input; there is always at least one
/// section.
pub fn cdata_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut cut = 0;
    let mut brackets = 0u8;
    for (pos, c) in text.char_indices() {
        match c {
            ']' => brackets = (brackets + 1).min(2),
            '>' if brackets == 2 => {
                sections.push(&text[cut..pos - 1]);
                cut = pos - 1;
                brackets = 0;
            }
            _ => brackets = 0,
        }
    }
    sections.push(&text[cut..]);
    sections
}
