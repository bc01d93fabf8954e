//! Streaming encoder from rows to the XML data format.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::{debug, warn};

use super::text::{
    cdata_sections, classify_column, is_attribute_text, is_table_tag, needs_base64,
    ColumnPlacement, BASE64_ATTR, COLUMN_ELEMENT, COLUMN_NAME, COLUMN_VALUE, ROOT_ELEMENT,
    TABLE_ELEMENT, TABLE_NAME,
};
use crate::core::{ConverterRegistry, Row, Schema};
use crate::error::{Result, RowportError};

/// Writes rows as a data document.
///
/// Call [`start`](Self::start) once, [`write_row`](Self::write_row) per row,
/// then [`end`](Self::end).
pub struct DataWriter<W: Write> {
    writer: Writer<W>,
    schema: Arc<Schema>,
    converters: ConverterRegistry,
    rows_written: u64,
}

/// A row child element waiting to be written after the row's attributes.
enum Child<'a> {
    TableName(&'a str),
    Element { name: &'a str, text: String },
    NamedColumn { name: &'a str, text: String },
    EncodedColumn { name: &'a str, text: String },
}

impl DataWriter<BufWriter<File>> {
    /// Create a writer for a new file, replacing any existing one.
    pub fn create<P: AsRef<Path>>(path: P, schema: Arc<Schema>, pretty: bool) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), schema, pretty))
    }
}

impl<W: Write> DataWriter<W> {
    /// Create a writer. `pretty` indents elements by two spaces.
    pub fn new(output: W, schema: Arc<Schema>, pretty: bool) -> Self {
        let writer = if pretty {
            Writer::new_with_indent(output, b' ', 2)
        } else {
            Writer::new(output)
        };
        Self {
            writer,
            schema,
            converters: ConverterRegistry::default(),
            rows_written: 0,
        }
    }

    /// Use custom value converters.
    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Number of rows written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Write the XML declaration and open the root element.
    pub fn start(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.writer
            .write_event(Event::Start(BytesStart::new(ROOT_ELEMENT)))?;
        Ok(())
    }

    /// Close the root element and flush the output.
    pub fn end(&mut self) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))?;
        self.writer.get_mut().write_all(b"\n")?;
        self.writer.get_mut().flush()?;
        debug!("Wrote {} rows", self.rows_written);
        Ok(())
    }

    /// Consume the writer, returning the underlying output.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    /// Write one row. Null values are omitted.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let table = schema.find_table(&row.table, true).ok_or_else(|| {
            RowportError::Schema(format!("cannot write row of unknown table {}", row.table))
        })?;

        for name in row.values.keys() {
            if table.find_column(name, true).is_none() {
                warn!("Not writing unknown column {}.{}", table.name, name);
            }
        }

        let tag = if is_table_tag(&table.name) {
            table.name.as_str()
        } else {
            TABLE_ELEMENT
        };
        let mut start = BytesStart::new(tag);
        let mut children = Vec::new();

        if tag == TABLE_ELEMENT {
            if is_attribute_text(&table.name) {
                start.push_attribute((TABLE_NAME, table.name.as_str()));
            } else {
                children.push(Child::TableName(&table.name));
            }
        }

        for column in &table.columns {
            let Some(value) = row.get(&column.name) else {
                continue;
            };
            let Some(text) = self.converters.to_text(table, column, value)? else {
                continue;
            };
            let name = column.name.as_str();
            match classify_column(name, &text) {
                ColumnPlacement::Attribute => start.push_attribute((name, text.as_str())),
                ColumnPlacement::Element => children.push(Child::Element { name, text }),
                ColumnPlacement::NamedColumn => children.push(Child::NamedColumn { name, text }),
                ColumnPlacement::EncodedColumn => {
                    children.push(Child::EncodedColumn { name, text })
                }
            }
        }

        if children.is_empty() {
            self.writer.write_event(Event::Empty(start))?;
        } else {
            self.writer.write_event(Event::Start(start))?;
            for child in children {
                self.write_child(child)?;
            }
            self.writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }

        self.rows_written += 1;
        Ok(())
    }

    fn write_child(&mut self, child: Child<'_>) -> Result<()> {
        match child {
            Child::TableName(name) => self.write_text_element(TABLE_NAME, None, name),
            Child::Element { name, text } => self.write_text_element(name, None, &text),
            Child::NamedColumn { name, text } => {
                self.write_text_element(COLUMN_ELEMENT, Some((COLUMN_NAME, name)), &text)
            }
            Child::EncodedColumn { name, text } => {
                self.writer
                    .write_event(Event::Start(BytesStart::new(COLUMN_ELEMENT)))?;
                self.write_text_element(COLUMN_NAME, None, name)?;
                self.write_text_element(COLUMN_VALUE, None, &text)?;
                self.writer
                    .write_event(Event::End(BytesEnd::new(COLUMN_ELEMENT)))?;
                Ok(())
            }
        }
    }

    /// Write `<name attr>body</name>`, with the body kept on one line.
    fn write_text_element(
        &mut self,
        name: &str,
        attribute: Option<(&str, &str)>,
        text: &str,
    ) -> Result<()> {
        let mut start = BytesStart::new(name);
        if let Some(attr) = attribute {
            start.push_attribute(attr);
        }
        let encode = needs_base64(text);
        if encode {
            start.push_attribute((BASE64_ATTR, "true"));
        }
        self.writer.write_event(Event::Start(start))?;
        if encode {
            let encoded = BASE64.encode(text.as_bytes());
            self.writer
                .write_event(Event::Text(BytesText::new(&encoded)))?;
        } else {
            for section in cdata_sections(text) {
                self.writer
                    .write_event(Event::CData(BytesCData::new(section)))?;
            }
        }
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }
}
