//! Streaming decoder from the XML data format to rows.
//!
//! The document is read in one forward pass. Only the row currently being
//! decoded is held in memory, so data files of any size can be loaded.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use super::text::{BASE64_ATTR, COLUMN_ELEMENT, COLUMN_NAME, COLUMN_VALUE, TABLE_ELEMENT, TABLE_NAME};
use crate::core::{ConverterRegistry, DataSink, Row, Schema, Table};
use crate::error::{Result, RowportError};

/// Reads rows from a data document.
///
/// Usable as an iterator of `Result<Row>` or, through
/// [`read_into`](Self::read_into), as the source feeding a [`DataSink`].
pub struct DataReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    schema: Arc<Schema>,
    converters: ConverterRegistry,
    case_sensitive: bool,
    state: ReadState,
    rows_read: u64,
    rows_skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    BeforeRoot,
    InRoot,
    Done,
}

/// Owned copy of a start tag, so the event buffer can be reused while
/// the element's content is read.
#[derive(Debug)]
struct ElementHead {
    name: String,
    attributes: Vec<(String, String)>,
    empty: bool,
}

impl ElementHead {
    fn read(start: &BytesStart<'_>, empty: bool) -> Result<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            empty,
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn is_base64(&self) -> bool {
        self.attr(BASE64_ATTR) == Some("true")
    }
}

/// One parsed event, detached from the read buffer.
enum Step {
    Open(ElementHead),
    Close,
    Text(String),
    Eof,
    Other,
}

/// A row element as written, before names are resolved against the schema.
#[derive(Debug, Default)]
struct RawRow {
    table_name: Option<String>,
    columns: Vec<(String, String)>,
}

impl DataReader<BufReader<File>> {
    /// Open a data file.
    pub fn open<P: AsRef<Path>>(path: P, schema: Arc<Schema>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), schema))
    }
}

impl<R: BufRead> DataReader<R> {
    /// Create a reader over any buffered input.
    pub fn new(input: R, schema: Arc<Schema>) -> Self {
        Self {
            reader: Reader::from_reader(input),
            buf: Vec::new(),
            schema,
            converters: ConverterRegistry::default(),
            case_sensitive: false,
            state: ReadState::BeforeRoot,
            rows_read: 0,
            rows_skipped: 0,
        }
    }

    /// Match table and column names case-sensitively.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Use custom value converters.
    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Rows decoded so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Row elements skipped because their table is unknown.
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }

    /// Decode every remaining row into a sink, bracketed by `start`/`end`.
    ///
    /// Returns the number of rows handed to the sink.
    pub async fn read_into<S: DataSink + ?Sized>(&mut self, sink: &mut S) -> Result<u64> {
        sink.start().await?;
        let mut count = 0u64;
        while let Some(row) = self.next_row()? {
            sink.add_row(row).await?;
            count += 1;
        }
        sink.end().await?;
        Ok(count)
    }

    /// Decode the next row, or `None` once the root element is closed.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            match self.state {
                ReadState::Done => return Ok(None),
                ReadState::BeforeRoot => match self.next_step()? {
                    Step::Open(root) => {
                        debug!("Reading data document with root <{}>", root.name);
                        self.state = if root.empty {
                            ReadState::Done
                        } else {
                            ReadState::InRoot
                        };
                    }
                    Step::Text(text) if !text.trim().is_empty() => {
                        return Err(RowportError::Format(
                            "text content before the root element".into(),
                        ));
                    }
                    Step::Close => {
                        return Err(RowportError::Format(
                            "end tag before the root element".into(),
                        ));
                    }
                    Step::Eof => {
                        return Err(RowportError::Format("document has no root element".into()));
                    }
                    _ => {}
                },
                ReadState::InRoot => match self.next_step()? {
                    Step::Open(head) => {
                        if let Some(row) = self.read_row(head)? {
                            self.rows_read += 1;
                            return Ok(Some(row));
                        }
                        self.rows_skipped += 1;
                    }
                    Step::Close => self.state = ReadState::Done,
                    Step::Eof => {
                        return Err(RowportError::Format(
                            "unexpected end of document inside the root element".into(),
                        ));
                    }
                    _ => {}
                },
            }
        }
    }

    fn next_step(&mut self) -> Result<Step> {
        self.buf.clear();
        let step = match self.reader.read_event_into(&mut self.buf)? {
            Event::Start(e) => Step::Open(ElementHead::read(&e, false)?),
            Event::Empty(e) => Step::Open(ElementHead::read(&e, true)?),
            Event::End(_) => Step::Close,
            Event::Text(e) => Step::Text(e.unescape()?.into_owned()),
            Event::CData(e) => Step::Text(String::from_utf8(e.into_inner().into_owned()).map_err(
                |_| RowportError::Format("CDATA section is not valid UTF-8".into()),
            )?),
            Event::Eof => Step::Eof,
            _ => Step::Other,
        };
        Ok(step)
    }

    /// Consume the rest of an element whose start tag was already read.
    fn skip_element(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_step()? {
                Step::Open(head) if !head.empty => depth += 1,
                Step::Close => depth -= 1,
                Step::Eof => {
                    return Err(RowportError::Format(
                        "unexpected end of document while skipping an element".into(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn read_row(&mut self, head: ElementHead) -> Result<Option<Row>> {
        let generic = head.name == TABLE_ELEMENT;
        let mut raw = RawRow::default();
        if !generic {
            raw.table_name = Some(head.name.clone());
        }
        for (key, value) in &head.attributes {
            if generic && key == TABLE_NAME {
                raw.table_name = Some(value.clone());
            } else {
                raw.columns.push((key.clone(), value.clone()));
            }
        }

        // Skip unknown tables without decoding their content.
        if let Some(name) = &raw.table_name {
            if self.find_table(name).is_none() {
                warn!("Skipping row of unknown table {}", name);
                if !head.empty {
                    self.skip_element()?;
                }
                return Ok(None);
            }
        }

        if !head.empty {
            loop {
                match self.next_step()? {
                    Step::Open(child) if generic && child.name == TABLE_NAME => {
                        raw.table_name = Some(self.read_body(&child)?);
                    }
                    Step::Open(child) if child.name == COLUMN_ELEMENT => {
                        if let Some(column) = self.read_generic_column(&child)? {
                            raw.columns.push(column);
                        }
                    }
                    Step::Open(child) => {
                        let value = self.read_body(&child)?;
                        raw.columns.push((child.name, value));
                    }
                    Step::Close => break,
                    Step::Eof => {
                        return Err(RowportError::Format(format!(
                            "unexpected end of document inside <{}>",
                            head.name
                        )));
                    }
                    _ => {}
                }
            }
        }

        self.resolve(raw)
    }

    /// Read `<column>` in either its `column-name` attribute or sub-element form.
    fn read_generic_column(&mut self, head: &ElementHead) -> Result<Option<(String, String)>> {
        let mut name = head.attr(COLUMN_NAME).map(str::to_string);
        let mut value = None;
        let mut direct = String::new();

        if !head.empty {
            loop {
                match self.next_step()? {
                    Step::Open(child) if child.name == COLUMN_NAME => {
                        name = Some(self.read_body(&child)?);
                    }
                    Step::Open(child) if child.name == COLUMN_VALUE => {
                        value = Some(self.read_body(&child)?);
                    }
                    Step::Open(child) => {
                        warn!("Ignoring unexpected <{}> inside <column>", child.name);
                        if !child.empty {
                            self.skip_element()?;
                        }
                    }
                    Step::Text(text) => direct.push_str(&text),
                    Step::Close => break,
                    Step::Eof => {
                        return Err(RowportError::Format(
                            "unexpected end of document inside <column>".into(),
                        ));
                    }
                    Step::Other => {}
                }
            }
        }

        let value = match value {
            Some(v) => v,
            None if head.is_base64() => decode_base64_text(&direct)?,
            None => direct,
        };

        match name {
            Some(name) => Ok(Some((name, value))),
            None => {
                warn!("Ignoring <column> element without a column name");
                Ok(None)
            }
        }
    }

    /// Read the text body of a leaf element, decoding base64 when marked.
    fn read_body(&mut self, head: &ElementHead) -> Result<String> {
        let mut text = String::new();
        if !head.empty {
            loop {
                match self.next_step()? {
                    Step::Text(t) => text.push_str(&t),
                    Step::Open(nested) => {
                        warn!(
                            "Ignoring unexpected <{}> inside <{}>",
                            nested.name, head.name
                        );
                        if !nested.empty {
                            self.skip_element()?;
                        }
                    }
                    Step::Close => break,
                    Step::Eof => {
                        return Err(RowportError::Format(format!(
                            "unexpected end of document inside <{}>",
                            head.name
                        )));
                    }
                    Step::Other => {}
                }
            }
        }
        if head.is_base64() {
            decode_base64_text(&text)
        } else {
            Ok(text)
        }
    }

    fn find_table(&self, name: &str) -> Option<&Table> {
        self.schema.find_table(name, self.case_sensitive)
    }

    fn resolve(&self, raw: RawRow) -> Result<Option<Row>> {
        let Some(name) = raw.table_name else {
            warn!("Skipping <table> element without a table name");
            return Ok(None);
        };
        let Some(table) = self.find_table(&name) else {
            warn!("Skipping row of unknown table {}", name);
            return Ok(None);
        };

        let mut row = Row::new(table.name.clone());
        for (column_name, text) in raw.columns {
            match table.find_column(&column_name, self.case_sensitive) {
                Some(column) => {
                    let value = self.converters.from_text(table, column, &text)?;
                    row.values.insert(column.name.clone(), value);
                }
                None => warn!(
                    "Ignoring unknown column {} of table {}",
                    column_name, table.name
                ),
            }
        }
        Ok(Some(row))
    }
}

fn decode_base64_text(text: &str) -> Result<String> {
    let bytes = BASE64.decode(text.trim())?;
    String::from_utf8(bytes)
        .map_err(|_| RowportError::Format("base64 body does not decode to UTF-8 text".into()))
}

impl<R: BufRead> Iterator for DataReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next_row();
        if next.is_err() {
            self.state = ReadState::Done;
        }
        next.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataWriter;
    use crate::core::{Column, ForeignKey, Value};
    use async_trait::async_trait;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Table {
                name: "author".into(),
                columns: vec![
                    Column::new("id", "integer"),
                    Column::new("name", "varchar"),
                    Column::new("bio", "text"),
                ],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            },
            Table {
                name: "book".into(),
                columns: vec![
                    Column::new("id", "integer"),
                    Column::new("author_id", "integer"),
                    Column::new("title", "varchar"),
                ],
                primary_key: vec!["id".into()],
                foreign_keys: vec![ForeignKey::new(&["author_id"], "author", &["id"])],
            },
            Table {
                name: "odd table".into(),
                columns: vec![
                    Column::new("first name", "text"),
                    Column::new("table-name", "text"),
                    Column::new("column", "text"),
                    Column::new("weird\u{2}col", "text"),
                    Column::new(&"c".repeat(300), "text"),
                ],
                primary_key: vec![],
                foreign_keys: vec![],
            },
        ]))
    }

    fn read_all(xml: &str) -> Result<Vec<Row>> {
        DataReader::new(xml.as_bytes(), schema()).collect()
    }

    fn round_trip(rows: &[Row], pretty: bool) -> Vec<Row> {
        let mut w = DataWriter::new(Vec::new(), schema(), pretty);
        w.start().unwrap();
        for row in rows {
            w.write_row(row).unwrap();
        }
        w.end().unwrap();
        let bytes = w.into_inner();
        DataReader::new(bytes.as_slice(), schema())
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_reads_attributes_and_elements() {
        let rows = read_all(
            r#"<?xml version="1.0"?>
<data>
  <author id="1" name="Frank &amp; co"><bio><![CDATA[a]]]><![CDATA[]>b]]></bio></author>
  <book id="10" author_id="1" title="Dune"/>
</data>"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].table, "author");
        assert_eq!(rows[0].get("name"), Some(&Value::from("Frank & co")));
        assert_eq!(rows[0].get("bio"), Some(&Value::from("a]]>b")));
        assert_eq!(rows[1].get("author_id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_round_trip_awkward_values() {
        let long = "L".repeat(400);
        let rows = vec![
            Row::new("author")
                .with("id", 1)
                .with("name", "plain ascii")
                .with("bio", long.as_str()),
            Row::new("author")
                .with("id", 2)
                .with("name", "x]]>y]]]]>z")
                .with("bio", "tab\tand\nnewlines"),
            Row::new("author")
                .with("id", 3)
                .with("name", "bell\u{7}and\u{0}null")
                .with("bio", ""),
        ];
        assert_eq!(round_trip(&rows, false), rows);
        assert_eq!(round_trip(&rows, true), rows);
    }

    #[test]
    fn test_round_trip_cdata_terminator_in_element_text() {
        let long = format!("{}]]>{}", "a".repeat(300), "b".repeat(300));
        let rows = vec![
            Row::new("author")
                .with("id", 1)
                .with("bio", "x]]>y\n]]]]>z]]>"),
            Row::new("author").with("id", 2).with("bio", long.as_str()),
        ];

        let mut w = DataWriter::new(Vec::new(), schema(), false);
        w.start().unwrap();
        for row in &rows {
            w.write_row(row).unwrap();
        }
        w.end().unwrap();
        let xml = String::from_utf8(w.into_inner()).unwrap();
        assert!(xml.contains("<bio><![CDATA[x]]]><![CDATA[]>y"), "{}", xml);
        assert!(!xml.contains("bio=\""), "{}", xml);

        assert_eq!(read_all(&xml).unwrap(), rows);
        assert_eq!(round_trip(&rows, true), rows);
    }

    #[test]
    fn test_round_trip_generic_names() {
        let rows = vec![Row::new("odd table")
            .with("first name", "Ann")
            .with("table-name", "value of a reserved column")
            .with("column", "multi\nline")
            .with("weird\u{2}col", "v")
            .with("c".repeat(300), "long name\u{1}")];
        assert_eq!(round_trip(&rows, false), rows);
        assert_eq!(round_trip(&rows, true), rows);
    }

    #[test]
    fn test_unknown_table_and_column_are_skipped() {
        let mut reader = DataReader::new(
            r#"<data>
  <publisher id="1"><name><![CDATA[ignored]]></name><nested><deep/></nested></publisher>
  <author id="2" shoe_size="44"/>
</data>"#
                .as_bytes(),
            schema(),
        );
        let rows: Vec<Row> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values.len(), 1);
        assert_eq!(reader.rows_read(), 1);
        assert_eq!(reader.rows_skipped(), 1);
    }

    #[test]
    fn test_namespace_prefix_and_case_insensitive_names() {
        let rows = read_all(r#"<d:data xmlns:d="urn:x"><d:AUTHOR ID="4" d:Name="n"/></d:data>"#)
            .unwrap();
        assert_eq!(rows[0].table, "author");
        assert_eq!(rows[0].get("id"), Some(&Value::Int(4)));
        assert_eq!(rows[0].get("name"), Some(&Value::from("n")));
    }

    #[test]
    fn test_case_sensitive_matching() {
        let rows: Vec<Row> = DataReader::new(r#"<data><AUTHOR id="1"/></data>"#.as_bytes(), schema())
            .case_sensitive(true)
            .collect::<Result<_>>()
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_generic_table_name_element() {
        let rows = read_all(
            r#"<data><table><table-name base64="true">b2RkIHRhYmxl</table-name><column column-name="first name">Bo</column></table></data>"#,
        )
        .unwrap();
        assert_eq!(rows[0].table, "odd table");
        assert_eq!(rows[0].get("first name"), Some(&Value::from("Bo")));
    }

    #[test]
    fn test_conversion_failure_is_fatal() {
        let err = read_all(r#"<data><author id="one"/></data>"#).unwrap_err();
        assert!(matches!(err, RowportError::Conversion { .. }));
    }

    #[test]
    fn test_malformed_markup_is_fatal() {
        assert!(read_all("<data><author id=\"1\"></book></data>").is_err());
        assert!(read_all("<data><author id=\"1\"/>").is_err());
        assert!(read_all("").is_err());
        assert!(read_all("<data><author><bio base64=\"true\">!!!</bio></author></data>").is_err());
    }

    #[test]
    fn test_empty_root() {
        assert!(read_all("<data/>").unwrap().is_empty());
        assert!(read_all("<?xml version=\"1.0\"?>\n<!-- none -->\n<data>\n</data>")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let mut reader = DataReader::new(r#"<data><author id="x"/><author id="1"/></data>"#.as_bytes(), schema());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[derive(Default)]
    struct Collect {
        events: Vec<String>,
    }

    #[async_trait]
    impl DataSink for Collect {
        async fn start(&mut self) -> Result<()> {
            self.events.push("start".into());
            Ok(())
        }

        async fn add_row(&mut self, row: Row) -> Result<()> {
            self.events.push(row.table);
            Ok(())
        }

        async fn end(&mut self) -> Result<()> {
            self.events.push("end".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_into_sink() {
        let mut sink = Collect::default();
        let mut reader = DataReader::new(
            r#"<data><book id="1"/><author id="1"/></data>"#.as_bytes(),
            schema(),
        );
        let count = reader.read_into(&mut sink).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(sink.events, vec!["start", "book", "author", "end"]);
    }
}
