//! Streaming parsers for the daily dump XML
//!
//! Both dumps are hundreds of megabytes uncompressed, so they are read event
//! by event from any `BufRead` and only the fields the engine needs are kept.
//!
//! ```text
//! <REGIONS>                          <NATIONS>
//!   <REGION>                           <NATION>
//!     <NAME>Lazarus</NAME>               <NAME>Testlandia</NAME>
//!     <NATIONS>a:b:c</NATIONS>           <REGION>Testregionia</REGION>
//!     ...                                ...
//! ```

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::utils::error::DumpError;
use crate::utils::to_id;

/// One region from the regions dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Canonical id
    pub id: String,
    /// Display name as published
    pub name: String,
    /// Member ids in dump order
    pub nations: Vec<String>,
}

/// One nation from the nations dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpNation {
    /// Canonical id
    pub name: String,
    /// Canonical id of the region it resides in
    pub region: String,
}

/// Element path tracker shared by both parsers
#[derive(Default)]
struct Path {
    stack: Vec<Vec<u8>>,
}

impl Path {
    fn push(&mut self, name: &[u8]) {
        self.stack.push(name.to_vec());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    /// Whether the current path is exactly `expected`
    fn is(&self, expected: &[&[u8]]) -> bool {
        self.stack.len() == expected.len()
            && self
                .stack
                .iter()
                .zip(expected)
                .all(|(have, want)| have.as_slice() == *want)
    }
}

fn split_members(list: &str) -> Vec<String> {
    list.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(to_id)
        .collect()
}

/// Parse a regions dump
pub fn parse_regions<R: BufRead>(input: R) -> Result<Vec<Region>, DumpError> {
    const REGION: &[&[u8]] = &[b"REGIONS", b"REGION"];
    const NAME: &[&[u8]] = &[b"REGIONS", b"REGION", b"NAME"];
    const MEMBERS: &[&[u8]] = &[b"REGIONS", b"REGION", b"NATIONS"];

    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path = Path::default();
    let mut regions = Vec::new();
    let mut name = String::new();
    let mut members = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                path.push(e.name().as_ref());
                if path.is(REGION) {
                    name.clear();
                    members.clear();
                }
            }
            Event::End(_) => {
                if path.is(REGION) && !name.is_empty() {
                    regions.push(Region {
                        id: to_id(&name),
                        name: std::mem::take(&mut name),
                        nations: split_members(&members),
                    });
                }
                path.pop();
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                if path.is(NAME) {
                    name.push_str(&text);
                } else if path.is(MEMBERS) {
                    members.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !path.stack.is_empty() {
        return Err(DumpError::Parse("regions dump ended inside an element".into()));
    }

    Ok(regions)
}

/// Parse a nations dump
pub fn parse_nations<R: BufRead>(input: R) -> Result<Vec<DumpNation>, DumpError> {
    const NATION: &[&[u8]] = &[b"NATIONS", b"NATION"];
    const NAME: &[&[u8]] = &[b"NATIONS", b"NATION", b"NAME"];
    const REGION: &[&[u8]] = &[b"NATIONS", b"NATION", b"REGION"];

    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path = Path::default();
    let mut nations = Vec::new();
    let mut name = String::new();
    let mut region = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                path.push(e.name().as_ref());
                if path.is(NATION) {
                    name.clear();
                    region.clear();
                }
            }
            Event::End(_) => {
                if path.is(NATION) && !name.is_empty() {
                    nations.push(DumpNation {
                        name: to_id(&name),
                        region: to_id(&region),
                    });
                }
                path.pop();
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                if path.is(NAME) {
                    name.push_str(&text);
                } else if path.is(REGION) {
                    region.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !path.stack.is_empty() {
        return Err(DumpError::Parse("nations dump ended inside an element".into()));
    }

    Ok(nations)
}
