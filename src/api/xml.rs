//! XML payload extraction for NationStates API responses
//!
//! Classification rules:
//! - a body that is not XML at all is the API talking back in plain text,
//!   so it is an application failure;
//! - XML that breaks mid-document is a transport failure (`Malformed`);
//! - well-formed XML carrying `<ERROR>` or lacking the expected element is
//!   an application failure.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::utils::error::ApiError;
use crate::utils::{to_id, truncate_text};

/// Longest body excerpt carried in an error message
const EXCERPT_CHARS: usize = 200;

/// Marker in the sendTG response body when the telegram was accepted
const QUEUED_MARKER: &str = "queued";

fn malformed(err: impl std::fmt::Display) -> ApiError {
    ApiError::Malformed(err.to_string())
}

/// Text content of the first element named `tag`, if any
pub fn element_text(body: &str, tag: &str) -> Result<Option<String>, ApiError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let tag = tag.as_bytes();

    let mut captured: Option<String> = None;
    let mut nested = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if captured.is_some() {
                    nested += 1;
                } else if e.name().as_ref() == tag {
                    captured = Some(String::new());
                }
            }
            Ok(Event::Empty(e)) if captured.is_none() && e.name().as_ref() == tag => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Text(text)) => {
                if let Some(buf) = captured.as_mut() {
                    buf.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(buf) = captured.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(_)) => {
                if captured.is_some() {
                    if nested == 0 {
                        return Ok(captured);
                    }
                    nested -= 1;
                }
            }
            Ok(Event::Eof) => {
                return match captured {
                    Some(_) => Err(malformed("document ended inside an element")),
                    None => Ok(None),
                };
            }
            Ok(_) => {}
            Err(e) => {
                return Err(ApiError::Malformed(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }
}

/// Extract the text of `tag`, classifying everything else as an error
pub fn payload(body: &str, tag: &str) -> Result<String, ApiError> {
    if !body.trim_start().starts_with('<') {
        return Err(ApiError::Application(truncate_text(
            body.trim(),
            EXCERPT_CHARS,
        )));
    }

    if let Some(error) = element_text(body, "ERROR")? {
        return Err(ApiError::Application(error));
    }

    element_text(body, tag)?
        .ok_or_else(|| ApiError::Application(format!("response has no <{tag}> element")))
}

fn split_ids(list: &str, separator: char) -> Vec<String> {
    list.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(to_id)
        .collect()
}

/// `<NEWNATIONS>a,b,c</NEWNATIONS>`
pub fn parse_new_nations(body: &str) -> Result<Vec<String>, ApiError> {
    payload(body, "NEWNATIONS").map(|list| split_ids(&list, ','))
}

/// `<NATIONS>a:b:c</NATIONS>`
pub fn parse_region_nations(body: &str) -> Result<Vec<String>, ApiError> {
    payload(body, "NATIONS").map(|list| split_ids(&list, ':'))
}

/// `<TGCANRECRUIT>1</TGCANRECRUIT>`
pub fn parse_can_recruit(body: &str) -> Result<bool, ApiError> {
    payload(body, "TGCANRECRUIT").map(|flag| flag.trim() == "1")
}

/// The sendTG endpoint answers in plain text
pub fn check_send_queued(body: &str) -> Result<(), ApiError> {
    if body.contains(QUEUED_MARKER) {
        Ok(())
    } else {
        Err(ApiError::Application(truncate_text(
            body.trim(),
            EXCERPT_CHARS,
        )))
    }
}

/// Public nation details used by the `check` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NationInfo {
    pub name: String,
    pub region: Option<String>,
    pub founded: Option<String>,
    pub last_activity: Option<String>,
}

/// Response of `q=name+region+founded+lastactivity`
pub fn parse_nation_info(body: &str) -> Result<NationInfo, ApiError> {
    let name = payload(body, "NAME")?;
    Ok(NationInfo {
        name,
        region: element_text(body, "REGION")?,
        founded: element_text(body, "FOUNDED")?,
        last_activity: element_text(body, "LASTACTIVITY")?,
    })
}
