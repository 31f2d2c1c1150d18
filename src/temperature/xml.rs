//! Strict parsing of the camera's temperature XML
//!
//! Elements are matched by local name so any namespace prefix is accepted.
//! Every field of interest must appear at most once; anything malformed is
//! an error rather than a partial result.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{DotReading, Result, RoiStats, TemperatureError};

/// Camera temperatures are hundredths of a degree Celsius.
const TEMPERATURE_SCALE: f64 = 100.0;

const ROI_FIELDS: [(&str, &str); 3] = [("minTemper", "min"), ("maxTemper", "max"), ("avgTemper", "avg")];

/// Text of every element selected by `select`, keyed by field name.
///
/// `select` sees the local-name path of the element being closed and
/// returns the field it feeds, if any.
fn collect_fields(
    xml: &str,
    select: impl Fn(&[String]) -> Option<&'static str>,
) -> Result<HashMap<&'static str, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut text: Vec<String> = Vec::new();
    let mut fields = HashMap::new();
    let mut saw_root = false;

    let mut record = |path: &[String], value: String| -> Result<()> {
        if let Some(field) = select(path) {
            if fields.insert(field, value).is_some() {
                return Err(TemperatureError::Duplicate(field));
            }
        }
        Ok(())
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if path.is_empty() && saw_root {
                    return Err(TemperatureError::Malformed("multiple root elements".into()));
                }
                saw_root = true;
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                text.push(String::new());
            }
            Ok(Event::Empty(e)) => {
                if path.is_empty() && saw_root {
                    return Err(TemperatureError::Malformed("multiple root elements".into()));
                }
                saw_root = true;
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                record(&path, String::new())?;
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let Some(current) = text.last_mut() else {
                    return Err(TemperatureError::Malformed("text outside the root element".into()));
                };
                let unescaped = t.unescape().map_err(|e| TemperatureError::Malformed(e.to_string()))?;
                current.push_str(&unescaped);
            }
            Ok(Event::CData(c)) => {
                if let Some(current) = text.last_mut() {
                    current.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(_)) => {
                let value = text.pop().unwrap_or_default();
                record(&path, value)?;
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(TemperatureError::Malformed(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if !path.is_empty() {
        return Err(TemperatureError::Malformed(format!("unclosed <{}>", path.join("><"))));
    }
    if !saw_root {
        return Err(TemperatureError::Malformed("no root element".into()));
    }
    Ok(fields)
}

fn parse_celsius(field: &'static str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v / TEMPERATURE_SCALE)
        .ok_or_else(|| TemperatureError::InvalidValue {
            field,
            value: raw.to_string(),
        })
}

fn parse_coordinate(field: &'static str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| TemperatureError::InvalidValue {
        field,
        value: raw.to_string(),
    })
}

/// Parse a `GetDotTemperature` answer: `temperature`, `hotX` and `hotY`
/// must each appear exactly once.
pub fn parse_dot_response(xml: &str) -> Result<DotReading> {
    let fields = collect_fields(xml, |path| match path.last().map(String::as_str) {
        Some("temperature") => Some("temperature"),
        Some("hotX") => Some("hotX"),
        Some("hotY") => Some("hotY"),
        _ => None,
    })?;

    let get = |field: &'static str| fields.get(field).ok_or(TemperatureError::Missing(field));
    Ok(DotReading {
        temperature_c: parse_celsius("temperature", get("temperature")?)?,
        x: parse_coordinate("hotX", get("hotX")?)?,
        y: parse_coordinate("hotY", get("hotY")?)?,
    })
}

/// Parse a `GetTemperatureCurrentInfo` answer. Each of min/max/avg is
/// optional but at least one must be present.
pub fn parse_roi_response(xml: &str) -> Result<RoiStats> {
    let fields = collect_fields(xml, |path| {
        let [.., parent, leaf] = path else {
            return None;
        };
        if leaf != "value" {
            return None;
        }
        ROI_FIELDS
            .iter()
            .find(|(element, _)| element == parent)
            .map(|(_, field)| *field)
    })?;

    let read = |field: &'static str| fields.get(field).map(|raw| parse_celsius(field, raw)).transpose();
    let stats = RoiStats {
        min: read("min")?,
        max: read("max")?,
        avg: read("avg")?,
    };
    if stats.min.is_none() && stats.max.is_none() && stats.avg.is_none() {
        return Err(TemperatureError::NoReadings);
    }
    Ok(stats)
}
