//! # Sensor Protocol
//!
//! Request and response format of the battery sensor link.
//!
//! The host sends the ASCII command `get_data`. The sensor answers with a text
//! block whose first line starts with `<get_data` and whose second line holds
//! three `label:value` fields separated by `;`, in the order temperature,
//! voltage, current:
//!
//! ```text
//! <get_data>
//! t:21.50;v:12.64;c:-3.20
//! ```

use chrono::{DateTime, Utc};

use crate::error::{MonitorError, Result};
use crate::telemetry::RawSample;

/// Command that asks a sensor for one reading
pub const GET_DATA_REQUEST: &[u8] = b"get_data";

/// Prefix every valid response starts with
pub const GET_DATA_RESPONSE_PREFIX: &str = "<get_data";

/// Largest response read from the link
pub const MAX_RESPONSE_SIZE: usize = 1024;

/// Number of fields on the data line
const FIELD_COUNT: usize = 3;

/// Decode a sensor response into a sample stamped with `timestamp`
///
/// # Errors
///
/// Returns [`MonitorError::MalformedResponse`] if:
/// - The response does not start with `<get_data`
/// - The data line is missing or does not have exactly three fields
/// - A field has no `:` separator or its value is not a finite number
pub fn decode_response(response: &[u8], timestamp: DateTime<Utc>) -> Result<RawSample> {
    let text = std::str::from_utf8(response)
        .map_err(|e| MonitorError::MalformedResponse(format!("not UTF-8: {}", e)))?;

    if !text.starts_with(GET_DATA_RESPONSE_PREFIX) {
        return Err(MonitorError::MalformedResponse(format!(
            "unexpected response: {}",
            escape(text)
        )));
    }

    let data_line = text
        .split('\n')
        .nth(1)
        .map(|line| line.trim_end_matches('\r'))
        .ok_or_else(|| MonitorError::MalformedResponse("missing data line".to_string()))?;

    let values = data_line
        .split(';')
        .map(parse_field)
        .collect::<Result<Vec<f64>>>()?;

    if values.len() != FIELD_COUNT {
        return Err(MonitorError::MalformedResponse(format!(
            "expected {} fields, got {}: {}",
            FIELD_COUNT,
            values.len(),
            escape(data_line)
        )));
    }

    Ok(RawSample {
        timestamp,
        temperature: values[0],
        voltage: values[1],
        current: values[2],
    })
}

fn parse_field(field: &str) -> Result<f64> {
    let (_, value) = field
        .split_once(':')
        .ok_or_else(|| MonitorError::MalformedResponse(format!("field without ':': {}", escape(field))))?;

    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| MonitorError::MalformedResponse(format!("not a number: {}", escape(field))))?;

    if !value.is_finite() {
        return Err(MonitorError::MalformedResponse(format!("not finite: {}", escape(field))));
    }
    Ok(value)
}

/// Make line breaks visible in log output
pub fn escape(text: &str) -> String {
    text.replace('\n', "\\n").replace('\r', "\\r")
}
