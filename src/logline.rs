// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Raw log line format
//
//   2024-01-01T12:34:56<TAB>1000eba0050000000a00...
//
// The timestamp is UTC without a zone suffix. The payload is the decrypted
// advertisement in lowercase hex with the nonce and key-check bytes zeroed.

use chrono::{DateTime, NaiveDateTime};

use crate::protocol::DecryptedPayload;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One replayed log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub time: i64,
    pub payload: DecryptedPayload,
}

pub fn format_timestamp(time: i64) -> String {
    DateTime::from_timestamp(time, 0)
        .map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| time.to_string())
}

/// Accepts the logged form, with or without a trailing `Z`, or unix seconds
/// within the range a calendar date can represent.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    if let Ok(time) = NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), TIME_FORMAT) {
        return Some(time.and_utc().timestamp());
    }
    let time = s.parse::<i64>().ok()?;
    DateTime::from_timestamp(time, 0).map(|_| time)
}

pub fn format_log_line(time: i64, payload: &DecryptedPayload) -> String {
    format!("{}\t{}", format_timestamp(time), payload.to_hex())
}

/// Parse one log line. Returns `None` for anything that is not a decoded record.
pub fn parse_log_line(line: &str) -> Option<LogLine> {
    // A crash mid-write can leave NUL padding in front of a line.
    let line = line.trim_start_matches('\0');
    let mut tokens = line.split_whitespace();
    let time = parse_timestamp(tokens.next()?)?;
    let bytes = hex::decode(tokens.next()?).ok()?;
    let payload = DecryptedPayload::from_logged(bytes).ok()?;
    Some(LogLine { time, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_704_067_200;

    #[test]
    fn test_format_log_line() {
        let payload = DecryptedPayload::from_logged(hex::decode("1000eba00500000001020304").unwrap())
            .unwrap();
        assert_eq!(
            format_log_line(MIDNIGHT + 3723, &payload),
            "2024-01-01T01:02:03\t1000eba00500000001020304"
        );
    }

    #[test]
    fn test_parse_log_line() {
        let line = parse_log_line("2024-01-01T01:02:03\t1000eba00500000001020304").unwrap();
        assert_eq!(line.time, MIDNIGHT + 3723);
        assert_eq!(line.payload.plaintext(), &[1, 2, 3, 4]);

        let line = parse_log_line("\0\02024-01-01T00:00:00Z 1000eba005000000ff").unwrap();
        assert_eq!(line.time, MIDNIGHT);

        let line = parse_log_line("1704067200\t1000eba005000000ff").unwrap();
        assert_eq!(line.time, MIDNIGHT);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_log_line(""), None);
        assert_eq!(parse_log_line("yesterday\t1000eba005000000ff"), None);
        assert_eq!(parse_log_line("2024-01-01T00:00:00\tnot-hex"), None);
        // still encrypted
        assert_eq!(parse_log_line("2024-01-01T00:00:00\t1000eba00535a2d9ff"), None);
    }

    #[test]
    fn test_parse_rejects_unrepresentable_times() {
        assert_eq!(parse_timestamp("-9223372036854775000"), None);
        assert_eq!(parse_timestamp("9223372036854775807"), None);
        assert_eq!(parse_log_line("-9223372036854775000\t1000eba005000000ff"), None);
        assert_eq!(parse_timestamp("253402300799"), Some(253_402_300_799));
    }
}
