//! Summaries of the OpenSCAP result reports produced by scanning pods.
//!
//! Reports are ARF documents; rule results live at
//! `reports/report/content/TestResult/rule-result/result`. Namespace prefixes
//! are ignored when matching element names.

use quick_xml::{events::Event, Reader};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Rule counts of a finished scan
#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub total_rules: u32,
    pub passed_rules: u32,
    pub failed_rules: u32,
}

const TEST_RESULT: &[u8] = b"TestResult";
const RULE_RESULT: &[u8] = b"rule-result";
const RESULT: &[u8] = b"result";

impl ScanResult {
    /// Count the rule results of a report.
    ///
    /// Every rule result counts towards the total; only `pass` and `fail`
    /// count as passed or failed.
    pub fn from_report(report: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(report);
        reader.trim_text(true);

        let mut summary = ScanResult::default();
        let mut path: Vec<Vec<u8>> = Vec::new();
        let mut seen_root = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    seen_root = true;
                    let name = e.local_name().as_ref().to_vec();
                    if name == RULE_RESULT && in_test_result(&path) {
                        summary.total_rules += 1;
                    }
                    path.push(name);
                }
                Event::Empty(e) => {
                    seen_root = true;
                    if e.local_name().as_ref() == RULE_RESULT && in_test_result(&path) {
                        summary.total_rules += 1;
                    }
                }
                Event::End(_) => {
                    path.pop();
                }
                Event::Text(text) => {
                    let in_result = path.len() >= 2
                        && path[path.len() - 1] == RESULT
                        && path[path.len() - 2] == RULE_RESULT;
                    if in_result && in_test_result(&path) {
                        match text.unescape()?.trim() {
                            "pass" => summary.passed_rules += 1,
                            "fail" => summary.failed_rules += 1,
                            _ => {}
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !seen_root {
            return Err(Error::InvalidReport("no root element".into()));
        }
        if !path.is_empty() {
            return Err(Error::InvalidReport("unterminated document".into()));
        }

        Ok(summary)
    }
}

fn in_test_result(path: &[Vec<u8>]) -> bool {
    path.iter().any(|p| p == TEST_RESULT)
}
