use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use http::{HeaderMap, Response};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    status: u16,
    reason: &'a str,
    headers: BTreeMap<&'a str, Vec<String>>,
    body_size: usize,
    body: String,
    timestamp: String,
}

pub fn print_response(response: &Response<Vec<u8>>, format: OutputFormat) {
    let status = response.status();
    let body = response.body();

    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or(""),
                headers: header_lists(response.headers()),
                body_size: body.len(),
                body: payload_preview(body),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["status".to_string(), status.to_string()]);
            for (name, values) in header_lists(response.headers()) {
                table.add_row(vec![name.to_string(), values.join(", ")]);
            }
            table.add_row(vec!["body".to_string(), payload_preview(body)]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{status}");
            for (name, values) in header_lists(response.headers()) {
                for value in values {
                    println!("{name}: {value}");
                }
            }
            println!();
            println!("{}", payload_preview(body));
        }
        OutputFormat::Raw => print_raw(body),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn header_lists(headers: &HeaderMap) -> BTreeMap<&str, Vec<String>> {
    let mut lists: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        lists
            .entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    lists
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
