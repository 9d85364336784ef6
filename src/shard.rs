//! Counting pull request events by language within a single input file.

use flate2::read::GzDecoder;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::error::CountError;
use crate::shared::{new_hash_map, Tally, NO_LANG};

pub const PULL_REQUEST_EVENT: &str = "PullRequestEvent";

/// Tally the pull request events in one file by head repository language.
///
/// Lines that don't mention [`PULL_REQUEST_EVENT`] are skipped unparsed, so
/// they may hold anything. A line that does mention it has to be valid JSON.
pub fn count_shard(path: &Path) -> Result<Tally, CountError> {
    info!("processing {}", path.display());
    let io_error = |source: std::io::Error| CountError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let reader: Box<dyn Read> = if is_gzipped(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut reader = BufReader::new(reader);
    let mut langs = new_hash_map();
    let mut line = Vec::new();
    let mut number = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).map_err(io_error)? == 0 {
            break;
        }
        number += 1;
        if !mentions_pull_request(&line) {
            continue;
        }
        let event: Value = serde_json::from_slice(&line).map_err(|source| CountError::Parse {
            path: path.to_path_buf(),
            line: number,
            source,
        })?;
        if !is_pull_request_event(&event) {
            continue;
        }
        let lang = head_repo_language(&event).unwrap_or(NO_LANG);
        *langs.entry(lang.to_string()).or_default() += 1;
    }

    if langs.is_empty() {
        debug!("no pull request events in {}", path.display());
    }
    Ok(langs)
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Raw byte check, so lines that are skipped never need to be UTF-8.
fn mentions_pull_request(line: &[u8]) -> bool {
    let needle = PULL_REQUEST_EVENT.as_bytes();
    line.windows(needle.len()).any(|window| window == needle)
}

fn is_pull_request_event(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some(PULL_REQUEST_EVENT)
}

/// `payload.pull_request.head.repo.language`, if every link is present and
/// the language is a string.
fn head_repo_language(event: &Value) -> Option<&str> {
    event
        .get("payload")?
        .get("pull_request")?
        .get("head")?
        .get("repo")?
        .get("language")?
        .as_str()
}
