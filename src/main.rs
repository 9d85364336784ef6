use anyhow::Context;
use clap::Parser;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

mod error;
mod logging;
mod shard;
mod shared;

use error::CountError;
use shared::*;

/// Count GitHub Archive pull request events per repository language
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the event files (newline-delimited JSON, optionally gzipped)
    #[arg(short, long, default_value = "./data")]
    path: PathBuf,

    /// Only process files whose name contains this text
    #[arg(short, long, default_value = ".json")]
    marker: String,

    /// Also look for event files in sub-directories
    #[arg(short, long)]
    recursive: bool,

    /// Number of files to process at once
    #[arg(short, long, default_value_t = num_cpus::get())]
    jobs: usize,

    /// Minimum number of events for a language to be printed
    #[arg(long, default_value_t = 0)]
    min_count: usize,

    /// Order of the printed languages
    #[arg(short, long, value_enum, default_value_t = Order::Key)]
    sort: Order,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs)
        .build()
        .context("failed to start worker threads")?;

    let paths = discover(&args.path, &args.marker, args.recursive)?;
    info!("counting {} files on {} threads", paths.len(), pool.current_num_threads());

    let mut langs = count_all(paths, &pool)?;
    if args.min_count > 0 {
        langs.retain(|_, count| *count > args.min_count);
    }

    write_tally(&mut io::stdout().lock(), &langs, args.sort)?;
    Ok(())
}

/// Files under `dir` whose name contains `marker`, sorted by path.
fn discover(dir: &Path, marker: &str, recursive: bool) -> Result<Vec<PathBuf>, CountError> {
    if !dir.is_dir() {
        warn!("{} is not a directory, nothing to count", dir.display());
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(dir).min_depth(1);
    let walker = if recursive { walker } else { walker.max_depth(1) };

    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().contains(marker) {
            paths.push(entry.into_path());
        } else {
            debug!("skipping {}", entry.path().display());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Count every file on its own worker, wait for all of them, then merge.
fn count_all(paths: Vec<PathBuf>, pool: &ThreadPool) -> Result<Tally, CountError> {
    let tallies = pool.install(|| {
        paths
            .into_par_iter()
            .map(|path| shard::count_shard(&path))
            .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(merge_tallies(tallies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn pr_event(language: &str) -> String {
        format!(
            r#"{{"type":"PullRequestEvent","payload":{{"pull_request":{{"head":{{"repo":{{"language":"{language}"}}}}}}}}}}"#
        )
    }

    #[test]
    fn empty_directory_gives_empty_tally() {
        let dir = tempfile::tempdir().unwrap();
        let paths = discover(dir.path(), ".json", false).unwrap();
        assert!(paths.is_empty());
        assert!(count_all(paths, &pool()).unwrap().is_empty());
    }

    #[test]
    fn absent_directory_gives_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = discover(&dir.path().join("data"), ".json", false).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn discovery_filters_by_marker_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "").unwrap();
        fs::write(dir.path().join("b.json.gz"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.json"), "").unwrap();

        let top = discover(dir.path(), ".json", false).unwrap();
        assert_eq!(
            top,
            vec![dir.path().join("a.json"), dir.path().join("b.json.gz")]
        );

        let all = discover(dir.path(), ".json", true).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&dir.path().join("nested").join("c.json")));
    }

    #[test]
    fn counts_are_merged_across_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("1.json"),
            [pr_event("Go"), pr_event("Rust")].join("\n"),
        )
        .unwrap();
        fs::write(
            dir.path().join("2.json"),
            [pr_event("Go"), r#"{"type":"PushEvent"}"#.to_string()].join("\n"),
        )
        .unwrap();
        fs::write(dir.path().join("skip.txt"), pr_event("Java")).unwrap();

        let paths = discover(dir.path(), ".json", false).unwrap();
        let langs = count_all(paths, &pool()).unwrap();
        assert_eq!(langs.len(), 2);
        assert_eq!(langs["Go"], 2);
        assert_eq!(langs["Rust"], 1);
    }

    #[test]
    fn one_bad_file_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.json"), pr_event("Go")).unwrap();
        fs::write(dir.path().join("bad.json"), "PullRequestEvent").unwrap();

        let paths = discover(dir.path(), ".json", false).unwrap();
        assert!(matches!(
            count_all(paths, &pool()),
            Err(CountError::Parse { .. })
        ));
    }
}
