use clap::Parser;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Default pattern for numbered copies such as "name (1).pdf", restricted to
/// a whitelist of media/document extensions.
const DEFAULT_PATTERN: &str = r"(.+)\s\((\d+)\)\.(pdf|mobi|mp4|epub|wav|mp3)$";

/// Capture groups a duplicate pattern must expose: stem, copy number, extension.
const REQUIRED_CAPTURE_GROUPS: usize = 3;

/// Fallback results destination when deletion was requested without --out.
const DEFAULT_RESULTS_FILE: &str = "results.txt";

/// A tool to find files whose names mark them as numbered copies of an
/// original (e.g. "book (1).pdf") and delete or rename them according to a
/// selected policy. Without --dry-run or --delete the tool only scans.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directories to search for duplicates
    paths: Vec<PathBuf>,

    /// List duplicates without making any changes. Always test with this first!
    #[arg(long)]
    dry_run: bool,

    /// Permanently delete duplicate files, keeping the original
    #[arg(long)]
    delete: bool,

    /// Keep only the newest file in each group and delete the rest, including
    /// the original (requires --delete)
    #[arg(long)]
    inverse: bool,

    /// Like --inverse, but also rename the kept file to the original's name
    /// (requires --delete)
    #[arg(long)]
    inverse_and_rename: bool,

    /// Write results to this file instead of stdout
    #[arg(short = 'o', long)]
    out: Option<PathBuf>,

    /// Custom duplicate pattern; must expose exactly three capture groups
    /// (stem, copy number, extension)
    #[arg(long, default_value = DEFAULT_PATTERN)]
    regex: String,

    /// Suppress the scan summary printed to stderr
    #[arg(short = 'q', long)]
    quiet: bool,
}

/// Retention policy applied to the completed grouping, resolved once from the
/// CLI flags. Precedence: dry-run > inverse-and-rename > inverse > delete.
/// The inverse flags require --delete; with neither --dry-run nor --delete
/// the run is scan-only and emits no result lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    DryRun,
    DeleteKeepOriginal,
    InverseKeepNewest { rename: bool },
}

impl Policy {
    fn from_args(args: &Args) -> Option<Self> {
        if args.dry_run {
            Some(Policy::DryRun)
        } else if args.delete && args.inverse_and_rename {
            Some(Policy::InverseKeepNewest { rename: true })
        } else if args.delete && args.inverse {
            Some(Policy::InverseKeepNewest { rename: false })
        } else if args.delete {
            Some(Policy::DeleteKeepOriginal)
        } else {
            None
        }
    }
}

#[derive(Debug)]
enum AppError {
    NoSearchPaths,
    InvalidPattern(String, regex::Error),
    PatternGroupCount(usize),
    Walk(PathBuf, walkdir::Error),
    WriteResults(PathBuf, io::Error),
}

/// Mapping from inferred original path to the copies matched for it, in walk
/// order, plus the counters reported in the scan summary.
#[derive(Debug)]
struct ScanOutcome {
    groups: HashMap<PathBuf, Vec<PathBuf>>,
    scanned_files: usize,
}

impl ScanOutcome {
    fn matched_files(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Compiles the duplicate pattern and checks that it exposes exactly the
/// three capture groups the grouping stage relies on.
fn compile_pattern(pattern: &str) -> Result<Regex, AppError> {
    let re = Regex::new(pattern)
        .map_err(|err| AppError::InvalidPattern(pattern.to_string(), err))?;
    // captures_len includes the implicit whole-match group.
    let groups = re.captures_len() - 1;
    if groups != REQUIRED_CAPTURE_GROUPS {
        return Err(AppError::PatternGroupCount(groups));
    }
    Ok(re)
}

/// Walks every root and groups matching files by their inferred original
/// path: dirname(match) joined with "<stem>.<extension>" from the capture
/// groups. The first traversal error aborts the scan with the offending root.
fn scan_roots(roots: &[PathBuf], re: &Regex) -> Result<ScanOutcome, AppError> {
    let mut groups: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    let mut scanned_files = 0usize;

    for root in roots {
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|err| AppError::Walk(root.clone(), err))?;
            if entry.file_type().is_dir() {
                continue;
            }
            scanned_files += 1;
            let name = entry.file_name().to_string_lossy();
            if let Some(caps) = re.captures(name.as_ref()) {
                let stem = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let ext = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                let parent = entry.path().parent().unwrap_or_else(|| Path::new(""));
                let original = parent.join(format!("{}.{}", stem, ext));
                groups
                    .entry(original)
                    .or_default()
                    .push(entry.path().to_path_buf());
            }
        }
    }

    Ok(ScanOutcome {
        groups,
        scanned_files,
    })
}

/// Last-modified timestamp used for the inverse-mode sort. Unreadable
/// metadata sorts as the epoch, so such a file is never the kept one.
fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn delete_file(path: &Path, results: &mut Vec<String>) {
    match fs::remove_file(path) {
        Ok(()) => results.push(format!("Deleted {}", path.display())),
        Err(err) => results.push(format!("Failed to delete {}: {}", path.display(), err)),
    }
}

/// Applies the selected policy to every group whose inferred original exists
/// as a regular file; groups without a confirmed original are skipped
/// entirely. Per-file failures become result lines and never stop the batch.
fn execute_policy(groups: &HashMap<PathBuf, Vec<PathBuf>>, policy: Policy) -> Vec<String> {
    let mut results = Vec::new();

    for (original, duplicates) in groups {
        if duplicates.is_empty() {
            continue;
        }
        // Only act on copies of a confirmed original.
        if !original.is_file() {
            continue;
        }

        match policy {
            Policy::DryRun => {
                results.push(format!("Original: {}", original.display()));
                for duplicate in duplicates {
                    results.push(format!("  - Duplicate: {}", duplicate.display()));
                }
            }
            Policy::DeleteKeepOriginal => {
                for duplicate in duplicates {
                    delete_file(duplicate, &mut results);
                }
            }
            Policy::InverseKeepNewest { rename } => {
                // Stable sort: files with equal timestamps keep walk order.
                let mut ordered = duplicates.clone();
                ordered.sort_by_key(|path| Reverse(modified_time(path)));
                if let Some((newest, older)) = ordered.split_first() {
                    for path in older {
                        delete_file(path, &mut results);
                    }
                    delete_file(original, &mut results);
                    if rename {
                        // The original was just deleted, so its path is free.
                        match fs::rename(newest, original) {
                            Ok(()) => results.push(format!(
                                "Renamed {} to {}",
                                newest.display(),
                                original.display()
                            )),
                            Err(err) => results.push(format!(
                                "Failed to rename {} to {}: {}",
                                newest.display(),
                                original.display(),
                                err
                            )),
                        }
                    } else {
                        results.push(format!("Kept newest file: {}", newest.display()));
                    }
                }
            }
        }
    }

    results
}

fn write_results(path: &Path, results: &str) -> Result<(), AppError> {
    fs::write(path, results).map_err(|err| AppError::WriteResults(path.to_path_buf(), err))?;
    println!("Results written to {}", path.display());
    Ok(())
}

fn run_app(args: Args) -> Result<(), AppError> {
    if args.paths.is_empty() {
        return Err(AppError::NoSearchPaths);
    }
    let re = compile_pattern(&args.regex)?;
    let policy = Policy::from_args(&args);

    let outcome = scan_roots(&args.paths, &re)?;
    if !args.quiet {
        eprintln!(
            "Scanned {} files: {} matched the duplicate pattern in {} groups.",
            outcome.scanned_files,
            outcome.matched_files(),
            outcome.groups.len()
        );
    }

    let results = match policy {
        Some(policy) => execute_policy(&outcome.groups, policy),
        None => Vec::new(),
    };
    let output = results.join("\n");

    if let Some(out) = &args.out {
        write_results(out, &output)
    } else if args.delete {
        write_results(Path::new(DEFAULT_RESULTS_FILE), &output)
    } else {
        println!("{}", output);
        Ok(())
    }
}

fn main() {
    let args = Args::parse();
    match run_app(args) {
        Ok(()) => {}
        Err(AppError::NoSearchPaths) => {
            eprintln!("At least one search path must be specified.");
            process::exit(1);
        }
        Err(AppError::InvalidPattern(pattern, err)) => {
            eprintln!("Invalid duplicate pattern {:?}: {}", pattern, err);
            process::exit(1);
        }
        Err(AppError::PatternGroupCount(found)) => {
            eprintln!(
                "Duplicate pattern must expose exactly {} capture groups (stem, copy number, extension), found {}.",
                REQUIRED_CAPTURE_GROUPS, found
            );
            process::exit(1);
        }
        Err(AppError::Walk(root, err)) => {
            eprintln!("Error walking path {}: {}", root.display(), err);
            process::exit(1);
        }
        Err(AppError::WriteResults(path, err)) => {
            eprintln!("Failed to write results to {}: {}", path.display(), err);
            process::exit(1);
        }
    }
}
