//! Command-line argument parser.
//!
//! Hand-rolled for zero-overhead startup. Everything after the bitcode
//! file belongs to the guest program untouched, matching how a native
//! loader would treat it.

use std::path::PathBuf;

// =============================================================================
// Execution Mode
// =============================================================================

/// What the launcher should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// `molten run <file.bc> [guest args...]`
    Run(PathBuf),
    /// `molten -V` / `molten --version`
    PrintVersion,
    /// `molten -h` / `molten --help`
    PrintHelp,
}

// =============================================================================
// Parsed Arguments
// =============================================================================

/// Complete set of parsed CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// What to execute.
    pub mode: ExecutionMode,
    /// Arguments handed to the guest program (`argv[1..]`).
    pub guest_args: Vec<String>,
    /// `-v` occurrences: log verbosity.
    pub verbose: u32,
    /// `--stack-limit <n>`: guest frame limit override.
    pub stack_limit: Option<usize>,
    /// `--library-path <dir>`: extra native library search directories,
    /// in order, ahead of `MOLTEN_LIBRARY_PATH`.
    pub library_paths: Vec<PathBuf>,
    /// `--preload <lib>`: native shared objects to load at link time.
    pub preload: Vec<PathBuf>,
}

impl Default for CliArgs {
    fn default() -> Self {
        CliArgs {
            mode: ExecutionMode::PrintHelp,
            guest_args: Vec::new(),
            verbose: 0,
            stack_limit: None,
            library_paths: Vec::new(),
            preload: Vec::new(),
        }
    }
}

// =============================================================================
// Parse Error
// =============================================================================

/// Error during argument parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    /// Missing required argument value (e.g. `--stack-limit` without a
    /// number).
    MissingValue(&'static str),
    /// A value that failed to parse.
    BadValue(&'static str, String),
    /// Unknown flag.
    UnknownFlag(String),
    /// `run` without a bitcode file.
    MissingFile,
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgError::MissingValue(flag) => {
                write!(f, "argument expected for the {flag} option")
            }
            ArgError::BadValue(flag, value) => {
                write!(f, "invalid value `{value}` for the {flag} option")
            }
            ArgError::UnknownFlag(flag) => write!(f, "unknown option: {flag}"),
            ArgError::MissingFile => write!(f, "no bitcode file given"),
        }
    }
}

impl std::error::Error for ArgError {}

// =============================================================================
// Parser Entry Point
// =============================================================================

/// Parse the arguments after the program name.
///
/// 1. Options are parsed left-to-right until `run` is found.
/// 2. The first argument after `run` is the bitcode file.
/// 3. Everything after the file goes to the guest verbatim.
pub fn parse_args(args: &[String]) -> Result<CliArgs, ArgError> {
    let mut result = CliArgs::default();
    let mut i = 0;

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-V" | "--version" => {
                result.mode = ExecutionMode::PrintVersion;
                return Ok(result);
            }
            "-h" | "--help" => {
                result.mode = ExecutionMode::PrintHelp;
                return Ok(result);
            }
            "-v" => result.verbose += 1,
            "-vv" => result.verbose += 2,
            "--stack-limit" => {
                i += 1;
                let raw = args.get(i).ok_or(ArgError::MissingValue("--stack-limit"))?;
                let value = raw
                    .parse::<usize>()
                    .map_err(|_| ArgError::BadValue("--stack-limit", raw.clone()))?;
                result.stack_limit = Some(value);
            }
            "--library-path" => {
                i += 1;
                let raw = args
                    .get(i)
                    .ok_or(ArgError::MissingValue("--library-path"))?;
                result.library_paths.push(PathBuf::from(raw));
            }
            "--preload" => {
                i += 1;
                let raw = args.get(i).ok_or(ArgError::MissingValue("--preload"))?;
                result.preload.push(PathBuf::from(raw));
            }
            "run" => {
                i += 1;
                let file = args.get(i).ok_or(ArgError::MissingFile)?;
                result.mode = ExecutionMode::Run(PathBuf::from(file));
                // Everything else belongs to the guest.
                result.guest_args = args[i + 1..].to_vec();
                return Ok(result);
            }
            other => return Err(ArgError::UnknownFlag(other.to_string())),
        }
        i += 1;
    }

    Ok(result)
}

// =============================================================================
// Version / Help Text
// =============================================================================

/// Version banner.
#[inline]
pub fn version_string() -> String {
    format!("molten {}", molten_core::VERSION)
}

/// Help text.
pub fn help_text() -> String {
    format!(
        r#"usage: molten [options] run <file.bc> [guest args...]

Options:
  -v                   increase log verbosity (repeatable)
  --stack-limit <n>    guest call-depth limit (default {})
  --library-path <dir> add a native library search directory
                       (also MOLTEN_LIBRARY_PATH, colon-separated)
  --preload <lib>      load a native shared object at link time
  -V, --version        print version and exit
  -h, --help           print this help and exit

The guest program's exit code becomes the process exit code."#,
        molten_core::config::DEFAULT_STACK_LIMIT,
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, ArgError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_args(&args)
    }

    #[test]
    fn test_no_args_prints_help() {
        let result = parse(&[]).unwrap();
        assert_eq!(result.mode, ExecutionMode::PrintHelp);
    }

    #[test]
    fn test_run_with_guest_args() {
        let result = parse(&["run", "prog.bc", "a", "-v", "--weird"]).unwrap();
        assert_eq!(result.mode, ExecutionMode::Run(PathBuf::from("prog.bc")));
        // Guest args are untouched, even ones that look like our flags.
        assert_eq!(result.guest_args, vec!["a", "-v", "--weird"]);
        assert_eq!(result.verbose, 0);
    }

    #[test]
    fn test_run_missing_file() {
        assert_eq!(parse(&["run"]).unwrap_err(), ArgError::MissingFile);
    }

    #[test]
    fn test_version_flags() {
        assert_eq!(parse(&["-V"]).unwrap().mode, ExecutionMode::PrintVersion);
        assert_eq!(
            parse(&["--version"]).unwrap().mode,
            ExecutionMode::PrintVersion
        );
    }

    #[test]
    fn test_verbosity_accumulates() {
        let result = parse(&["-v", "-v", "run", "x.bc"]).unwrap();
        assert_eq!(result.verbose, 2);
        let result = parse(&["-vv", "run", "x.bc"]).unwrap();
        assert_eq!(result.verbose, 2);
    }

    #[test]
    fn test_stack_limit() {
        let result = parse(&["--stack-limit", "64", "run", "x.bc"]).unwrap();
        assert_eq!(result.stack_limit, Some(64));
        assert_eq!(
            parse(&["--stack-limit"]).unwrap_err(),
            ArgError::MissingValue("--stack-limit")
        );
        assert_eq!(
            parse(&["--stack-limit", "many"]).unwrap_err(),
            ArgError::BadValue("--stack-limit", "many".to_string())
        );
    }

    #[test]
    fn test_library_paths_ordered() {
        let result = parse(&[
            "--library-path",
            "/a",
            "--library-path",
            "/b",
            "run",
            "x.bc",
        ])
        .unwrap();
        assert_eq!(
            result.library_paths,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn test_preload() {
        let result = parse(&["--preload", "libnative.so", "run", "x.bc"]).unwrap();
        assert_eq!(result.preload, vec![PathBuf::from("libnative.so")]);
    }

    #[test]
    fn test_unknown_flag() {
        match parse(&["--frobnicate"]).unwrap_err() {
            ArgError::UnknownFlag(flag) => assert_eq!(flag, "--frobnicate"),
            other => panic!("expected UnknownFlag, got {:?}", other),
        }
    }

    #[test]
    fn test_help_text_mentions_flags() {
        let text = help_text();
        assert!(text.contains("--stack-limit"));
        assert!(text.contains("--library-path"));
        assert!(text.contains("MOLTEN_LIBRARY_PATH"));
        assert!(text.contains("run <file.bc>"));
    }

    #[test]
    fn test_version_string() {
        assert!(version_string().starts_with("molten "));
    }
}
