// The fixed reference set every generator unit is compiled against. It is discovered once
// per process: the rustc binary (configuration, then the RUSTC environment variable, then
// PATH), its release and host triple from `rustc -vV`, the sysroot that provides core, alloc
// and std, and the selfgen-macros proc-macro library that backs the marker attribute. Extra
// --extern crates and -L directories from the configuration are carried along. The set is
// immutable and shared read-only between concurrent compiles through an Arc.

//! Reference set for unit compilation.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use crate::config::ToolchainConfig;
use crate::core::error::ConfigError;
use crate::syntax::Edition;

/// Name of the marker proc-macro crate.
pub const MACROS_CRATE: &str = "selfgen_macros";

/// A rustc release, e.g. `1.85.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RustcVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RustcVersion {
    pub fn parse(release: &str) -> Option<Self> {
        let release = release.trim().split(['-', '+']).next()?;
        let mut parts = release.split('.').map(|part| part.parse::<u32>().ok());
        Some(Self {
            major: parts.next()??,
            minor: parts.next()??,
            patch: parts.next().flatten().unwrap_or(0),
        })
    }
}

impl std::fmt::Display for RustcVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Toolchain and libraries units are compiled against.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    rustc: PathBuf,
    version: RustcVersion,
    host: String,
    sysroot: PathBuf,
    macros_lib: PathBuf,
    externs: Vec<(String, PathBuf)>,
    search_paths: Vec<PathBuf>,
}

impl ReferenceSet {
    /// Discover the toolchain described by `config`.
    pub fn discover(config: &ToolchainConfig) -> Result<Self, ConfigError> {
        let rustc = config
            .rustc
            .clone()
            .or_else(|| env::var_os("RUSTC").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("rustc"));

        let verbose = run_rustc(&rustc, &["-vV"])?;
        let (version, host) = parse_verbose_version(&verbose)?;
        let sysroot = PathBuf::from(run_rustc(&rustc, &["--print", "sysroot"])?.trim());

        let macros_lib = match &config.macros_lib {
            Some(path) => path.clone(),
            None => find_macros_lib()?,
        };
        if !macros_lib.is_file() {
            return Err(ConfigError::MacrosLibraryNotFound {
                searched: vec![macros_lib],
            });
        }

        for (name, path) in &config.externs {
            if !path.exists() {
                return Err(ConfigError::Invalid {
                    reason: format!("--extern {}={} does not exist", name, path.display()),
                });
            }
        }

        log::info!(
            "using rustc {} ({}) for {}, marker library {}",
            version,
            rustc.display(),
            host,
            macros_lib.display()
        );

        Ok(Self {
            rustc,
            version,
            host,
            sysroot,
            macros_lib,
            externs: config.externs.clone(),
            search_paths: config.search_paths.clone(),
        })
    }

    pub fn rustc(&self) -> &Path {
        &self.rustc
    }

    pub fn version(&self) -> RustcVersion {
        self.version
    }

    /// Host target triple.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn sysroot(&self) -> &Path {
        &self.sysroot
    }

    pub fn macros_lib(&self) -> &Path {
        &self.macros_lib
    }

    pub fn externs(&self) -> &[(String, PathBuf)] {
        &self.externs
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Check that units can be built with `edition`.
    pub fn check_edition(&self, edition: Edition) -> Result<(), String> {
        match edition {
            Edition::E2015 => Err(String::from(
                "edition 2015 is not supported: units rely on 2018 path resolution for the marker crate",
            )),
            Edition::E2024 if self.version < (RustcVersion { major: 1, minor: 85, patch: 0 }) => Err(format!(
                "edition 2024 requires rustc 1.85 or newer, found {}",
                self.version
            )),
            _ => Ok(()),
        }
    }

    /// `--extern` and `-L` arguments shared by every unit compile.
    pub fn library_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        let mut extern_arg = OsString::from(format!("{}=", MACROS_CRATE));
        extern_arg.push(&self.macros_lib);
        args.push(OsString::from("--extern"));
        args.push(extern_arg);

        for (name, path) in &self.externs {
            let mut extern_arg = OsString::from(format!("{}=", name));
            extern_arg.push(path);
            args.push(OsString::from("--extern"));
            args.push(extern_arg);
        }

        let mut dirs: Vec<&Path> = Vec::new();
        if let Some(dir) = self.macros_lib.parent() {
            dirs.push(dir);
        }
        dirs.extend(self.externs.iter().filter_map(|(_, path)| path.parent()));
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            let mut search = OsString::from("dependency=");
            search.push(dir);
            args.push(OsString::from("-L"));
            args.push(search);
        }

        for dir in &self.search_paths {
            args.push(OsString::from("-L"));
            args.push(dir.clone().into_os_string());
        }

        args
    }

    pub fn command(&self) -> Command {
        Command::new(&self.rustc)
    }
}

fn run_rustc(rustc: &Path, args: &[&str]) -> Result<String, ConfigError> {
    log::trace!("running {} {}", rustc.display(), args.join(" "));
    let output = Command::new(rustc)
        .args(args)
        .output()
        .map_err(|source| ConfigError::RustcUnavailable {
            path: rustc.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Err(ConfigError::RustcOutput {
            reason: format!(
                "`{} {}` exited with {}: {}",
                rustc.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Release and host triple from `rustc -vV`.
pub fn parse_verbose_version(output: &str) -> Result<(RustcVersion, String), ConfigError> {
    let field = |name: &str| {
        output
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .map(|value| value.trim().to_string())
    };

    let release = field("release:").ok_or_else(|| ConfigError::RustcOutput {
        reason: String::from("no `release:` line in `rustc -vV`"),
    })?;
    let version = RustcVersion::parse(&release).ok_or_else(|| ConfigError::RustcOutput {
        reason: format!("unrecognised release `{}`", release),
    })?;
    let host = field("host:").ok_or_else(|| ConfigError::RustcOutput {
        reason: String::from("no `host:` line in `rustc -vV`"),
    })?;
    Ok((version, host))
}

/// Directories searched for the marker library when it is not configured.
pub fn macros_lib_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        dirs.push(dir.join("deps"));
        if let Some(parent) = dir.parent() {
            dirs.push(parent.join("deps"));
        }
        dirs.push(dir);
    }
    dirs
}

/// Newest `selfgen_macros` dynamic library in the search directories.
pub fn find_macros_lib() -> Result<PathBuf, ConfigError> {
    let searched = macros_lib_search_dirs();
    let prefix = format!("{}{}", env::consts::DLL_PREFIX, MACROS_CRATE);

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for dir in &searched {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(env::consts::DLL_SUFFIX))
            else {
                continue;
            };
            if !(stem.is_empty() || stem.starts_with('-')) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if best.as_ref().map_or(true, |(newest, _)| modified > *newest) {
                best = Some((modified, entry.path()));
            }
        }
    }

    best.map(|(_, path)| path)
        .ok_or(ConfigError::MacrosLibraryNotFound { searched })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbose_version() {
        let output = "rustc 1.85.0 (4d91de4e4 2025-02-17)\nbinary: rustc\nhost: x86_64-unknown-linux-gnu\nrelease: 1.85.0\nLLVM version: 19.1.7\n";
        let (version, host) = parse_verbose_version(output).unwrap();
        assert_eq!(version, RustcVersion { major: 1, minor: 85, patch: 0 });
        assert_eq!(host, "x86_64-unknown-linux-gnu");

        assert!(parse_verbose_version("rustc ???").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let nightly = RustcVersion::parse("1.86.0-nightly").unwrap();
        assert!(nightly > RustcVersion::parse("1.85.1").unwrap());
        assert_eq!(RustcVersion::parse("1.80").unwrap().patch, 0);
        assert!(RustcVersion::parse("nightly").is_none());
    }

    fn references(version: &str) -> ReferenceSet {
        ReferenceSet {
            rustc: PathBuf::from("rustc"),
            version: RustcVersion::parse(version).unwrap(),
            host: String::from("x86_64-unknown-linux-gnu"),
            sysroot: PathBuf::from("/sysroot"),
            macros_lib: PathBuf::from("/target/debug/deps/libselfgen_macros-1234.so"),
            externs: vec![(String::from("serde"), PathBuf::from("/vendor/libserde.rlib"))],
            search_paths: vec![PathBuf::from("/native")],
        }
    }

    #[test]
    fn test_edition_support() {
        let old = references("1.80.0");
        assert!(old.check_edition(Edition::E2015).is_err());
        assert!(old.check_edition(Edition::E2021).is_ok());
        assert!(old.check_edition(Edition::E2024).is_err());
        assert!(references("1.85.0").check_edition(Edition::E2024).is_ok());
    }

    #[test]
    fn test_library_args() {
        let args: Vec<String> = references("1.85.0")
            .library_args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--extern",
                "selfgen_macros=/target/debug/deps/libselfgen_macros-1234.so",
                "--extern",
                "serde=/vendor/libserde.rlib",
                "-L",
                "dependency=/target/debug/deps",
                "-L",
                "dependency=/vendor",
                "-L",
                "/native",
            ]
        );
    }
}
